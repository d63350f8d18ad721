//! Long-lived system value wiring the pipeline together.
//!
//! One task per concern: the AIS client owns the transport, the registry
//! loop is the single writer of vessel state, the coalescer owns lane
//! timers and publishes. All cross-task communication is typed events over
//! channels; shutdown is a shared cancellation token.

use anyhow::Result;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::ais_client::{AisClientConfig, AisEvent, AisStreamClient};
use crate::coalescer::{Coalescer, RegistryUpdate};
use crate::config::AppConfig;
use crate::flow_events::ProximityEventService;
use crate::host::{CapabilityUpdate, HostBridge};
use crate::vessel_tracker::VesselRegistry;

/// Seconds between registry lifecycle sweeps.
const SWEEP_INTERVAL_SECS: u64 = 5;
/// Minutes between connection statistics log lines.
const STATS_LOG_INTERVAL_SECS: u64 = 300;

/// The assembled tracker. Construct with a host bridge (real or fake), then
/// [`TrackerSystem::run`] until shutdown.
pub struct TrackerSystem {
    config: AppConfig,
    host: Arc<dyn HostBridge>,
    shutdown: CancellationToken,
}

impl TrackerSystem {
    pub fn new(config: AppConfig, host: Arc<dyn HostBridge>) -> Self {
        Self {
            config,
            host,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Run the whole pipeline until the shutdown token fires.
    pub async fn run(self) -> Result<()> {
        let (ais_tx, ais_rx) = mpsc::channel::<AisEvent>(256);
        let (update_tx, update_rx) = mpsc::channel::<RegistryUpdate>(64);

        let registry = VesselRegistry::new();
        let bridges = *registry.bridges();

        let client = AisStreamClient::new(
            AisClientConfig {
                api_key: self.config.api_key.clone(),
                keepalive_secs: self.config.keepalive_secs,
                max_reconnect_attempts: self.config.max_reconnect_attempts,
            },
            ais_tx,
            self.shutdown.clone(),
        );
        let stats = client.stats_handle();

        let coalescer = Coalescer::new(Arc::clone(&self.host), bridges);
        let coalescer_task = tokio::spawn(coalescer.run(update_rx, self.shutdown.clone()));

        let registry_task = tokio::spawn(run_registry_loop(
            registry,
            ais_rx,
            update_tx,
            Arc::clone(&self.host),
            self.shutdown.clone(),
        ));

        let stats_shutdown = self.shutdown.clone();
        let stats_task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(STATS_LOG_INTERVAL_SECS));
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = stats_shutdown.cancelled() => break,
                    _ = interval.tick() => {
                        let snapshot = stats.lock().unwrap().clone();
                        info!(
                            connected = snapshot.connected,
                            reconnect_attempts = snapshot.reconnect_attempts,
                            uptime_secs = snapshot
                                .uptime(Utc::now())
                                .map(|d| d.num_seconds())
                                .unwrap_or(0),
                            "AIS connection statistics"
                        );
                    }
                }
            }
        });

        let client_result = client.run().await;
        if let Err(e) = &client_result {
            warn!(error = %e, "AIS client terminated");
        }

        // The client is the upstream of everything; once it is done the
        // rest of the pipeline drains and stops.
        self.shutdown.cancel();
        let _ = registry_task.await;
        let _ = coalescer_task.await;
        let _ = stats_task.await;

        client_result.map_err(Into::into)
    }
}

/// Single-writer loop over the vessel map.
async fn run_registry_loop(
    mut registry: VesselRegistry,
    mut ais_rx: mpsc::Receiver<AisEvent>,
    update_tx: mpsc::Sender<RegistryUpdate>,
    host: Arc<dyn HostBridge>,
    shutdown: CancellationToken,
) {
    let mut flow = ProximityEventService::new();
    let mut sweep = tokio::time::interval(Duration::from_secs(SWEEP_INTERVAL_SECS));
    sweep.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = sweep.tick() => {
                let now = Utc::now();
                let events = registry.sweep(now);
                flow.cleanup(&events, now);
                if !events.is_empty() {
                    let snapshot = registry.snapshot(now);
                    let _ = update_tx
                        .send(RegistryUpdate { events, snapshot })
                        .await;
                }
            }
            event = ais_rx.recv() => {
                let Some(event) = event else { break };
                match event {
                    AisEvent::Fix(fix) => {
                        let now = Utc::now();
                        let events = registry.handle_fix(&fix, now);
                        if events.is_empty() {
                            continue;
                        }
                        let snapshot = registry.snapshot(now);
                        let triggers =
                            flow.collect_triggers(&events, &snapshot, registry.bridges(), now);
                        for (tokens, bridge) in triggers {
                            if let Err(e) =
                                host.trigger_boat_near(tokens, bridge.as_str()).await
                            {
                                warn!(error = %e, "boat_near trigger failed");
                            }
                        }
                        flow.cleanup(&events, now);
                        let _ = update_tx
                            .send(RegistryUpdate { events, snapshot })
                            .await;
                    }
                    AisEvent::Connected => {
                        publish_connected(&host, true).await;
                    }
                    AisEvent::Disconnected => {
                        publish_connected(&host, false).await;
                    }
                    AisEvent::MaxReconnectsReached => {
                        warn!("AIS stream gave up reconnecting");
                        publish_connected(&host, false).await;
                    }
                }
            }
        }
    }
}

async fn publish_connected(host: &Arc<dyn HostBridge>, connected: bool) {
    let update = CapabilityUpdate {
        connected: Some(connected),
        ..Default::default()
    };
    if let Err(e) = host.publish_capabilities(update).await {
        warn!(error = %e, "connection_status publish failed");
    }
}
