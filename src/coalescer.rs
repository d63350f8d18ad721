//! Coalesced publication of the bridge text.
//!
//! There is no periodic UI refresh: every registry mutation schedules a
//! publish on a lane (one per opening bridge, plus a global lane) after a
//! significance-dependent micro-grace window, so a burst of fixes collapses
//! into one capability write. A version counter guards against stale
//! publishes, and a watchdog refreshes the text if vessels exist but
//! nothing has been published for 90 seconds.

use chrono::Utc;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::bridge_text::{self, BridgeTextService};
use crate::bridges::{BridgeId, BridgeRegistry};
use crate::host::{CapabilityUpdate, HostBridge};
use crate::vessel_tracker::{VesselEvent, VesselStatus, VesselView};

/// Publish lanes. Updates affecting a single opening bridge stay in that
/// bridge's lane; everything else goes global.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lane {
    Klaffbron,
    Stridsbergsbron,
    Global,
}

impl fmt::Display for Lane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Lane::Klaffbron => f.write_str("klaffbron"),
            Lane::Stridsbergsbron => f.write_str("stridsbergsbron"),
            Lane::Global => f.write_str("global"),
        }
    }
}

/// How urgently a batch of events must reach the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Significance {
    Low,
    Moderate,
    High,
    Immediate,
}

/// Micro-grace per tier, and the reduced window when an event joins an
/// already-scheduled batch.
pub fn grace_for(significance: Significance, joining_batch: bool) -> Duration {
    match significance {
        Significance::Immediate => Duration::from_millis(0),
        Significance::High => {
            if joining_batch {
                Duration::from_millis(10)
            } else {
                Duration::from_millis(15)
            }
        }
        Significance::Moderate => Duration::from_millis(25),
        Significance::Low => Duration::from_millis(40),
    }
}

/// Highest significance across a batch of registry events.
pub fn significance_of(events: &[VesselEvent]) -> Significance {
    let mut max = Significance::Low;
    for event in events {
        let s = match event {
            VesselEvent::StatusChanged { to, .. } => match to {
                Some(VesselStatus::UnderBridge { .. }) | Some(VesselStatus::Passed { .. }) => {
                    Significance::Immediate
                }
                _ => Significance::High,
            },
            VesselEvent::PassageAnchored { .. } => Significance::Immediate,
            VesselEvent::Entered { .. } | VesselEvent::Removed { .. } => Significance::Moderate,
            VesselEvent::Updated { .. } => Significance::Moderate,
            VesselEvent::GpsJumpDetected { .. }
            | VesselEvent::GpsHoldSet { .. }
            | VesselEvent::ProtectionZoneEntered { .. } => Significance::Low,
        };
        max = max.max(s);
    }
    max
}

/// Choose the lane from the targets present in the snapshot: if every
/// relevant vessel shares one opening bridge, use its lane.
pub fn lane_for(snapshot: &[VesselView]) -> Lane {
    let mut targets = snapshot.iter().filter_map(|v| v.target_bridge);
    let Some(first) = targets.next() else {
        return Lane::Global;
    };
    if targets.all(|t| t == first) {
        match first {
            BridgeId::Klaffbron => Lane::Klaffbron,
            BridgeId::Stridsbergsbron => Lane::Stridsbergsbron,
            _ => Lane::Global,
        }
    } else {
        Lane::Global
    }
}

/// One update from the registry loop: the events of a mutation plus the
/// snapshot taken right after it.
#[derive(Debug)]
pub struct RegistryUpdate {
    pub events: Vec<VesselEvent>,
    pub snapshot: Vec<VesselView>,
}

#[derive(Debug, Clone, Copy)]
struct PendingPublish {
    deadline: Instant,
    version: u64,
}

/// Watchdog interval: vessels present but nothing published for this long
/// forces a background refresh.
const WATCHDOG_SECS: u64 = 90;

/// The coalescer task. Owns the lane timers, the version counter, the text
/// service and the last published capability values.
pub struct Coalescer {
    host: Arc<dyn HostBridge>,
    bridges: BridgeRegistry,
    text_service: BridgeTextService,
    lanes: HashMap<Lane, PendingPublish>,
    version: u64,
    latest_snapshot: Vec<VesselView>,
    last_published_text: Option<String>,
    last_published_alarm: Option<bool>,
    last_publish_at: Instant,
}

impl Coalescer {
    pub fn new(host: Arc<dyn HostBridge>, bridges: BridgeRegistry) -> Self {
        Self {
            host,
            bridges,
            text_service: BridgeTextService::new(),
            lanes: HashMap::new(),
            version: 0,
            latest_snapshot: Vec::new(),
            last_published_text: None,
            last_published_alarm: None,
            last_publish_at: Instant::now(),
        }
    }

    /// Run until the update channel closes or shutdown is requested.
    pub async fn run(
        mut self,
        mut rx: mpsc::Receiver<RegistryUpdate>,
        shutdown: CancellationToken,
    ) {
        let mut watchdog = tokio::time::interval(Duration::from_secs(WATCHDOG_SECS));
        watchdog.tick().await; // skip the immediate first tick

        loop {
            let next_deadline = self.lanes.values().map(|p| p.deadline).min();
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("coalescer shutting down");
                    break;
                }
                update = rx.recv() => {
                    match update {
                        Some(update) => self.on_update(update),
                        None => break,
                    }
                }
                _ = watchdog.tick() => {
                    self.on_watchdog();
                }
                _ = deadline_sleep(next_deadline), if next_deadline.is_some() => {
                    self.publish_due().await;
                }
            }
        }
    }

    /// Classify a registry update and (re)schedule its lane.
    fn on_update(&mut self, update: RegistryUpdate) {
        let significance = significance_of(&update.events);
        let lane = lane_for(&update.snapshot);
        self.latest_snapshot = update.snapshot;
        self.schedule(lane, significance);
    }

    fn schedule(&mut self, lane: Lane, significance: Significance) {
        self.version += 1;
        let joining = self.lanes.contains_key(&lane);
        let deadline = Instant::now() + grace_for(significance, joining);

        let entry = self.lanes.entry(lane).or_insert(PendingPublish {
            deadline,
            version: self.version,
        });
        // A tighter deadline or a newer version always wins; a scheduled
        // publish is never pushed later by a low-significance follow-up.
        entry.deadline = entry.deadline.min(deadline);
        entry.version = self.version;

        metrics::counter!("brovakt_publishes_scheduled_total", "lane" => lane.to_string())
            .increment(1);
        debug!(%lane, ?significance, version = self.version, "publish scheduled");
    }

    fn on_watchdog(&mut self) {
        if !self.latest_snapshot.is_empty()
            && self.last_publish_at.elapsed() >= Duration::from_secs(WATCHDOG_SECS)
        {
            info!("watchdog: vessels present but no recent publish, scheduling refresh");
            self.schedule(Lane::Global, Significance::Low);
        }
    }

    /// Publish every lane whose grace window has elapsed. The text is always
    /// regenerated from the latest snapshot; lane state only decides when.
    async fn publish_due(&mut self) {
        let now = Instant::now();
        let due: Vec<(Lane, u64)> = self
            .lanes
            .iter()
            .filter(|(_, p)| p.deadline <= now)
            .map(|(l, p)| (*l, p.version))
            .collect();

        for (lane, scheduled_version) in due {
            // Stale-version guard: a newer schedule superseded this one
            // while we were publishing another lane.
            let current = self.lanes.get(&lane).map(|p| p.version);
            if current != Some(scheduled_version) {
                debug!(%lane, "skipping stale publish version");
                continue;
            }
            self.lanes.remove(&lane);
            self.publish(lane).await;
        }
    }

    async fn publish(&mut self, lane: Lane) {
        let now = Utc::now();
        let text = self
            .text_service
            .render(&self.latest_snapshot, &self.bridges, now);
        let relevant = bridge_text::relevant_count(&self.latest_snapshot, &self.bridges);
        let alarm = bridge_text::alarm_for(&text, relevant);

        let mut update = CapabilityUpdate::default();
        if self.last_published_text.as_deref() != Some(text.as_str()) {
            update.bridge_text = Some(text.clone());
        }
        if self.last_published_alarm != Some(alarm) {
            update.alarm = Some(alarm);
        }

        if update == CapabilityUpdate::default() {
            debug!(%lane, "nothing changed, publish skipped");
            self.last_publish_at = Instant::now();
            return;
        }

        match self.host.publish_capabilities(update).await {
            Ok(()) => {
                metrics::counter!("brovakt_publishes_total", "lane" => lane.to_string())
                    .increment(1);
                info!(%lane, %text, alarm, "bridge text published");
                self.last_published_text = Some(text);
                self.last_published_alarm = Some(alarm);
                self.last_publish_at = Instant::now();
            }
            Err(e) => {
                // The next event or the watchdog will retry with fresh state.
                error!(%lane, error = %e, "capability publish failed");
            }
        }
    }
}

async fn deadline_sleep(deadline: Option<Instant>) {
    match deadline {
        Some(instant) => tokio::time::sleep_until(instant).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::RecordingHostBridge;
    use crate::vessel_tracker::{Direction, RemovalReason};

    fn view(mmsi: &str, target: Option<BridgeId>) -> VesselView {
        VesselView {
            mmsi: mmsi.to_string(),
            ship_name: None,
            lat: 58.28,
            lon: 12.28,
            status: Some(VesselStatus::EnRoute),
            target_bridge: target,
            current_bridge: None,
            distance_to_current_m: None,
            eta_minutes: Some(6.0),
            direction: Direction::Northbound,
            last_passed: None,
            gps_hold: false,
            sog: 4.0,
        }
    }

    #[test]
    fn test_significance_tiers() {
        assert_eq!(
            significance_of(&[VesselEvent::StatusChanged {
                mmsi: "m".into(),
                from: None,
                to: Some(VesselStatus::UnderBridge {
                    bridge: BridgeId::Klaffbron
                }),
            }]),
            Significance::Immediate
        );
        assert_eq!(
            significance_of(&[VesselEvent::StatusChanged {
                mmsi: "m".into(),
                from: None,
                to: Some(VesselStatus::Waiting {
                    bridge: BridgeId::Klaffbron
                }),
            }]),
            Significance::High
        );
        assert_eq!(
            significance_of(&[VesselEvent::Removed {
                mmsi: "m".into(),
                reason: RemovalReason::Stale,
            }]),
            Significance::Moderate
        );
        assert_eq!(
            significance_of(&[VesselEvent::GpsJumpDetected {
                mmsi: "m".into(),
                distance_m: 400.0,
            }]),
            Significance::Low
        );
        // The batch takes its highest member.
        assert_eq!(
            significance_of(&[
                VesselEvent::Updated { mmsi: "m".into() },
                VesselEvent::PassageAnchored {
                    mmsi: "m".into(),
                    bridge: BridgeId::Klaffbron,
                    at: Utc::now(),
                },
            ]),
            Significance::Immediate
        );
    }

    #[test]
    fn test_grace_windows() {
        assert_eq!(
            grace_for(Significance::Immediate, false),
            Duration::from_millis(0)
        );
        assert_eq!(grace_for(Significance::High, false), Duration::from_millis(15));
        assert_eq!(grace_for(Significance::High, true), Duration::from_millis(10));
        assert_eq!(
            grace_for(Significance::Moderate, false),
            Duration::from_millis(25)
        );
        assert_eq!(grace_for(Significance::Low, false), Duration::from_millis(40));
    }

    #[test]
    fn test_lane_selection() {
        assert_eq!(lane_for(&[]), Lane::Global);
        assert_eq!(
            lane_for(&[view("1", Some(BridgeId::Klaffbron))]),
            Lane::Klaffbron
        );
        assert_eq!(
            lane_for(&[
                view("1", Some(BridgeId::Stridsbergsbron)),
                view("2", Some(BridgeId::Stridsbergsbron)),
            ]),
            Lane::Stridsbergsbron
        );
        assert_eq!(
            lane_for(&[
                view("1", Some(BridgeId::Klaffbron)),
                view("2", Some(BridgeId::Stridsbergsbron)),
            ]),
            Lane::Global
        );
        // Targetless vessels do not pin a lane.
        assert_eq!(lane_for(&[view("1", None)]), Lane::Global);
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_collapses_to_one_publish() {
        let host = Arc::new(RecordingHostBridge::new());
        let coalescer = Coalescer::new(host.clone(), BridgeRegistry::new());
        let (tx, rx) = mpsc::channel(32);
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(coalescer.run(rx, shutdown.clone()));

        // Three rapid updates for the same lane.
        for _ in 0..3 {
            tx.send(RegistryUpdate {
                events: vec![VesselEvent::Updated { mmsi: "1".into() }],
                snapshot: vec![view("1", Some(BridgeId::Klaffbron))],
            })
            .await
            .unwrap();
        }

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(host.publish_count(), 1, "burst must collapse to one publish");
        assert_eq!(
            host.last_bridge_text().as_deref(),
            Some("En båt på väg mot Klaffbron, beräknad broöppning om 6 minuter")
        );
        assert_eq!(host.last_alarm(), Some(true));

        shutdown.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_unchanged_text_not_republished() {
        let host = Arc::new(RecordingHostBridge::new());
        let coalescer = Coalescer::new(host.clone(), BridgeRegistry::new());
        let (tx, rx) = mpsc::channel(32);
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(coalescer.run(rx, shutdown.clone()));

        let send = |tx: mpsc::Sender<RegistryUpdate>| async move {
            tx.send(RegistryUpdate {
                events: vec![VesselEvent::Updated { mmsi: "1".into() }],
                snapshot: vec![view("1", Some(BridgeId::Klaffbron))],
            })
            .await
            .unwrap();
        };

        send(tx.clone()).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        send(tx.clone()).await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(
            host.publish_count(),
            1,
            "identical text and alarm must not be rewritten"
        );

        shutdown.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_snapshot_publishes_default_and_alarm_off() {
        let host = Arc::new(RecordingHostBridge::new());
        let coalescer = Coalescer::new(host.clone(), BridgeRegistry::new());
        let (tx, rx) = mpsc::channel(32);
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(coalescer.run(rx, shutdown.clone()));

        tx.send(RegistryUpdate {
            events: vec![VesselEvent::Updated { mmsi: "1".into() }],
            snapshot: vec![view("1", Some(BridgeId::Klaffbron))],
        })
        .await
        .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        tx.send(RegistryUpdate {
            events: vec![VesselEvent::Removed {
                mmsi: "1".into(),
                reason: RemovalReason::Stale,
            }],
            snapshot: vec![],
        })
        .await
        .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(
            host.last_bridge_text().as_deref(),
            Some(bridge_text::DEFAULT_MESSAGE)
        );
        assert_eq!(host.last_alarm(), Some(false));

        shutdown.cancel();
        task.await.unwrap();
    }
}
