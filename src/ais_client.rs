//! WebSocket client for the aisstream.io position stream.
//!
//! Keeps exactly one outbound subscription alive: connect, authenticate
//! with the API key and the canal bounding box, re-send the subscription
//! every minute as a keep-alive, and reconnect with jittered back-off when
//! the transport drops. A close with code 1000 is a deliberate goodbye and
//! is not retried.

use anyhow::Result;
use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{AIS_STREAM_ENDPOINT, CANAL_BBOX_NW, CANAL_BBOX_SE};
use crate::error::TrackerError;
use crate::fixes::VesselFix;

/// Back-off table in seconds; later attempts stay at the cap.
const BACKOFF_TABLE_SECS: [u64; 6] = [1, 2, 5, 10, 30, 60];
/// Jitter applied to each back-off delay.
const BACKOFF_JITTER: f64 = 0.1;

/// Events emitted toward the tracking pipeline.
#[derive(Debug, Clone)]
pub enum AisEvent {
    Connected,
    Fix(VesselFix),
    Disconnected,
    /// Retry budget exhausted; no further attempts until restarted.
    MaxReconnectsReached,
}

/// Connection statistics for logging and diagnostics.
#[derive(Debug, Clone, Default)]
pub struct ConnectionStats {
    pub connected: bool,
    pub reconnect_attempts: u32,
    pub last_message_time: Option<DateTime<Utc>>,
    pub connected_since: Option<DateTime<Utc>>,
}

impl ConnectionStats {
    pub fn uptime(&self, now: DateTime<Utc>) -> Option<chrono::Duration> {
        if !self.connected {
            return None;
        }
        self.connected_since.map(|since| now - since)
    }
}

/// Client configuration; the endpoint is fixed, the rest comes from
/// [`crate::config::AppConfig`].
#[derive(Debug, Clone)]
pub struct AisClientConfig {
    pub api_key: String,
    pub keepalive_secs: u64,
    pub max_reconnect_attempts: u32,
}

#[derive(Serialize)]
struct SubscriptionMessage {
    #[serde(rename = "APIKey")]
    api_key: String,
    #[serde(rename = "BoundingBoxes")]
    bounding_boxes: Vec<Vec<[f64; 2]>>,
}

/// Subscription frame: API key plus the canal bounding box, NW and SE
/// corners.
fn subscription_frame(api_key: &str) -> String {
    let message = SubscriptionMessage {
        api_key: api_key.to_string(),
        bounding_boxes: vec![vec![
            [CANAL_BBOX_NW.0, CANAL_BBOX_NW.1],
            [CANAL_BBOX_SE.0, CANAL_BBOX_SE.1],
        ]],
    };
    serde_json::to_string(&message).expect("static frame serializes")
}

/// Base back-off for the given attempt (1-based), capped at the table tail.
fn base_backoff_secs(attempt: u32) -> u64 {
    let idx = (attempt.saturating_sub(1) as usize).min(BACKOFF_TABLE_SECS.len() - 1);
    BACKOFF_TABLE_SECS[idx]
}

fn backoff_delay(attempt: u32) -> Duration {
    let base = base_backoff_secs(attempt) as f64;
    let jitter = rand::rng().random_range(-BACKOFF_JITTER..=BACKOFF_JITTER);
    Duration::from_millis(((base * (1.0 + jitter)) * 1000.0) as u64)
}

/// A normal close (code 1000) ends the client; everything else reconnects.
fn should_reconnect_after_close(code: Option<CloseCode>) -> bool {
    !matches!(code, Some(CloseCode::Normal))
}

/// How one connection ended.
enum ConnectionEnd {
    /// Server said goodbye with close code 1000.
    Normal,
    /// Transport dropped or errored; retry.
    Lost,
}

pub struct AisStreamClient {
    config: AisClientConfig,
    events: mpsc::Sender<AisEvent>,
    stats: Arc<Mutex<ConnectionStats>>,
    shutdown: CancellationToken,
}

impl AisStreamClient {
    pub fn new(
        config: AisClientConfig,
        events: mpsc::Sender<AisEvent>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            config,
            events,
            stats: Arc::new(Mutex::new(ConnectionStats::default())),
            shutdown,
        }
    }

    /// Snapshot of the connection statistics.
    pub fn connection_stats(&self) -> ConnectionStats {
        self.stats.lock().unwrap().clone()
    }

    /// Shared handle for the periodic stats logger.
    pub fn stats_handle(&self) -> Arc<Mutex<ConnectionStats>> {
        Arc::clone(&self.stats)
    }

    /// Connect-and-reconnect loop. Returns when shut down, on a normal
    /// close, or when the retry budget is exhausted.
    pub async fn run(self) -> Result<(), TrackerError> {
        let mut attempts: u32 = 0;
        loop {
            if self.shutdown.is_cancelled() {
                return Ok(());
            }

            match self.connect_and_stream().await {
                Ok(ConnectionEnd::Normal) => {
                    info!("AIS stream closed normally, not reconnecting");
                    self.emit_disconnected().await;
                    return Ok(());
                }
                Ok(ConnectionEnd::Lost) => {
                    self.emit_disconnected().await;
                }
                Err(e) => {
                    warn!(error = %e, "AIS stream connection failed");
                    if self.stats.lock().unwrap().connected {
                        self.emit_disconnected().await;
                    }
                }
            }

            attempts += 1;
            {
                let mut stats = self.stats.lock().unwrap();
                stats.connected = false;
                stats.connected_since = None;
                stats.reconnect_attempts = attempts;
            }
            if attempts >= self.config.max_reconnect_attempts {
                error!(
                    attempts,
                    "maximum reconnect attempts reached, giving up on the AIS stream"
                );
                let _ = self.events.send(AisEvent::MaxReconnectsReached).await;
                return Err(TrackerError::Network("max reconnect attempts".into()));
            }

            let delay = backoff_delay(attempts);
            debug!(attempt = attempts, ?delay, "reconnecting after back-off");
            tokio::select! {
                _ = sleep(delay) => {}
                _ = self.shutdown.cancelled() => return Ok(()),
            }
        }
    }

    async fn emit_disconnected(&self) {
        let _ = self.events.send(AisEvent::Disconnected).await;
    }

    async fn connect_and_stream(&self) -> Result<ConnectionEnd, TrackerError> {
        info!(endpoint = AIS_STREAM_ENDPOINT, "connecting to AIS stream");
        let (ws_stream, _) = connect_async(AIS_STREAM_ENDPOINT)
            .await
            .map_err(|e| TrackerError::Network(e.to_string()))?;
        info!("AIS stream connected");

        {
            let mut stats = self.stats.lock().unwrap();
            stats.connected = true;
            stats.connected_since = Some(Utc::now());
            stats.reconnect_attempts = 0;
        }
        let _ = self.events.send(AisEvent::Connected).await;

        let (mut sink, mut stream) = ws_stream.split();

        let frame = subscription_frame(&self.config.api_key);
        sink.send(Message::Text(frame.clone()))
            .await
            .map_err(|e| TrackerError::Network(e.to_string()))?;
        debug!("subscription sent");

        let mut keepalive =
            tokio::time::interval(Duration::from_secs(self.config.keepalive_secs.max(1)));
        keepalive.tick().await; // skip the immediate tick

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    let _ = sink.send(Message::Close(None)).await;
                    return Ok(ConnectionEnd::Normal);
                }
                _ = keepalive.tick() => {
                    // aisstream.io drops idle subscriptions; re-send ours.
                    if let Err(e) = sink.send(Message::Text(frame.clone())).await {
                        warn!(error = %e, "keep-alive send failed");
                        return Ok(ConnectionEnd::Lost);
                    }
                    debug!("subscription keep-alive sent");
                }
                message = stream.next() => {
                    match message {
                        Some(Ok(msg)) => {
                            if let Some(end) = self.handle_message(msg).await {
                                return Ok(end);
                            }
                        }
                        Some(Err(e)) => {
                            warn!(error = %e, "AIS stream read error");
                            return Ok(ConnectionEnd::Lost);
                        }
                        None => {
                            warn!("AIS stream ended without close frame");
                            return Ok(ConnectionEnd::Lost);
                        }
                    }
                }
            }
        }
    }

    /// Handle one frame; `Some(end)` terminates the connection.
    async fn handle_message(&self, msg: Message) -> Option<ConnectionEnd> {
        let text = match msg {
            Message::Text(text) => text,
            Message::Binary(data) => match String::from_utf8(data.to_vec()) {
                Ok(text) => text,
                Err(_) => {
                    metrics::counter!("brovakt_fixes_dropped_total", "kind" => "invalid_ais")
                        .increment(1);
                    return None;
                }
            },
            Message::Close(frame) => {
                let code = frame.as_ref().map(|f| f.code);
                info!(?code, "AIS stream close frame received");
                return Some(if should_reconnect_after_close(code) {
                    ConnectionEnd::Lost
                } else {
                    ConnectionEnd::Normal
                });
            }
            Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => return None,
        };

        self.stats.lock().unwrap().last_message_time = Some(Utc::now());

        let frame: serde_json::Value = match serde_json::from_str(&text) {
            Ok(v) => v,
            Err(e) => {
                debug!(error = %e, "unparseable AIS frame");
                metrics::counter!("brovakt_fixes_dropped_total", "kind" => "invalid_ais")
                    .increment(1);
                return None;
            }
        };

        match VesselFix::from_frame(&frame, Utc::now()) {
            Ok(Some(fix)) => {
                let _ = self.events.send(AisEvent::Fix(fix)).await;
            }
            Ok(None) => {
                // Not a position report; ignored by design.
            }
            Err(e) => {
                debug!(error = %e, "invalid position report dropped");
                metrics::counter!("brovakt_fixes_dropped_total", "kind" => e.kind()).increment(1);
            }
        }
        None
    }
}
