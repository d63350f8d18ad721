//! The thin boundary toward the home-automation host.
//!
//! Everything the tracker tells the outside world crosses this trait:
//! three device capabilities (`bridge_text`, `alarm_generic`,
//! `connection_status`) and the `boat_near` flow trigger. The host SDK
//! requires every declared token to be present and typed, so
//! `eta_minutes` carries -1 instead of being omitted when unknown.

use anyhow::Result;
use async_trait::async_trait;
use tracing::info;

/// Capability writes batched into one publish. `None` fields are left
/// untouched on the device.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CapabilityUpdate {
    pub bridge_text: Option<String>,
    pub alarm: Option<bool>,
    pub connected: Option<bool>,
}

/// Tokens for the `boat_near` flow trigger. All fields are mandatory on the
/// host side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoatNearTokens {
    pub vessel_name: String,
    pub bridge_name: String,
    /// "northbound", "southbound" or "unknown".
    pub direction: &'static str,
    /// Whole minutes; -1 when no ETA is computable.
    pub eta_minutes: i64,
}

/// Outbound surface the tracker publishes through.
#[async_trait]
pub trait HostBridge: Send + Sync {
    async fn publish_capabilities(&self, update: CapabilityUpdate) -> Result<()>;
    async fn trigger_boat_near(&self, tokens: BoatNearTokens, bridge_id: &str) -> Result<()>;
}

/// Host bridge that only logs. Used by the CLI `run` command when no real
/// host is attached.
#[derive(Debug, Default)]
pub struct LoggingHostBridge;

#[async_trait]
impl HostBridge for LoggingHostBridge {
    async fn publish_capabilities(&self, update: CapabilityUpdate) -> Result<()> {
        if let Some(text) = &update.bridge_text {
            info!(capability = "bridge_text", %text, "capability update");
        }
        if let Some(alarm) = update.alarm {
            info!(capability = "alarm_generic", alarm, "capability update");
        }
        if let Some(connected) = update.connected {
            info!(capability = "connection_status", connected, "capability update");
        }
        Ok(())
    }

    async fn trigger_boat_near(&self, tokens: BoatNearTokens, bridge_id: &str) -> Result<()> {
        info!(
            trigger = "boat_near",
            vessel = %tokens.vessel_name,
            bridge = %tokens.bridge_name,
            bridge_id,
            direction = tokens.direction,
            eta_minutes = tokens.eta_minutes,
            "flow trigger"
        );
        Ok(())
    }
}

/// Recording host bridge for tests: remembers every publish and trigger.
#[derive(Debug, Default)]
pub struct RecordingHostBridge {
    pub capabilities: std::sync::Mutex<Vec<CapabilityUpdate>>,
    pub triggers: std::sync::Mutex<Vec<(BoatNearTokens, String)>>,
}

impl RecordingHostBridge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_bridge_text(&self) -> Option<String> {
        self.capabilities
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find_map(|u| u.bridge_text.clone())
    }

    pub fn last_alarm(&self) -> Option<bool> {
        self.capabilities
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find_map(|u| u.alarm)
    }

    pub fn publish_count(&self) -> usize {
        self.capabilities.lock().unwrap().len()
    }

    pub fn trigger_count(&self) -> usize {
        self.triggers.lock().unwrap().len()
    }
}

#[async_trait]
impl HostBridge for RecordingHostBridge {
    async fn publish_capabilities(&self, update: CapabilityUpdate) -> Result<()> {
        self.capabilities.lock().unwrap().push(update);
        Ok(())
    }

    async fn trigger_boat_near(&self, tokens: BoatNearTokens, bridge_id: &str) -> Result<()> {
        self.triggers
            .lock()
            .unwrap()
            .push((tokens, bridge_id.to_string()));
        Ok(())
    }
}
