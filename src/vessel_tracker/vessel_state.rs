//! Per-vessel live state owned by the registry.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

use crate::bridges::BridgeId;
use crate::geometry;
use crate::proximity::ProximityData;

/// Travel direction along the canal, derived from COG.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Northbound,
    Southbound,
    Unknown,
}

impl Direction {
    /// COG sectors: north is 0–45° or 315–360°, south is 135–225°.
    /// Everything else (including a missing COG) is unknown.
    pub fn from_cog(cog: Option<f64>) -> Direction {
        match cog {
            Some(c) if (0.0..=45.0).contains(&c) || (315.0..360.0).contains(&c) => {
                Direction::Northbound
            }
            Some(c) if (135.0..=225.0).contains(&c) => Direction::Southbound,
            _ => Direction::Unknown,
        }
    }

    /// Token value for the `boat_near` flow trigger.
    pub fn as_token(&self) -> &'static str {
        match self {
            Direction::Northbound => "northbound",
            Direction::Southbound => "southbound",
            Direction::Unknown => "unknown",
        }
    }
}

/// Derived per-vessel status. Closed set; `Waiting`/`UnderBridge` always
/// name the bridge they refer to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VesselStatus {
    EnRoute,
    Approaching { bridge: BridgeId },
    Waiting { bridge: BridgeId },
    /// Inside the Stallbackabron zone; that span never opens, so it gets
    /// its own phrasing instead of `Waiting`.
    StallbackaWaiting,
    UnderBridge { bridge: BridgeId },
    Passed { bridge: BridgeId },
}

impl VesselStatus {
    /// Bridge the status is anchored to, when any.
    pub fn bridge(&self) -> Option<BridgeId> {
        match self {
            VesselStatus::Approaching { bridge }
            | VesselStatus::Waiting { bridge }
            | VesselStatus::UnderBridge { bridge }
            | VesselStatus::Passed { bridge } => Some(*bridge),
            VesselStatus::StallbackaWaiting => Some(BridgeId::Stallbackabron),
            VesselStatus::EnRoute => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            VesselStatus::EnRoute => "en-route",
            VesselStatus::Approaching { .. } => "approaching",
            VesselStatus::Waiting { .. } => "waiting",
            VesselStatus::StallbackaWaiting => "stallbacka-waiting",
            VesselStatus::UnderBridge { .. } => "under-bridge",
            VesselStatus::Passed { .. } => "passed",
        }
    }
}

/// Why a vessel's target assignment is currently protected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtectionReason {
    /// Inside the 300 m protection zone of its target.
    ProtectionZone,
    /// Within the internal grace period after a passage.
    RecentPassage,
    /// GPS coordination hold.
    GpsHold,
}

/// Target/lifecycle protection record.
#[derive(Debug, Clone, Copy)]
pub struct Protection {
    pub reason: ProtectionReason,
    pub until: DateTime<Utc>,
    /// Vessel was close to its target when protection engaged.
    pub close_to_target: bool,
    /// A manoeuvre (big COG swing) was seen while protected.
    pub maneuver_detected: bool,
}

/// One SOG sample for the "has been moving toward" checks.
#[derive(Debug, Clone, Copy)]
pub struct SpeedSample {
    pub sog: f64,
    pub at: DateTime<Utc>,
}

const SPEED_HISTORY_LEN: usize = 10;
const POSITION_HISTORY_LEN: usize = 10;

/// Live state for one tracked vessel. Mutated only by the registry.
#[derive(Debug, Clone)]
pub struct Vessel {
    pub mmsi: String,
    pub ship_name: Option<String>,

    pub lat: f64,
    pub lon: f64,
    pub sog: f64,
    pub cog: Option<f64>,

    pub first_seen: DateTime<Utc>,
    /// Any accepted AIS frame, position change or not.
    pub last_message: DateTime<Utc>,
    /// Position changed at all.
    pub last_position_change: DateTime<Utc>,
    /// Position changed by at least 5 m.
    pub last_position_update: DateTime<Utc>,

    pub current_bridge: Option<BridgeId>,
    pub distance_to_current_m: Option<f64>,
    pub target_bridge: Option<BridgeId>,
    /// Previous target kept for hysteresis when re-evaluating assignment.
    pub last_target_for_hysteresis: Option<BridgeId>,

    pub status: Option<VesselStatus>,
    pub eta_minutes: Option<f64>,

    pub protection: Option<Protection>,

    /// Anchored crossing timestamps per bridge.
    pub passed_at: HashMap<BridgeId, DateTime<Utc>>,
    pub last_passed_bridge: Option<BridgeId>,
    pub last_passed_bridge_time: Option<DateTime<Utc>>,
    /// SOG at the most recent passage, for the internal grace window.
    pub last_passage_sog: f64,

    /// Under-bridge hysteresis latch.
    pub under_bridge_latched: bool,
    /// GPS-jump hold; passage detection and text publication gate on this.
    pub coordination_until: Option<DateTime<Utc>>,
    /// Consecutive identical statuses seen while position was uncertain.
    pub waiting_confirmations: u32,

    pub speed_history: VecDeque<SpeedSample>,
    /// Recent accepted positions, oldest first.
    pub position_history: VecDeque<(f64, f64, DateTime<Utc>)>,

    /// Last proximity analysis, for zone-transition detection.
    pub proximity: Option<ProximityData>,

    /// When the cleanup sweep may remove this vessel.
    pub cleanup_deadline: DateTime<Utc>,
}

impl Vessel {
    pub fn new(mmsi: String, lat: f64, lon: f64, sog: f64, cog: Option<f64>, now: DateTime<Utc>) -> Self {
        let mut speed_history = VecDeque::with_capacity(SPEED_HISTORY_LEN);
        speed_history.push_back(SpeedSample { sog, at: now });
        let mut position_history = VecDeque::with_capacity(POSITION_HISTORY_LEN);
        position_history.push_back((lat, lon, now));

        Self {
            mmsi,
            ship_name: None,
            lat,
            lon,
            sog,
            cog,
            first_seen: now,
            last_message: now,
            last_position_change: now,
            last_position_update: now,
            current_bridge: None,
            distance_to_current_m: None,
            target_bridge: None,
            last_target_for_hysteresis: None,
            status: None,
            eta_minutes: None,
            protection: None,
            passed_at: HashMap::new(),
            last_passed_bridge: None,
            last_passed_bridge_time: None,
            last_passage_sog: 0.0,
            under_bridge_latched: false,
            coordination_until: None,
            waiting_confirmations: 0,
            speed_history,
            position_history,
            proximity: None,
            cleanup_deadline: now + Duration::minutes(2),
        }
    }

    pub fn direction(&self) -> Direction {
        Direction::from_cog(self.cog)
    }

    /// Record an accepted position, maintaining the bounded histories.
    pub fn push_position(&mut self, lat: f64, lon: f64, now: DateTime<Utc>) {
        self.lat = lat;
        self.lon = lon;
        if self.position_history.len() >= POSITION_HISTORY_LEN {
            self.position_history.pop_front();
        }
        self.position_history.push_back((lat, lon, now));
    }

    pub fn push_speed(&mut self, sog: f64, now: DateTime<Utc>) {
        self.sog = sog;
        if self.speed_history.len() >= SPEED_HISTORY_LEN {
            self.speed_history.pop_front();
        }
        self.speed_history.push_back(SpeedSample { sog, at: now });
    }

    /// The position before the most recent one, if any.
    pub fn previous_position(&self) -> Option<(f64, f64, DateTime<Utc>)> {
        if self.position_history.len() >= 2 {
            self.position_history
                .iter()
                .rev()
                .nth(1)
                .copied()
        } else {
            None
        }
    }

    /// Closest recent approach to a bridge over the position history.
    pub fn min_recent_distance_to(&self, bridge_lat: f64, bridge_lon: f64) -> f64 {
        self.position_history
            .iter()
            .filter_map(|(lat, lon, _)| geometry::distance_m(*lat, *lon, bridge_lat, bridge_lon))
            .fold(f64::MAX, f64::min)
    }

    /// True if any recent SOG sample shows real movement.
    pub fn has_been_moving(&self, threshold_kn: f64) -> bool {
        self.speed_history.iter().any(|s| s.sog > threshold_kn)
    }

    /// True while the GPS-jump coordination hold is active.
    pub fn gps_hold_active(&self, now: DateTime<Utc>) -> bool {
        self.coordination_until.map(|t| now < t).unwrap_or(false)
    }

    /// Record an anchored passage. Caller has already checked the re-cross
    /// guard.
    pub fn record_passage(&mut self, bridge: BridgeId, at: DateTime<Utc>) {
        self.passed_at.insert(bridge, at);
        self.last_passed_bridge = Some(bridge);
        self.last_passed_bridge_time = Some(at);
        self.last_passage_sog = self.sog;
    }
}
