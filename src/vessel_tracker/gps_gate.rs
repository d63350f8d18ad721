//! Passage gating during GPS coordination.
//!
//! While a vessel's fixes are flagged uncertain, a detected passage is not
//! committed immediately. The candidate is parked and only confirmed once
//! the track has been stable (position, SOG, COG within tolerance) for five
//! seconds. Candidates that never stabilise are discarded after a hard
//! 30 s timeout so nothing can get stuck.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;

use crate::bridges::BridgeId;
use crate::geometry;

/// Seconds of stability required to confirm a held passage.
const CONFIRM_AFTER_SECS: i64 = 5;
/// Hard timeout for a held candidate.
const CANDIDATE_TTL_SECS: i64 = 30;
/// Stability tolerances between consecutive fixes.
const STABLE_POSITION_M: f64 = 30.0;
const STABLE_SOG_KN: f64 = 2.0;
const STABLE_COG_DEG: f64 = 30.0;

/// A passage waiting for the track to settle.
#[derive(Debug, Clone)]
pub struct HeldPassage {
    pub bridge: BridgeId,
    pub detected_at: DateTime<Utc>,
    /// Time of the crossing itself, anchored when the candidate is confirmed.
    pub crossing_time: DateTime<Utc>,
    since_stable: DateTime<Utc>,
    last_lat: f64,
    last_lon: f64,
    last_sog: f64,
    last_cog: Option<f64>,
}

/// Outcome of feeding a new fix to the gate.
#[derive(Debug, Clone, PartialEq)]
pub enum GateOutcome {
    /// No candidate held for this vessel.
    Idle,
    /// Candidate still held, waiting for stability.
    Holding,
    /// Stability reached: commit this passage.
    Confirmed { bridge: BridgeId, crossing_time: DateTime<Utc> },
    /// Candidate discarded (timeout).
    Discarded { bridge: BridgeId },
}

#[derive(Debug, Default)]
pub struct GpsJumpGateService {
    held: HashMap<String, HeldPassage>,
}

impl GpsJumpGateService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Park a passage candidate detected while GPS coordination is active.
    /// A newer candidate for the same vessel replaces the old one.
    #[allow(clippy::too_many_arguments)]
    pub fn hold(
        &mut self,
        mmsi: &str,
        bridge: BridgeId,
        crossing_time: DateTime<Utc>,
        lat: f64,
        lon: f64,
        sog: f64,
        cog: Option<f64>,
        now: DateTime<Utc>,
    ) {
        self.held.insert(
            mmsi.to_string(),
            HeldPassage {
                bridge,
                detected_at: now,
                crossing_time,
                since_stable: now,
                last_lat: lat,
                last_lon: lon,
                last_sog: sog,
                last_cog: cog,
            },
        );
    }

    pub fn has_candidate(&self, mmsi: &str) -> bool {
        self.held.contains_key(mmsi)
    }

    /// Feed the next fix for a vessel and decide the candidate's fate.
    pub fn observe(
        &mut self,
        mmsi: &str,
        lat: f64,
        lon: f64,
        sog: f64,
        cog: Option<f64>,
        now: DateTime<Utc>,
    ) -> GateOutcome {
        let Some(held) = self.held.get_mut(mmsi) else {
            return GateOutcome::Idle;
        };

        if now - held.detected_at > Duration::seconds(CANDIDATE_TTL_SECS) {
            let bridge = held.bridge;
            self.held.remove(mmsi);
            return GateOutcome::Discarded { bridge };
        }

        let stable = geometry::distance_m(held.last_lat, held.last_lon, lat, lon)
            .map(|d| d <= STABLE_POSITION_M)
            .unwrap_or(false)
            && (held.last_sog - sog).abs() <= STABLE_SOG_KN
            && match (held.last_cog, cog) {
                (Some(a), Some(b)) => geometry::angular_difference(a, b) <= STABLE_COG_DEG,
                (None, None) => true,
                _ => false,
            };

        if !stable {
            // Restart the stability clock from this fix.
            held.since_stable = now;
        }

        held.last_lat = lat;
        held.last_lon = lon;
        held.last_sog = sog;
        held.last_cog = cog;

        if stable && now - held.since_stable >= Duration::seconds(CONFIRM_AFTER_SECS) {
            let confirmed = self.held.remove(mmsi).expect("candidate present");
            return GateOutcome::Confirmed {
                bridge: confirmed.bridge,
                crossing_time: confirmed.crossing_time,
            };
        }

        GateOutcome::Holding
    }

    /// Expire stale candidates without a fresh fix. Returns the discarded
    /// bridges for logging.
    pub fn sweep(&mut self, now: DateTime<Utc>) -> Vec<(String, BridgeId)> {
        let mut discarded = Vec::new();
        self.held.retain(|mmsi, held| {
            if now - held.detected_at > Duration::seconds(CANDIDATE_TTL_SECS) {
                discarded.push((mmsi.clone(), held.bridge));
                false
            } else {
                true
            }
        });
        discarded
    }

    pub fn remove_vessel(&mut self, mmsi: &str) {
        self.held.remove(mmsi);
    }
}
