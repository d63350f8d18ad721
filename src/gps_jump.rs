//! Kinematic screening of incoming fixes.
//!
//! AIS positions jump by hundreds of metres when a transponder re-acquires
//! GPS. Each new fix is compared against the previous accepted one and
//! classified by whether the implied movement is physically plausible at the
//! vessel's speed over ground.

use chrono::{DateTime, Utc};

use crate::geometry;

const KNOTS_TO_MPS: f64 = 0.514444;
/// Multiplier on the SOG-implied distance before a jump is suspicious.
const PLAUSIBLE_TOLERANCE: f64 = 1.5;
/// Base GPS noise floor in metres, granted regardless of speed.
const POSITION_NOISE_FLOOR_M: f64 = 50.0;
/// Below this movement a fix is always acceptable.
const ALWAYS_ACCEPT_M: f64 = 100.0;
/// Above this movement an implausible fix is rejected outright.
const REJECT_THRESHOLD_M: f64 = 500.0;
/// Course change that counts as a deliberate manoeuvre.
const MANEUVER_COG_DELTA_DEG: f64 = 45.0;
/// SOG agreement required for a manoeuvre to be considered legitimate.
const MANEUVER_SOG_TOLERANCE_KN: f64 = 2.0;

/// What to do with the new coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JumpAction {
    /// Small movement or consistent with SOG.
    Accept,
    /// Medium jump or a legitimate direction change; use the position but
    /// flag it uncertain.
    AcceptWithCaution,
    /// Implausible; keep the previous coordinates.
    Reject,
}

/// Kinematic snapshot of the previous accepted fix.
#[derive(Debug, Clone, Copy)]
pub struct PreviousFix {
    pub lat: f64,
    pub lon: f64,
    pub sog: f64,
    pub cog: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

/// Full analysis result for one fix.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JumpAnalysis {
    pub action: JumpAction,
    pub gps_jump_detected: bool,
    pub position_uncertain: bool,
    /// 0.0–1.0; how much downstream logic should trust the new position.
    pub confidence: f64,
    pub movement_distance_m: f64,
}

impl JumpAnalysis {
    fn accept(movement: f64) -> Self {
        Self {
            action: JumpAction::Accept,
            gps_jump_detected: false,
            position_uncertain: false,
            confidence: 0.95,
            movement_distance_m: movement,
        }
    }
}

/// Classify a new fix against the previous accepted one.
///
/// The analyzer is stateless; the short per-vessel history it needs (one
/// previous fix) is owned by the vessel registry.
pub fn analyze(
    prev: &PreviousFix,
    new_lat: f64,
    new_lon: f64,
    new_sog: f64,
    new_cog: Option<f64>,
    now: DateTime<Utc>,
) -> JumpAnalysis {
    let movement = match geometry::distance_m(prev.lat, prev.lon, new_lat, new_lon) {
        Some(d) => d,
        None => {
            // Invalid coordinates never reach the registry's accept path.
            return JumpAnalysis {
                action: JumpAction::Reject,
                gps_jump_detected: true,
                position_uncertain: true,
                confidence: 0.0,
                movement_distance_m: f64::MAX,
            };
        }
    };

    let dt_secs = (now - prev.timestamp).num_milliseconds().max(0) as f64 / 1000.0;
    // Use the faster of the two SOG readings; a vessel that just accelerated
    // should not be penalised for the distance it legitimately covered.
    let sog_mps = prev.sog.max(new_sog) * KNOTS_TO_MPS;
    let plausible_m = sog_mps * dt_secs * PLAUSIBLE_TOLERANCE + POSITION_NOISE_FLOOR_M;
    let accept_threshold = plausible_m.max(ALWAYS_ACCEPT_M);

    if movement <= accept_threshold {
        return JumpAnalysis::accept(movement);
    }

    let legitimate_maneuver = match (prev.cog, new_cog) {
        (Some(a), Some(b)) => {
            geometry::angular_difference(a, b) >= MANEUVER_COG_DELTA_DEG
                && (prev.sog - new_sog).abs() <= MANEUVER_SOG_TOLERANCE_KN
        }
        _ => false,
    };

    if movement <= REJECT_THRESHOLD_M || legitimate_maneuver {
        return JumpAnalysis {
            action: JumpAction::AcceptWithCaution,
            gps_jump_detected: true,
            position_uncertain: true,
            confidence: 0.6,
            movement_distance_m: movement,
        };
    }

    JumpAnalysis {
        action: JumpAction::Reject,
        gps_jump_detected: true,
        position_uncertain: true,
        confidence: 0.2,
        movement_distance_m: movement,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    const M_PER_DEG_LAT: f64 = 111_200.0;

    fn prev_fix(sog: f64, cog: Option<f64>, now: DateTime<Utc>, age_secs: i64) -> PreviousFix {
        PreviousFix {
            lat: 58.2800,
            lon: 12.2850,
            sog,
            cog,
            timestamp: now - Duration::seconds(age_secs),
        }
    }

    fn moved_north(prev: &PreviousFix, metres: f64) -> (f64, f64) {
        (prev.lat + metres / M_PER_DEG_LAT, prev.lon)
    }

    #[test]
    fn test_small_movement_accepted() {
        let now = Utc::now();
        let prev = prev_fix(4.0, Some(10.0), now, 30);
        let (lat, lon) = moved_north(&prev, 60.0);
        let res = analyze(&prev, lat, lon, 4.0, Some(10.0), now);
        assert_eq!(res.action, JumpAction::Accept);
        assert!(!res.gps_jump_detected);
        assert!((res.movement_distance_m - 60.0).abs() < 5.0);
    }

    #[test]
    fn test_sog_consistent_long_gap_accepted() {
        // 10 kn for 120 s is ~617 m; with tolerance the jump is plausible.
        let now = Utc::now();
        let prev = prev_fix(10.0, Some(0.0), now, 120);
        let (lat, lon) = moved_north(&prev, 600.0);
        let res = analyze(&prev, lat, lon, 10.0, Some(0.0), now);
        assert_eq!(res.action, JumpAction::Accept);
    }

    #[test]
    fn test_medium_jump_accepted_with_caution() {
        // 300 m in 10 s at 2 kn is far beyond plausible but under the hard
        // reject threshold.
        let now = Utc::now();
        let prev = prev_fix(2.0, Some(0.0), now, 10);
        let (lat, lon) = moved_north(&prev, 300.0);
        let res = analyze(&prev, lat, lon, 2.0, Some(0.0), now);
        assert_eq!(res.action, JumpAction::AcceptWithCaution);
        assert!(res.gps_jump_detected);
        assert!(res.position_uncertain);
    }

    #[test]
    fn test_large_implausible_jump_rejected() {
        let now = Utc::now();
        let prev = prev_fix(1.0, Some(0.0), now, 15);
        let (lat, lon) = moved_north(&prev, 900.0);
        let res = analyze(&prev, lat, lon, 1.0, Some(0.0), now);
        assert_eq!(res.action, JumpAction::Reject);
        assert!(res.confidence < 0.5);
    }

    #[test]
    fn test_large_jump_with_maneuver_kept_with_caution() {
        // A turn through the bridge: big COG swing, SOG steady.
        let now = Utc::now();
        let prev = prev_fix(5.0, Some(10.0), now, 20);
        let (lat, lon) = moved_north(&prev, 700.0);
        let res = analyze(&prev, lat, lon, 5.5, Some(170.0), now);
        assert_eq!(res.action, JumpAction::AcceptWithCaution);
    }

    #[test]
    fn test_missing_cog_cannot_claim_maneuver() {
        let now = Utc::now();
        let prev = prev_fix(1.0, None, now, 15);
        let (lat, lon) = moved_north(&prev, 900.0);
        let res = analyze(&prev, lat, lon, 1.0, Some(170.0), now);
        assert_eq!(res.action, JumpAction::Reject);
    }

    #[test]
    fn test_zero_dt_does_not_panic_or_accept_jump() {
        let now = Utc::now();
        let prev = prev_fix(4.0, Some(0.0), now, 0);
        let (lat, lon) = moved_north(&prev, 400.0);
        let res = analyze(&prev, lat, lon, 4.0, Some(0.0), now);
        assert_eq!(res.action, JumpAction::AcceptWithCaution);
    }
}
