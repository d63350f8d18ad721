//! Status derivation from proximity data.
//!
//! Thresholds carry an intentional hysteresis so statuses do not flap at a
//! zone boundary: under-bridge sets at 50 m and clears at 70 m, waiting
//! clears at 320 m, approaching clears at 550 m.

use chrono::{DateTime, Utc};

use crate::bridges::{BridgeId, BridgeRegistry};
use crate::geometry;
use crate::proximity::{self, ProximityData};
use crate::vessel_tracker::passage_latch::PassageLatchService;
use crate::vessel_tracker::vessel_state::{Vessel, VesselStatus};
use crate::passage_window;

const WAITING_SET_M: f64 = 300.0;
const WAITING_CLEAR_M: f64 = 320.0;
const APPROACH_SET_M: f64 = 500.0;
const APPROACH_CLEAR_M: f64 = 550.0;
/// SOG at or below this counts as holding station at a bridge.
const WAITING_MAX_SOG_KN: f64 = 0.5;
/// SOG above this counts as "actually approaching" on its own.
const APPROACHING_MIN_SOG_KN: f64 = 2.0;
/// Minimum distance decrease between fixes to count as closing in.
const CLOSING_MIN_M: f64 = 5.0;

/// Derive the raw (unstabilised) status for a vessel.
///
/// The passage latch is consulted so a bridge that was just passed cannot
/// immediately re-enter waiting/under-bridge for the same vessel.
pub fn derive(
    vessel: &Vessel,
    prox: &ProximityData,
    registry: &BridgeRegistry,
    latch: &PassageLatchService,
    now: DateTime<Utc>,
) -> Option<VesselStatus> {
    let nearest = prox.nearest();

    // Under the span wins over everything, with the 50/70 m latch.
    let under_distance = if vessel.under_bridge_latched {
        proximity::UNDER_BRIDGE_CLEAR_M
    } else {
        proximity::UNDER_BRIDGE_SET_M
    };
    if nearest.distance_m <= under_distance && !latch.blocked(&vessel.mmsi, nearest.bridge, now) {
        return Some(VesselStatus::UnderBridge {
            bridge: nearest.bridge,
        });
    }

    // Freshly anchored passage renders as "passed" for the display window.
    if let (Some(bridge), Some(at)) = (vessel.last_passed_bridge, vessel.last_passed_bridge_time)
        && passage_window::should_show_recently_passed(at, now)
    {
        return Some(VesselStatus::Passed { bridge });
    }

    // Stallbackabron never opens: inside its protection ring the vessel is
    // "about to pass under", not waiting for an opening.
    if prox.distance_to(BridgeId::Stallbackabron) <= WAITING_SET_M
        && nearest.bridge == BridgeId::Stallbackabron
    {
        return Some(VesselStatus::StallbackaWaiting);
    }

    // Waiting at the target bridge.
    if let Some(target) = vessel.target_bridge {
        let d = prox.distance_to(target);
        let waiting_limit = if matches!(vessel.status, Some(VesselStatus::Waiting { bridge }) if bridge == target)
        {
            WAITING_CLEAR_M
        } else {
            WAITING_SET_M
        };
        if d <= waiting_limit
            && vessel.sog <= WAITING_MAX_SOG_KN
            && !latch.blocked(&vessel.mmsi, target, now)
        {
            return Some(VesselStatus::Waiting { bridge: target });
        }
    }

    // Waiting at an intermediate bridge (target or not, but never the
    // special bridge, which was handled above).
    if nearest.distance_m <= WAITING_SET_M
        && vessel.sog <= WAITING_MAX_SOG_KN
        && !registry.is_target(nearest.bridge)
        && !registry.is_special(nearest.bridge)
        && !latch.blocked(&vessel.mmsi, nearest.bridge, now)
    {
        return Some(VesselStatus::Waiting {
            bridge: nearest.bridge,
        });
    }

    // Approaching the target.
    if let Some(target) = vessel.target_bridge {
        let d = prox.distance_to(target);
        let approach_limit = if matches!(vessel.status, Some(VesselStatus::Approaching { bridge }) if bridge == target)
        {
            APPROACH_CLEAR_M
        } else {
            APPROACH_SET_M
        };
        if d <= approach_limit && actually_approaching(vessel, target, registry) {
            return Some(VesselStatus::Approaching { bridge: target });
        }
    }

    if vessel.target_bridge.is_some() {
        return Some(VesselStatus::EnRoute);
    }

    None
}

/// Three-method check that a vessel is really closing in on a bridge and
/// not just drifting inside the ring: heading toward it, distance
/// decreasing, or carrying real speed.
fn actually_approaching(vessel: &Vessel, bridge: BridgeId, registry: &BridgeRegistry) -> bool {
    let b = registry.get(bridge);

    // Method 1: COG within ±90° of the bearing to the bridge.
    if let Some(cog) = vessel.cog
        && let Some(brg) = geometry::bearing_deg(vessel.lat, vessel.lon, b.lat, b.lon)
        && geometry::angular_difference(cog, brg) <= 90.0
    {
        return true;
    }

    // Method 2: distance shrank by at least 5 m since the previous fix.
    if let Some((prev_lat, prev_lon, _)) = vessel.previous_position()
        && let (Some(prev_d), Some(cur_d)) = (
            geometry::distance_m(prev_lat, prev_lon, b.lat, b.lon),
            geometry::distance_m(vessel.lat, vessel.lon, b.lat, b.lon),
        )
        && prev_d - cur_d >= CLOSING_MIN_M
    {
        return true;
    }

    // Method 3: moving fast enough that intent is unambiguous.
    vessel.sog > APPROACHING_MIN_SOG_KN
}
