//! Per-fix proximity analysis against the bridge chain.
//!
//! For each accepted fix this computes the distance and bearing to every
//! bridge, the nearest bridge, the canonical zone per bridge, and the zone
//! transitions since the previous fix. Zone boundaries: 500 m approach,
//! 300 m protection, 50 m under-bridge with a 70 m clear (20 m hysteresis
//! so a vessel holding station at the span does not flap).

use crate::bridges::{BridgeId, BridgeRegistry};
use crate::geometry;

pub const APPROACH_RADIUS_M: f64 = 500.0;
pub const PROTECTION_RADIUS_M: f64 = 300.0;
pub const UNDER_BRIDGE_SET_M: f64 = 50.0;
pub const UNDER_BRIDGE_CLEAR_M: f64 = 70.0;

/// Which ring of a bridge a vessel is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Zone {
    Outside,
    /// Within 500 m.
    Approach,
    /// Within 300 m.
    Protection,
    /// Within 50 m (clears at 70 m).
    UnderBridge,
}

/// Distance and bearing to one bridge, plus the zone the vessel is in.
#[derive(Debug, Clone, Copy)]
pub struct BridgeProximity {
    pub bridge: BridgeId,
    pub distance_m: f64,
    /// Bearing from the bridge to the vessel, degrees.
    pub bearing_from_bridge_deg: f64,
    pub zone: Zone,
}

/// A zone boundary crossing observed between two consecutive fixes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZoneTransition {
    pub bridge: BridgeId,
    pub from: Zone,
    pub to: Zone,
}

/// Result of analysing one fix.
#[derive(Debug, Clone)]
pub struct ProximityData {
    /// One entry per bridge, sorted by ascending distance.
    pub by_distance: Vec<BridgeProximity>,
    /// Transitions relative to the previous analysis, if one was given.
    pub transitions: Vec<ZoneTransition>,
}

impl ProximityData {
    pub fn nearest(&self) -> &BridgeProximity {
        // by_distance always has five entries.
        &self.by_distance[0]
    }

    pub fn for_bridge(&self, id: BridgeId) -> &BridgeProximity {
        self.by_distance
            .iter()
            .find(|p| p.bridge == id)
            .expect("all bridges present in proximity data")
    }

    pub fn distance_to(&self, id: BridgeId) -> f64 {
        self.for_bridge(id).distance_m
    }

    pub fn zone_of(&self, id: BridgeId) -> Zone {
        self.for_bridge(id).zone
    }
}

fn zone_for(distance_m: f64, previous: Option<Zone>) -> Zone {
    if distance_m <= UNDER_BRIDGE_SET_M {
        return Zone::UnderBridge;
    }
    // Hysteresis: once under the span, stay "under" until clear of 70 m.
    if previous == Some(Zone::UnderBridge) && distance_m <= UNDER_BRIDGE_CLEAR_M {
        return Zone::UnderBridge;
    }
    if distance_m <= PROTECTION_RADIUS_M {
        Zone::Protection
    } else if distance_m <= APPROACH_RADIUS_M {
        Zone::Approach
    } else {
        Zone::Outside
    }
}

/// Analyse one fix against every bridge.
///
/// Returns `None` when the coordinates are invalid (callers drop the fix
/// before mutating any state).
pub fn analyze(
    registry: &BridgeRegistry,
    lat: f64,
    lon: f64,
    previous: Option<&ProximityData>,
) -> Option<ProximityData> {
    let mut by_distance = Vec::with_capacity(5);
    let mut transitions = Vec::new();

    for bridge in registry.in_order() {
        let distance_m = geometry::distance_m(lat, lon, bridge.lat, bridge.lon)?;
        let bearing_from_bridge_deg = geometry::bearing_deg(bridge.lat, bridge.lon, lat, lon)?;
        let prev_zone = previous.map(|p| p.zone_of(bridge.id));
        let zone = zone_for(distance_m, prev_zone);

        if let Some(from) = prev_zone
            && from != zone
        {
            transitions.push(ZoneTransition {
                bridge: bridge.id,
                from,
                to: zone,
            });
        }

        by_distance.push(BridgeProximity {
            bridge: bridge.id,
            distance_m,
            bearing_from_bridge_deg,
            zone,
        });
    }

    by_distance.sort_by(|a, b| a.distance_m.total_cmp(&b.distance_m));

    Some(ProximityData {
        by_distance,
        transitions,
    })
}
