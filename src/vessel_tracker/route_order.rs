//! Geographic sanity check on passage sequences.
//!
//! A vessel travelling the canal crosses bridges in chain order. A reported
//! passage that skips backwards is almost always a GPS artefact, so it is
//! rejected unless an exception applies: a long gap since the previous
//! passage, a confirmed direction reversal, or the special bridge (whose
//! wide span produces out-of-order detections legitimately).

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;

use crate::bridges::{BridgeId, BridgeRegistry};
use crate::vessel_tracker::vessel_state::Direction;

/// Passages per vessel kept for validation.
const HISTORY_LEN: usize = 10;
/// A gap longer than this makes any sequence plausible again.
const SEQUENCE_GAP_MINS: i64 = 10;

#[derive(Debug, Clone, Copy)]
struct PassageRecord {
    bridge: BridgeId,
    at: DateTime<Utc>,
    direction: Direction,
}

/// Why a passage was accepted or rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteVerdict {
    Valid,
    /// First recorded passage for the vessel.
    FirstPassage,
    /// Accepted because more than 10 minutes passed since the last one.
    AcceptedAfterGap,
    /// Accepted because the vessel demonstrably turned around.
    AcceptedReversal,
    /// Accepted because the special bridge is exempt.
    AcceptedSpecial,
    /// Geographically impossible; drop the passage.
    Rejected,
}

impl RouteVerdict {
    pub fn accepted(&self) -> bool {
        *self != RouteVerdict::Rejected
    }
}

#[derive(Debug, Default)]
pub struct RouteOrderValidator {
    history: HashMap<String, Vec<PassageRecord>>,
}

impl RouteOrderValidator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate a candidate passage and, if accepted, record it.
    pub fn validate_and_record(
        &mut self,
        registry: &BridgeRegistry,
        mmsi: &str,
        bridge: BridgeId,
        direction: Direction,
        at: DateTime<Utc>,
    ) -> RouteVerdict {
        let verdict = self.validate(registry, mmsi, bridge, direction, at);
        if verdict.accepted() {
            let records = self.history.entry(mmsi.to_string()).or_default();
            if records.len() >= HISTORY_LEN {
                records.remove(0);
            }
            records.push(PassageRecord {
                bridge,
                at,
                direction,
            });
        }
        verdict
    }

    fn validate(
        &self,
        registry: &BridgeRegistry,
        mmsi: &str,
        bridge: BridgeId,
        direction: Direction,
        at: DateTime<Utc>,
    ) -> RouteVerdict {
        let Some(last) = self.history.get(mmsi).and_then(|h| h.last()) else {
            return RouteVerdict::FirstPassage;
        };

        // Sequence check: the new bridge must lie on the travelling side of
        // the last one.
        let in_order = match direction {
            Direction::Northbound => registry.is_north_of(bridge, last.bridge),
            Direction::Southbound => registry.is_north_of(last.bridge, bridge),
            // Unknown direction: infer from the last two passages instead.
            Direction::Unknown => bridge != last.bridge,
        };
        if in_order {
            return RouteVerdict::Valid;
        }

        if at - last.at > Duration::minutes(SEQUENCE_GAP_MINS) {
            return RouteVerdict::AcceptedAfterGap;
        }

        // Confirmed reversal: the direction at this passage is opposite to
        // the direction recorded at the previous one.
        let reversed = matches!(
            (last.direction, direction),
            (Direction::Northbound, Direction::Southbound)
                | (Direction::Southbound, Direction::Northbound)
        );
        if reversed && bridge == last.bridge {
            return RouteVerdict::AcceptedReversal;
        }

        if registry.is_special(bridge) || registry.is_special(last.bridge) {
            return RouteVerdict::AcceptedSpecial;
        }

        RouteVerdict::Rejected
    }

    pub fn remove_vessel(&mut self, mmsi: &str) {
        self.history.remove(mmsi);
    }

    #[cfg(test)]
    fn history_len(&self, mmsi: &str) -> usize {
        self.history.get(mmsi).map(|h| h.len()).unwrap_or(0)
    }
}
