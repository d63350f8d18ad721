//! Per-(vessel, bridge) passage latch.
//!
//! After "passed" is emitted for a bridge, the same vessel must not flip
//! back to under-bridge or waiting for that bridge while the passage is
//! still on display. A GPS wobble right after the crossing would otherwise
//! produce "Broöppning pågår" seconds after "har precis passerat".

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;

use crate::bridges::BridgeId;
use crate::passage_window;

/// Latches older than this are orphans (vessel left, event never cleared).
const ORPHAN_TTL_SECS: i64 = 300;

#[derive(Debug, Default)]
pub struct PassageLatchService {
    latches: HashMap<(String, BridgeId), DateTime<Utc>>,
}

impl PassageLatchService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm the latch for a vessel/bridge pair at passage time.
    pub fn latch(&mut self, mmsi: &str, bridge: BridgeId, at: DateTime<Utc>) {
        self.latches.insert((mmsi.to_string(), bridge), at);
    }

    /// True while under-bridge / waiting must be suppressed for this pair.
    pub fn blocked(&self, mmsi: &str, bridge: BridgeId, now: DateTime<Utc>) -> bool {
        self.latches
            .get(&(mmsi.to_string(), bridge))
            .map(|at| passage_window::should_show_recently_passed(*at, now))
            .unwrap_or(false)
    }

    /// Drop expired and orphaned latches. Runs from the registry sweep.
    pub fn cleanup(&mut self, now: DateTime<Utc>) {
        let ttl = Duration::seconds(ORPHAN_TTL_SECS);
        self.latches.retain(|_, at| now - *at < ttl);
    }

    /// Forget every latch for a removed vessel.
    pub fn remove_vessel(&mut self, mmsi: &str) {
        self.latches.retain(|(m, _), _| m != mmsi);
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.latches.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_blocks_for_display_window() {
        let mut latch = PassageLatchService::new();
        latch.latch("m", BridgeId::Klaffbron, t0());
        assert!(latch.blocked("m", BridgeId::Klaffbron, t0() + Duration::seconds(30)));
        assert!(!latch.blocked("m", BridgeId::Klaffbron, t0() + Duration::seconds(61)));
    }

    #[test]
    fn test_other_bridge_and_vessel_unaffected() {
        let mut latch = PassageLatchService::new();
        latch.latch("m", BridgeId::Klaffbron, t0());
        assert!(!latch.blocked("m", BridgeId::Stridsbergsbron, t0()));
        assert!(!latch.blocked("other", BridgeId::Klaffbron, t0()));
    }

    #[test]
    fn test_orphan_cleanup_after_five_minutes() {
        let mut latch = PassageLatchService::new();
        latch.latch("m", BridgeId::Klaffbron, t0());
        latch.cleanup(t0() + Duration::seconds(299));
        assert_eq!(latch.len(), 1);
        latch.cleanup(t0() + Duration::seconds(301));
        assert_eq!(latch.len(), 0);
    }

    #[test]
    fn test_remove_vessel_clears_all_its_latches() {
        let mut latch = PassageLatchService::new();
        latch.latch("m", BridgeId::Klaffbron, t0());
        latch.latch("m", BridgeId::Stridsbergsbron, t0());
        latch.latch("n", BridgeId::Klaffbron, t0());
        latch.remove_vessel("m");
        assert_eq!(latch.len(), 1);
        assert!(latch.blocked("n", BridgeId::Klaffbron, t0()));
    }
}
