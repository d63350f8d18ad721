//! Proximity flow layer: "boat near bridge" triggers and the
//! "any boat at bridge" condition.
//!
//! Consumes registry events, tokenises them for the host flow cards, and
//! deduplicates per (vessel, bridge) so a boat loitering at the 300 m line
//! does not fire the same automation every few seconds.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use tracing::debug;

use crate::bridges::{BridgeId, BridgeRegistry};
use crate::geometry;
use crate::host::BoatNearTokens;
use crate::proximity::PROTECTION_RADIUS_M;
use crate::vessel_tracker::{VesselEvent, VesselView};

/// One trigger per (vessel, bridge) within this window.
const DEDUP_WINDOW_MINS: i64 = 10;

#[derive(Debug, Default)]
pub struct ProximityEventService {
    emitted: HashMap<(String, BridgeId), DateTime<Utc>>,
}

impl ProximityEventService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Turn registry events into deduplicated `boat_near` triggers. Events
    /// that cannot be tokenised (no ship name) are skipped, not failed.
    pub fn collect_triggers(
        &mut self,
        events: &[VesselEvent],
        snapshot: &[VesselView],
        registry: &BridgeRegistry,
        now: DateTime<Utc>,
    ) -> Vec<(BoatNearTokens, BridgeId)> {
        let mut triggers = Vec::new();
        for event in events {
            let VesselEvent::ProtectionZoneEntered { mmsi, bridge } = event else {
                continue;
            };

            if let Some(at) = self.emitted.get(&(mmsi.clone(), *bridge))
                && now - *at < Duration::minutes(DEDUP_WINDOW_MINS)
            {
                debug!(mmsi, bridge = %bridge, "boat_near suppressed by dedup window");
                continue;
            }

            let Some(view) = snapshot.iter().find(|v| &v.mmsi == mmsi) else {
                continue;
            };
            let Some(tokens) = tokenize(view, *bridge, registry) else {
                debug!(mmsi, bridge = %bridge, "boat_near skipped: not tokenisable");
                continue;
            };

            self.emitted.insert((mmsi.clone(), *bridge), now);
            metrics::counter!("brovakt_boat_near_triggers_total").increment(1);
            triggers.push((tokens, *bridge));
        }
        triggers
    }

    /// Drop dedup entries past the window, and all entries for removed
    /// vessels.
    pub fn cleanup(&mut self, events: &[VesselEvent], now: DateTime<Utc>) {
        for event in events {
            if let VesselEvent::Removed { mmsi, .. } = event {
                self.emitted.retain(|(m, _), _| m != mmsi);
            }
        }
        self.emitted
            .retain(|_, at| now - *at < Duration::minutes(DEDUP_WINDOW_MINS));
    }
}

/// Flow condition: any relevant vessel within 300 m of the bridge.
pub fn boat_at_bridge(snapshot: &[VesselView], bridge: BridgeId, registry: &BridgeRegistry) -> bool {
    let b = registry.get(bridge);
    snapshot.iter().any(|v| {
        geometry::distance_m(v.lat, v.lon, b.lat, b.lon)
            .map(|d| d <= PROTECTION_RADIUS_M)
            .unwrap_or(false)
    })
}

/// Build the flow tokens for a vessel entering a bridge zone. `None` when
/// the mandatory name token cannot be produced.
fn tokenize(
    view: &VesselView,
    bridge: BridgeId,
    registry: &BridgeRegistry,
) -> Option<BoatNearTokens> {
    let vessel_name = normalize_name(view.ship_name.as_deref()?)?;
    let eta_minutes = view
        .eta_minutes
        .filter(|e| e.is_finite() && *e >= 0.0)
        .map(|e| e.round() as i64)
        .unwrap_or(-1);
    Some(BoatNearTokens {
        vessel_name,
        bridge_name: registry.get(bridge).name.to_string(),
        direction: view.direction.as_token(),
        eta_minutes,
    })
}

/// Collapse whitespace and trim; empty names are invalid.
fn normalize_name(raw: &str) -> Option<String> {
    let name = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    if name.is_empty() { None } else { Some(name) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vessel_tracker::Direction;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    fn view(mmsi: &str, name: Option<&str>) -> VesselView {
        let reg = BridgeRegistry::new();
        let b = reg.get(BridgeId::Klaffbron);
        VesselView {
            mmsi: mmsi.to_string(),
            ship_name: name.map(|s| s.to_string()),
            lat: b.lat - 0.002,
            lon: b.lon,
            status: None,
            target_bridge: Some(BridgeId::Klaffbron),
            current_bridge: Some(BridgeId::Klaffbron),
            distance_to_current_m: Some(220.0),
            eta_minutes: Some(5.4),
            direction: Direction::Northbound,
            last_passed: None,
            gps_hold: false,
            sog: 3.0,
        }
    }

    fn entered(mmsi: &str) -> VesselEvent {
        VesselEvent::ProtectionZoneEntered {
            mmsi: mmsi.to_string(),
            bridge: BridgeId::Klaffbron,
        }
    }

    #[test]
    fn test_trigger_tokenised() {
        let mut service = ProximityEventService::new();
        let reg = BridgeRegistry::new();
        let snapshot = vec![view("265000001", Some("  M/S   Juno "))];
        let triggers =
            service.collect_triggers(&[entered("265000001")], &snapshot, &reg, t0());
        assert_eq!(triggers.len(), 1);
        let (tokens, bridge) = &triggers[0];
        assert_eq!(tokens.vessel_name, "M/S Juno", "name is normalised");
        assert_eq!(tokens.bridge_name, "Klaffbron");
        assert_eq!(tokens.direction, "northbound");
        assert_eq!(tokens.eta_minutes, 5);
        assert_eq!(*bridge, BridgeId::Klaffbron);
    }

    #[test]
    fn test_unnamed_vessel_skipped() {
        let mut service = ProximityEventService::new();
        let reg = BridgeRegistry::new();
        let snapshot = vec![view("265000001", None)];
        let triggers =
            service.collect_triggers(&[entered("265000001")], &snapshot, &reg, t0());
        assert!(triggers.is_empty(), "untokenisable event is skipped");
    }

    #[test]
    fn test_missing_eta_uses_sentinel() {
        let mut service = ProximityEventService::new();
        let reg = BridgeRegistry::new();
        let mut v = view("265000001", Some("Juno"));
        v.eta_minutes = None;
        let triggers = service.collect_triggers(&[entered("265000001")], &[v], &reg, t0());
        assert_eq!(triggers[0].0.eta_minutes, -1);
    }

    #[test]
    fn test_dedup_window() {
        let mut service = ProximityEventService::new();
        let reg = BridgeRegistry::new();
        let snapshot = vec![view("265000001", Some("Juno"))];

        let first = service.collect_triggers(&[entered("265000001")], &snapshot, &reg, t0());
        assert_eq!(first.len(), 1);

        // Re-entering the zone five minutes later stays silent.
        let again = service.collect_triggers(
            &[entered("265000001")],
            &snapshot,
            &reg,
            t0() + Duration::minutes(5),
        );
        assert!(again.is_empty());

        // Past the window the trigger fires again.
        let later = service.collect_triggers(
            &[entered("265000001")],
            &snapshot,
            &reg,
            t0() + Duration::minutes(11),
        );
        assert_eq!(later.len(), 1);
    }

    #[test]
    fn test_different_bridge_not_deduped() {
        let mut service = ProximityEventService::new();
        let reg = BridgeRegistry::new();
        let snapshot = vec![view("265000001", Some("Juno"))];
        service.collect_triggers(&[entered("265000001")], &snapshot, &reg, t0());

        let other = VesselEvent::ProtectionZoneEntered {
            mmsi: "265000001".into(),
            bridge: BridgeId::Stridsbergsbron,
        };
        let triggers = service.collect_triggers(&[other], &snapshot, &reg, t0());
        assert_eq!(triggers.len(), 1);
        assert_eq!(triggers[0].0.bridge_name, "Stridsbergsbron");
    }

    #[test]
    fn test_boat_at_bridge_condition() {
        let reg = BridgeRegistry::new();
        let snapshot = vec![view("265000001", Some("Juno"))];
        assert!(boat_at_bridge(&snapshot, BridgeId::Klaffbron, &reg));
        assert!(!boat_at_bridge(&snapshot, BridgeId::Stridsbergsbron, &reg));
        assert!(!boat_at_bridge(&[], BridgeId::Klaffbron, &reg));
    }

    #[test]
    fn test_cleanup_on_removal() {
        let mut service = ProximityEventService::new();
        let reg = BridgeRegistry::new();
        let snapshot = vec![view("265000001", Some("Juno"))];
        service.collect_triggers(&[entered("265000001")], &snapshot, &reg, t0());

        service.cleanup(
            &[VesselEvent::Removed {
                mmsi: "265000001".into(),
                reason: crate::vessel_tracker::RemovalReason::Stale,
            }],
            t0(),
        );
        // Dedup state cleared: the trigger can fire again immediately.
        let triggers = service.collect_triggers(&[entered("265000001")], &snapshot, &reg, t0());
        assert_eq!(triggers.len(), 1);
    }
}
