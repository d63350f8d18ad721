//! Vessel registry: single-writer owner of all live vessel state.
//!
//! Every accepted fix flows through [`VesselRegistry::handle_fix`], which
//! runs the kinematic screen, proximity analysis, passage detection, target
//! assignment, status derivation and ETA smoothing, and returns the events
//! the publication layer reacts to. A periodic [`VesselRegistry::sweep`]
//! enforces the lifecycle deadlines; there are no per-vessel timers.

pub mod gps_gate;
pub mod passage_latch;
pub mod route_order;
pub mod stabilizer;
pub mod status;
pub mod vessel_state;

pub use vessel_state::{Direction, Protection, ProtectionReason, Vessel, VesselStatus};

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use tracing::{debug, info, warn};

use crate::bridges::{BridgeId, BridgeRegistry};
use crate::config::{CANAL_BBOX_NW, CANAL_BBOX_SE};
use crate::eta::ProgressiveEtaCalculator;
use crate::fixes::VesselFix;
use crate::geometry::{self, PassageContext};
use crate::gps_jump::{self, JumpAction, PreviousFix};
use crate::proximity::{self, Zone};
use gps_gate::{GateOutcome, GpsJumpGateService};
use passage_latch::PassageLatchService;
use route_order::RouteOrderValidator;
use stabilizer::{SignalFlags, StatusStabilizer};

/// Position delta under which `lastPositionUpdate` is not advanced.
const SIGNIFICANT_MOVE_M: f64 = 5.0;
/// A fix gap longer than this counts as sparse AIS for passage detection.
const SPARSE_AIS_SECS: i64 = 30;
/// Course swing that counts as an active manoeuvre.
const MANEUVER_COG_DEG: f64 = 45.0;
/// How long a GPS hold gates passage commits and text publication.
const GPS_HOLD_SECS: i64 = 10;
/// Re-cross guard: one anchored passage per bridge per three minutes.
const PASSAGE_RECROSS_GUARD_SECS: i64 = 180;
/// Jump size that resets hysteresis latches outright.
const LATCH_RESET_JUMP_M: f64 = 500.0;

/// Cleanup deadlines by situation.
const CLEANUP_PROTECTED_MINS: i64 = 20;
const CLEANUP_STATIONARY_MINS: i64 = 2;
const CLEANUP_MOVING_MINS: i64 = 15;
/// Absolute cap: no AIS frame for this long forces removal.
const DEAD_AIS_MINS: i64 = 30;

/// Speed gates for target acquisition (knots).
const ACQUIRE_MIN_SOG_NEAR_KN: f64 = 0.1;
const ACQUIRE_MIN_SOG_FAR_KN: f64 = 0.7;
const ACQUIRE_STALLED_SOG_KN: f64 = 0.3;
/// Two-reading validation: metres the vessel must have closed on a
/// prospective target before it can be acquired.
const ACQUIRE_MIN_PROGRESS_M: f64 = 10.0;

/// Why a vessel left the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalReason {
    /// Lifecycle deadline expired.
    Stale,
    /// No AIS frame at all for 30 minutes.
    DeadAis,
    /// Passed the last target bridge in its travel direction.
    JourneyCompleted,
}

impl RemovalReason {
    pub fn label(&self) -> &'static str {
        match self {
            RemovalReason::Stale => "stale",
            RemovalReason::DeadAis => "dead-ais",
            RemovalReason::JourneyCompleted => "journey-completed",
        }
    }
}

/// State-change notifications consumed by the coalescer and the flow layer.
#[derive(Debug, Clone, PartialEq)]
pub enum VesselEvent {
    Entered {
        mmsi: String,
    },
    Updated {
        mmsi: String,
    },
    StatusChanged {
        mmsi: String,
        from: Option<VesselStatus>,
        to: Option<VesselStatus>,
    },
    Removed {
        mmsi: String,
        reason: RemovalReason,
    },
    GpsJumpDetected {
        mmsi: String,
        distance_m: f64,
    },
    GpsHoldSet {
        mmsi: String,
        until: DateTime<Utc>,
    },
    PassageAnchored {
        mmsi: String,
        bridge: BridgeId,
        at: DateTime<Utc>,
    },
    /// Vessel crossed into a bridge's 300 m ring.
    ProtectionZoneEntered {
        mmsi: String,
        bridge: BridgeId,
    },
}

/// Read-only snapshot of one vessel, handed to the text and flow layers.
#[derive(Debug, Clone)]
pub struct VesselView {
    pub mmsi: String,
    pub ship_name: Option<String>,
    pub lat: f64,
    pub lon: f64,
    pub status: Option<VesselStatus>,
    pub target_bridge: Option<BridgeId>,
    pub current_bridge: Option<BridgeId>,
    pub distance_to_current_m: Option<f64>,
    pub eta_minutes: Option<f64>,
    pub direction: Direction,
    pub last_passed: Option<(BridgeId, DateTime<Utc>)>,
    pub gps_hold: bool,
    pub sog: f64,
}

/// Owner of the vessel map and of the sibling tracking services.
pub struct VesselRegistry {
    bridges: BridgeRegistry,
    vessels: HashMap<String, Vessel>,
    stabilizer: StatusStabilizer,
    latch: PassageLatchService,
    route_validator: RouteOrderValidator,
    gate: GpsJumpGateService,
    eta: ProgressiveEtaCalculator,
}

impl Default for VesselRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl VesselRegistry {
    pub fn new() -> Self {
        Self {
            bridges: BridgeRegistry::new(),
            vessels: HashMap::new(),
            stabilizer: StatusStabilizer::new(),
            latch: PassageLatchService::new(),
            route_validator: RouteOrderValidator::new(),
            gate: GpsJumpGateService::new(),
            eta: ProgressiveEtaCalculator::new(),
        }
    }

    pub fn bridges(&self) -> &BridgeRegistry {
        &self.bridges
    }

    pub fn len(&self) -> usize {
        self.vessels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vessels.is_empty()
    }

    pub fn vessel(&self, mmsi: &str) -> Option<&Vessel> {
        self.vessels.get(mmsi)
    }

    /// Apply one accepted fix. Returns the events this mutation produced, in
    /// emission order (Entered before Updated/StatusChanged before Removed).
    pub fn handle_fix(&mut self, fix: &VesselFix, now: DateTime<Utc>) -> Vec<VesselEvent> {
        if !geometry::valid_coordinates(fix.lat, fix.lon) {
            metrics::counter!("brovakt_fixes_dropped_total", "kind" => "invalid_ais").increment(1);
            // Garbage coordinates also void the hysteresis latches.
            if let Some(vessel) = self.vessels.get_mut(&fix.mmsi) {
                vessel.under_bridge_latched = false;
                self.stabilizer.reset(&fix.mmsi);
            }
            return Vec::new();
        }

        if !self.vessels.contains_key(&fix.mmsi) {
            return self.enter_vessel(fix, now);
        }
        self.update_vessel(fix, now)
    }

    fn enter_vessel(&mut self, fix: &VesselFix, now: DateTime<Utc>) -> Vec<VesselEvent> {
        if !inside_canal_bbox(fix.lat, fix.lon) {
            metrics::counter!("brovakt_fixes_dropped_total", "kind" => "outside_bbox").increment(1);
            return Vec::new();
        }

        let mut vessel = Vessel::new(fix.mmsi.clone(), fix.lat, fix.lon, fix.sog, fix.cog, now);
        vessel.ship_name = fix.ship_name.clone();

        let mut events = vec![VesselEvent::Entered {
            mmsi: fix.mmsi.clone(),
        }];

        let prox = match proximity::analyze(&self.bridges, fix.lat, fix.lon, None) {
            Some(p) => p,
            None => return Vec::new(),
        };
        vessel.current_bridge = Some(prox.nearest().bridge);
        vessel.distance_to_current_m = Some(prox.nearest().distance_m);

        self.assign_target(&mut vessel, &prox, now);
        let raw = status::derive(&vessel, &prox, &self.bridges, &self.latch, now);
        let stable = self
            .stabilizer
            .stabilize(&fix.mmsi, raw, SignalFlags::default(), now);
        if stable.is_some() {
            events.push(VesselEvent::StatusChanged {
                mmsi: fix.mmsi.clone(),
                from: None,
                to: stable,
            });
        }
        vessel.status = stable;
        self.update_eta(&mut vessel, &prox, now);
        vessel.proximity = Some(prox);
        self.schedule_cleanup(&mut vessel, now);

        info!(
            mmsi = %fix.mmsi,
            name = vessel.ship_name.as_deref().unwrap_or("-"),
            "vessel entered canal area"
        );
        metrics::counter!("brovakt_vessels_entered_total").increment(1);
        self.vessels.insert(fix.mmsi.clone(), vessel);
        metrics::gauge!("brovakt_vessels_tracked").set(self.vessels.len() as f64);
        events
    }

    fn update_vessel(&mut self, fix: &VesselFix, now: DateTime<Utc>) -> Vec<VesselEvent> {
        let mut events = Vec::new();
        let mut vessel = self
            .vessels
            .remove(&fix.mmsi)
            .expect("caller checked presence");

        vessel.last_message = now;
        if let Some(name) = &fix.ship_name {
            vessel.ship_name = Some(name.clone());
        }

        let prev = PreviousFix {
            lat: vessel.lat,
            lon: vessel.lon,
            sog: vessel.sog,
            cog: vessel.cog,
            timestamp: vessel.last_position_change,
        };
        let analysis = gps_jump::analyze(&prev, fix.lat, fix.lon, fix.sog, fix.cog, now);

        if analysis.gps_jump_detected {
            debug!(
                mmsi = %fix.mmsi,
                distance_m = analysis.movement_distance_m,
                action = ?analysis.action,
                "GPS jump detected"
            );
            metrics::counter!("brovakt_gps_jumps_total").increment(1);
            events.push(VesselEvent::GpsJumpDetected {
                mmsi: fix.mmsi.clone(),
                distance_m: analysis.movement_distance_m,
            });
            let until = now + Duration::seconds(GPS_HOLD_SECS);
            vessel.coordination_until = Some(until);
            vessel.protection = Some(Protection {
                reason: ProtectionReason::GpsHold,
                until,
                close_to_target: vessel
                    .target_bridge
                    .zip(vessel.distance_to_current_m)
                    .map(|(_, d)| d <= proximity::PROTECTION_RADIUS_M)
                    .unwrap_or(false),
                maneuver_detected: false,
            });
            events.push(VesselEvent::GpsHoldSet {
                mmsi: fix.mmsi.clone(),
                until,
            });
        }
        if analysis.movement_distance_m > LATCH_RESET_JUMP_M {
            vessel.under_bridge_latched = false;
            self.stabilizer.reset(&fix.mmsi);
        }

        if analysis.action == JumpAction::Reject {
            // Keep the previous coordinates; the frame still proves the
            // transponder is alive.
            metrics::counter!("brovakt_fixes_dropped_total", "kind" => "kinematic").increment(1);
            self.schedule_cleanup(&mut vessel, now);
            events.push(VesselEvent::Updated {
                mmsi: fix.mmsi.clone(),
            });
            self.vessels.insert(fix.mmsi.clone(), vessel);
            return events;
        }

        let prev_position = (vessel.lat, vessel.lon);
        let moved_m = geometry::distance_m(vessel.lat, vessel.lon, fix.lat, fix.lon).unwrap_or(0.0);
        if moved_m > 0.0 {
            vessel.last_position_change = now;
        }
        if moved_m >= SIGNIFICANT_MOVE_M {
            vessel.last_position_update = now;
        }
        let sparse_ais = (now - prev.timestamp).num_seconds() > SPARSE_AIS_SECS;
        let maneuver = match (prev.cog, fix.cog) {
            (Some(a), Some(b)) => geometry::angular_difference(a, b) >= MANEUVER_COG_DEG,
            _ => false,
        };
        vessel.push_position(fix.lat, fix.lon, now);
        vessel.push_speed(fix.sog, now);
        let prev_cog = prev.cog;
        vessel.cog = fix.cog;

        let prox = match proximity::analyze(&self.bridges, fix.lat, fix.lon, vessel.proximity.as_ref())
        {
            Some(p) => p,
            None => {
                self.vessels.insert(fix.mmsi.clone(), vessel);
                return events;
            }
        };

        // Under-bridge hysteresis latch, reset when the nearest bridge moves.
        let nearest = prox.nearest().bridge;
        if vessel.current_bridge != Some(nearest) {
            vessel.under_bridge_latched = false;
            self.stabilizer.reset(&fix.mmsi);
        }
        vessel.current_bridge = Some(nearest);
        vessel.distance_to_current_m = Some(prox.nearest().distance_m);
        if prox.nearest().distance_m <= proximity::UNDER_BRIDGE_SET_M {
            vessel.under_bridge_latched = true;
        } else if prox.nearest().distance_m > proximity::UNDER_BRIDGE_CLEAR_M {
            vessel.under_bridge_latched = false;
        }

        for transition in &prox.transitions {
            if transition.to == Zone::Protection && transition.from < Zone::Protection {
                events.push(VesselEvent::ProtectionZoneEntered {
                    mmsi: fix.mmsi.clone(),
                    bridge: transition.bridge,
                });
            }
        }

        // Passage pipeline: detect, gate under GPS hold, commit otherwise.
        let hold_active = vessel.gps_hold_active(now) || analysis.position_uncertain;
        match self.gate.observe(&fix.mmsi, fix.lat, fix.lon, fix.sog, fix.cog, now) {
            GateOutcome::Confirmed {
                bridge,
                crossing_time,
            } => {
                if let Some(removal) =
                    self.commit_passage(&mut vessel, bridge, crossing_time, now, &mut events)
                {
                    events.push(removal);
                    self.finish_removal(&fix.mmsi);
                    return events;
                }
            }
            GateOutcome::Discarded { bridge } => {
                debug!(mmsi = %fix.mmsi, %bridge, "held passage discarded (unstable track)");
            }
            GateOutcome::Holding | GateOutcome::Idle => {}
        }

        if let Some((bridge, detection)) = self.detect_passage_for_fix(
            &vessel,
            prev_position,
            (fix.lat, fix.lon),
            prev_cog,
            fix.cog,
            maneuver,
            sparse_ais,
        ) {
            metrics::counter!("brovakt_passages_detected_total", "method" => format!("{:?}", detection.method))
                .increment(1);
            if hold_active || self.gate.has_candidate(&fix.mmsi) {
                debug!(mmsi = %fix.mmsi, %bridge, "passage held for GPS coordination");
                self.gate.hold(
                    &fix.mmsi, bridge, now, fix.lat, fix.lon, fix.sog, fix.cog, now,
                );
            } else if let Some(removal) =
                self.commit_passage(&mut vessel, bridge, now, now, &mut events)
            {
                events.push(removal);
                self.finish_removal(&fix.mmsi);
                return events;
            }
        }

        self.assign_target(&mut vessel, &prox, now);

        let raw = status::derive(&vessel, &prox, &self.bridges, &self.latch, now);
        let flags = SignalFlags {
            gps_jump_detected: analysis.gps_jump_detected,
            position_uncertain: analysis.position_uncertain,
        };
        let stable = self.stabilizer.stabilize(&fix.mmsi, raw, flags, now);
        vessel.waiting_confirmations = self.stabilizer.confirmations(&fix.mmsi);
        if stable != vessel.status {
            events.push(VesselEvent::StatusChanged {
                mmsi: fix.mmsi.clone(),
                from: vessel.status,
                to: stable,
            });
            vessel.status = stable;
        }

        self.update_eta(&mut vessel, &prox, now);
        vessel.proximity = Some(prox);
        self.schedule_cleanup(&mut vessel, now);

        events.push(VesselEvent::Updated {
            mmsi: fix.mmsi.clone(),
        });
        metrics::counter!("brovakt_fixes_processed_total").increment(1);
        self.vessels.insert(fix.mmsi.clone(), vessel);
        events
    }

    /// Passage detection against every bridge the segment plausibly crossed.
    fn detect_passage_for_fix(
        &self,
        vessel: &Vessel,
        prev: (f64, f64),
        cur: (f64, f64),
        prev_cog: Option<f64>,
        cur_cog: Option<f64>,
        maneuver: bool,
        sparse_ais: bool,
    ) -> Option<(BridgeId, geometry::PassageDetection)> {
        for bridge in self.bridges.in_order() {
            let prev_d = geometry::distance_m(prev.0, prev.1, bridge.lat, bridge.lon)?;
            let cur_d = geometry::distance_m(cur.0, cur.1, bridge.lat, bridge.lon)?;
            if prev_d.min(cur_d) > geometry::LINE_CROSSING_THRESHOLD_RELAXED_M * 1.5 {
                continue;
            }
            let ctx = PassageContext {
                axis_bearing_deg: self.axis_bearing(bridge.id),
                prev_cog,
                cur_cog,
                min_recent_distance_m: vessel.min_recent_distance_to(bridge.lat, bridge.lon),
                relaxed: maneuver || sparse_ais,
                special_bridge: self.bridges.is_special(bridge.id),
            };
            if let Some(detection) =
                geometry::detect_passage(prev, cur, (bridge.lat, bridge.lon), &ctx)
            {
                return Some((bridge.id, detection));
            }
        }
        None
    }

    /// Canal axis direction at a bridge: bearing toward its northern
    /// neighbour (or from the southern one, at the chain's north end).
    fn axis_bearing(&self, id: BridgeId) -> f64 {
        let bridges = self.bridges.in_order();
        let idx = self.bridges.get(id).index;
        let (from, to) = if idx + 1 < bridges.len() {
            (&bridges[idx], &bridges[idx + 1])
        } else {
            (&bridges[idx - 1], &bridges[idx])
        };
        geometry::bearing_deg(from.lat, from.lon, to.lat, to.lon).unwrap_or(0.0)
    }

    /// Anchor a validated passage. Returns a removal event when the vessel
    /// completed its journey.
    fn commit_passage(
        &mut self,
        vessel: &mut Vessel,
        bridge: BridgeId,
        crossing_time: DateTime<Utc>,
        now: DateTime<Utc>,
        events: &mut Vec<VesselEvent>,
    ) -> Option<VesselEvent> {
        // Re-cross guard: at most one anchored passage per bridge per window.
        if let Some(previous) = vessel.passed_at.get(&bridge)
            && crossing_time - *previous < Duration::seconds(PASSAGE_RECROSS_GUARD_SECS)
        {
            debug!(mmsi = %vessel.mmsi, %bridge, "passage suppressed by re-cross guard");
            return None;
        }

        let direction = vessel.direction();
        let verdict = self.route_validator.validate_and_record(
            &self.bridges,
            &vessel.mmsi,
            bridge,
            direction,
            crossing_time,
        );
        if !verdict.accepted() {
            warn!(
                mmsi = %vessel.mmsi,
                %bridge,
                "passage rejected: geographically impossible sequence"
            );
            metrics::counter!("brovakt_passages_rejected_total").increment(1);
            return None;
        }

        vessel.record_passage(bridge, crossing_time);
        self.latch.latch(&vessel.mmsi, bridge, crossing_time);
        info!(
            mmsi = %vessel.mmsi,
            bridge = self.bridges.get(bridge).name,
            verdict = ?verdict,
            "passage anchored"
        );
        events.push(VesselEvent::PassageAnchored {
            mmsi: vessel.mmsi.clone(),
            bridge,
            at: crossing_time,
        });

        // A passed target bridge means a new target ahead, or journey done.
        if self.bridges.is_target(bridge) && vessel.target_bridge == Some(bridge) {
            let northbound = match direction {
                Direction::Northbound => true,
                Direction::Southbound => false,
                Direction::Unknown => {
                    // Fall back to which side of the bridge the vessel is on.
                    vessel.lat > self.bridges.get(bridge).lat
                }
            };
            match self.bridges.next_target_after(bridge, northbound) {
                Some(next) => {
                    vessel.last_target_for_hysteresis = vessel.target_bridge;
                    vessel.target_bridge = Some(next);
                    self.stabilizer.reset(&vessel.mmsi);
                }
                None => {
                    info!(mmsi = %vessel.mmsi, "journey completed, removing vessel");
                    return Some(VesselEvent::Removed {
                        mmsi: vessel.mmsi.clone(),
                        reason: RemovalReason::JourneyCompleted,
                    });
                }
            }
        }
        None
    }

    /// Target-bridge assignment. Rule order is authoritative: protection
    /// zone hold, speed gates, two-reading validation, then the directional
    /// mapping.
    fn assign_target(
        &mut self,
        vessel: &mut Vessel,
        prox: &proximity::ProximityData,
        now: DateTime<Utc>,
    ) {
        // Rule 1: inside the target's protection ring the target is sticky.
        if let Some(target) = vessel.target_bridge
            && prox.distance_to(target) <= proximity::PROTECTION_RADIUS_M
        {
            vessel.protection = Some(Protection {
                reason: ProtectionReason::ProtectionZone,
                until: now + Duration::minutes(CLEANUP_PROTECTED_MINS),
                close_to_target: true,
                maneuver_detected: vessel
                    .protection
                    .map(|p| p.maneuver_detected)
                    .unwrap_or(false),
            });
            return;
        }

        // Recent passage also protects the current assignment.
        if let (Some(_), Some(at)) = (vessel.last_passed_bridge, vessel.last_passed_bridge_time)
            && crate::passage_window::within_internal_grace(at, vessel.last_passage_sog, now)
            && vessel.target_bridge.is_some()
        {
            return;
        }

        let candidate = self.directional_candidate(vessel);

        let Some(candidate) = candidate else {
            // Unknown direction holds the current target; a determined "no
            // target ahead" clears it.
            if vessel.direction() != Direction::Unknown {
                vessel.target_bridge = None;
            }
            return;
        };

        if Some(candidate) == vessel.target_bridge {
            return;
        }

        // Rules 2+3 gate acquisition (never holding).
        let d = prox.distance_to(candidate);
        let speed_ok = if d > proximity::APPROACH_RADIUS_M {
            vessel.sog > ACQUIRE_MIN_SOG_FAR_KN
        } else if d > proximity::PROTECTION_RADIUS_M {
            vessel.sog > ACQUIRE_MIN_SOG_NEAR_KN
        } else {
            true
        };
        if !speed_ok || (vessel.sog <= ACQUIRE_STALLED_SOG_KN && d > proximity::PROTECTION_RADIUS_M)
        {
            return;
        }

        // Two-reading validation: must have closed at least 10 m on the
        // candidate since the previous accepted position.
        let target_bridge = self.bridges.get(candidate);
        let moved_toward = vessel
            .previous_position()
            .and_then(|(plat, plon, _)| {
                let prev_d =
                    geometry::distance_m(plat, plon, target_bridge.lat, target_bridge.lon)?;
                let cur_d = geometry::distance_m(
                    vessel.lat,
                    vessel.lon,
                    target_bridge.lat,
                    target_bridge.lon,
                )?;
                Some(prev_d - cur_d >= ACQUIRE_MIN_PROGRESS_M)
            })
            .unwrap_or(false);
        if !moved_toward {
            return;
        }

        debug!(
            mmsi = %vessel.mmsi,
            target = target_bridge.name,
            "target bridge acquired"
        );
        vessel.last_target_for_hysteresis = vessel.target_bridge;
        vessel.target_bridge = Some(candidate);
        self.stabilizer.reset(&vessel.mmsi);
    }

    /// The directional mapping of §target rules: which opening bridge lies
    /// ahead given the travel direction and position along the canal.
    fn directional_candidate(&self, vessel: &Vessel) -> Option<BridgeId> {
        let klaff = self.bridges.get(BridgeId::Klaffbron);
        let strids = self.bridges.get(BridgeId::Stridsbergsbron);
        match vessel.direction() {
            Direction::Northbound => {
                if vessel.lat < klaff.lat {
                    Some(BridgeId::Klaffbron)
                } else if vessel.lat < strids.lat {
                    Some(BridgeId::Stridsbergsbron)
                } else {
                    // North of the last opening bridge heading north.
                    None
                }
            }
            Direction::Southbound => {
                if vessel.lat > strids.lat {
                    Some(BridgeId::Stridsbergsbron)
                } else if vessel.lat > klaff.lat {
                    Some(BridgeId::Klaffbron)
                } else {
                    // South of Klaffbron heading south: leaving the system.
                    None
                }
            }
            Direction::Unknown => vessel.target_bridge,
        }
    }

    fn update_eta(
        &mut self,
        vessel: &mut Vessel,
        prox: &proximity::ProximityData,
        now: DateTime<Utc>,
    ) {
        vessel.eta_minutes = match vessel.target_bridge {
            Some(target) => self.eta.compute(
                &vessel.mmsi,
                vessel.status,
                prox.nearest().bridge,
                prox.nearest().distance_m,
                target,
                vessel.sog,
                &self.bridges,
                now,
            ),
            None => None,
        };
    }

    /// Lifecycle deadline per zone and motion state.
    fn schedule_cleanup(&self, vessel: &mut Vessel, now: DateTime<Utc>) {
        let protected = vessel
            .target_bridge
            .map(|t| {
                vessel
                    .proximity
                    .as_ref()
                    .map(|p| p.distance_to(t) <= proximity::PROTECTION_RADIUS_M)
                    .unwrap_or(false)
            })
            .unwrap_or(false)
            || matches!(
                vessel.protection,
                Some(Protection {
                    reason: ProtectionReason::ProtectionZone,
                    until,
                    ..
                }) if now < until
            );

        let mut deadline = if protected {
            now + Duration::minutes(CLEANUP_PROTECTED_MINS)
        } else if !vessel.has_been_moving(ACQUIRE_STALLED_SOG_KN) {
            now + Duration::minutes(CLEANUP_STATIONARY_MINS)
        } else {
            now + Duration::minutes(CLEANUP_MOVING_MINS)
        };

        // A vessel still on display as "just passed" must outlive the
        // remaining display window.
        if let Some(at) = vessel.last_passed_bridge_time
            && crate::passage_window::should_show_recently_passed(at, now)
        {
            let display_end = at + crate::passage_window::display_window() + Duration::seconds(5);
            let floor = now + Duration::seconds(60);
            deadline = deadline.max(display_end).max(floor);
        }

        vessel.cleanup_deadline = deadline;
    }

    /// Remove a vessel. Idempotent: removing an absent vessel is a no-op.
    pub fn remove(
        &mut self,
        mmsi: &str,
        reason: RemovalReason,
        _now: DateTime<Utc>,
    ) -> Option<VesselEvent> {
        let vessel = self.vessels.remove(mmsi)?;
        self.finish_removal(mmsi);
        info!(
            mmsi,
            name = vessel.ship_name.as_deref().unwrap_or("-"),
            reason = reason.label(),
            "vessel removed"
        );
        metrics::counter!("brovakt_vessels_removed_total", "reason" => reason.label()).increment(1);
        metrics::gauge!("brovakt_vessels_tracked").set(self.vessels.len() as f64);
        Some(VesselEvent::Removed {
            mmsi: mmsi.to_string(),
            reason,
        })
    }

    /// Clear per-vessel state in every sibling service.
    fn finish_removal(&mut self, mmsi: &str) {
        self.vessels.remove(mmsi);
        self.stabilizer.remove(mmsi);
        self.latch.remove_vessel(mmsi);
        self.route_validator.remove_vessel(mmsi);
        self.gate.remove_vessel(mmsi);
        self.eta.remove(mmsi);
        metrics::gauge!("brovakt_vessels_tracked").set(self.vessels.len() as f64);
    }

    /// Periodic lifecycle sweep: evict vessels past their deadline or with a
    /// dead AIS signal, and let the sibling services prune themselves.
    pub fn sweep(&mut self, now: DateTime<Utc>) -> Vec<VesselEvent> {
        let mut events = Vec::new();

        let expired: Vec<(String, RemovalReason)> = self
            .vessels
            .values()
            .filter_map(|v| {
                if now - v.last_message >= Duration::minutes(DEAD_AIS_MINS) {
                    Some((v.mmsi.clone(), RemovalReason::DeadAis))
                } else if now >= v.cleanup_deadline {
                    Some((v.mmsi.clone(), RemovalReason::Stale))
                } else {
                    None
                }
            })
            .collect();

        for (mmsi, reason) in expired {
            if let Some(event) = self.remove(&mmsi, reason, now) {
                events.push(event);
            }
        }

        for (mmsi, bridge) in self.gate.sweep(now) {
            debug!(mmsi, %bridge, "held passage expired in sweep");
        }
        self.latch.cleanup(now);
        self.eta.prune(now);

        events
    }

    /// Immutable snapshot for the text and flow layers.
    pub fn snapshot(&self, now: DateTime<Utc>) -> Vec<VesselView> {
        let mut views: Vec<VesselView> = self
            .vessels
            .values()
            .map(|v| VesselView {
                mmsi: v.mmsi.clone(),
                ship_name: v.ship_name.clone(),
                lat: v.lat,
                lon: v.lon,
                status: v.status,
                target_bridge: v.target_bridge,
                current_bridge: v.current_bridge,
                distance_to_current_m: v.distance_to_current_m,
                eta_minutes: v.eta_minutes,
                direction: v.direction(),
                last_passed: v
                    .last_passed_bridge
                    .zip(v.last_passed_bridge_time),
                gps_hold: v.gps_hold_active(now),
                sog: v.sog,
            })
            .collect();
        views.sort_by(|a, b| a.mmsi.cmp(&b.mmsi));
        views
    }
}

fn inside_canal_bbox(lat: f64, lon: f64) -> bool {
    let (north, west) = CANAL_BBOX_NW;
    let (south, east) = CANAL_BBOX_SE;
    (south..=north).contains(&lat) && (west..=east).contains(&lon)
}
