//! Anti-flicker layer between raw status derivation and the registry.
//!
//! Three mechanisms, applied in order:
//! 1. During the 30 s window after a GPS jump the previous status is held.
//! 2. While the position is flagged uncertain, a new status must be proposed
//!    twice in a row before it is adopted.
//! 3. If the recent stabilised history is churning, the most common status
//!    in the window is returned instead of the newest.

use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, VecDeque};

use crate::vessel_tracker::vessel_state::VesselStatus;

/// How long a GPS jump freezes status changes.
const STABILIZATION_WINDOW_SECS: i64 = 30;
/// Consecutive identical proposals required while uncertain.
const UNCERTAIN_CONFIRMATIONS: u32 = 2;
/// Rolling history length for flicker damping.
const HISTORY_LEN: usize = 5;
/// Distinct consecutive-pair changes in the window that count as flicker.
const FLICKER_TRANSITIONS: usize = 4;

/// Per-fix signal quality flags from the jump analyzer.
#[derive(Debug, Clone, Copy, Default)]
pub struct SignalFlags {
    pub gps_jump_detected: bool,
    pub position_uncertain: bool,
}

#[derive(Debug, Default)]
struct StabilizerState {
    last_stable: Option<VesselStatus>,
    has_stable: bool,
    stabilization_until: Option<DateTime<Utc>>,
    pending: Option<VesselStatus>,
    pending_count: u32,
    history: VecDeque<Option<VesselStatus>>,
}

/// Owns per-vessel stabilisation state, keyed by MMSI.
#[derive(Debug, Default)]
pub struct StatusStabilizer {
    states: HashMap<String, StabilizerState>,
}

impl StatusStabilizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run a proposed status through the stabiliser and return what the
    /// registry should adopt.
    pub fn stabilize(
        &mut self,
        mmsi: &str,
        proposed: Option<VesselStatus>,
        flags: SignalFlags,
        now: DateTime<Utc>,
    ) -> Option<VesselStatus> {
        let state = self.states.entry(mmsi.to_string()).or_default();

        if flags.gps_jump_detected {
            state.stabilization_until = Some(now + Duration::seconds(STABILIZATION_WINDOW_SECS));
        }

        // Inside the stabilisation window the previous status wins.
        if let Some(until) = state.stabilization_until {
            if now < until {
                if state.has_stable {
                    let held = state.last_stable;
                    state.push_history(held);
                    return held;
                }
            } else {
                state.stabilization_until = None;
            }
        }

        let adopted = if flags.position_uncertain && state.has_stable {
            if proposed == state.last_stable {
                state.pending = None;
                state.pending_count = 0;
                proposed
            } else if state.pending == proposed {
                state.pending_count += 1;
                if state.pending_count >= UNCERTAIN_CONFIRMATIONS {
                    state.pending = None;
                    state.pending_count = 0;
                    proposed
                } else {
                    state.last_stable
                }
            } else {
                state.pending = proposed;
                state.pending_count = 1;
                state.last_stable
            }
        } else {
            state.pending = None;
            state.pending_count = 0;
            proposed
        };

        state.push_history(adopted);

        // Flicker damping: when the window churns, report its mode.
        let result = if state.transition_count() >= FLICKER_TRANSITIONS {
            state.most_common()
        } else {
            adopted
        };

        state.last_stable = result;
        state.has_stable = true;
        result
    }

    /// Consecutive confirmations accumulated for the current pending status.
    pub fn confirmations(&self, mmsi: &str) -> u32 {
        self.states.get(mmsi).map(|s| s.pending_count).unwrap_or(0)
    }

    /// Reset stabilisation for a vessel. Called when the target or current
    /// bridge changes, on a >500 m jump, or on invalid coordinates.
    pub fn reset(&mut self, mmsi: &str) {
        if let Some(state) = self.states.get_mut(mmsi) {
            state.stabilization_until = None;
            state.pending = None;
            state.pending_count = 0;
            state.history.clear();
        }
    }

    pub fn remove(&mut self, mmsi: &str) {
        self.states.remove(mmsi);
    }
}

impl StabilizerState {
    fn push_history(&mut self, status: Option<VesselStatus>) {
        if self.history.len() >= HISTORY_LEN {
            self.history.pop_front();
        }
        self.history.push_back(status);
    }

    fn transition_count(&self) -> usize {
        self.history
            .iter()
            .zip(self.history.iter().skip(1))
            .filter(|(a, b)| a != b)
            .count()
    }

    fn most_common(&self) -> Option<VesselStatus> {
        let mut counts: Vec<(Option<VesselStatus>, usize)> = Vec::new();
        for status in &self.history {
            match counts.iter_mut().find(|(s, _)| s == status) {
                Some((_, n)) => *n += 1,
                None => counts.push((*status, 1)),
            }
        }
        counts
            .into_iter()
            .max_by_key(|(_, n)| *n)
            .map(|(s, _)| s)
            .unwrap_or(None)
    }
}
