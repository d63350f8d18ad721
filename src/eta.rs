//! Progressive ETA to the target bridge.
//!
//! The raw estimate is time to the nearest bridge plus the inter-bridge legs
//! to the target at an effective speed. Raw values are noisy (SOG wobble,
//! GPS jumps), so output passes through an outlier guard and an EMA before
//! anyone renders it. ETA is suppressed entirely while the vessel is waiting
//! at or under its target bridge.

use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, VecDeque};
use tracing::debug;

use crate::bridges::{BridgeId, BridgeRegistry};
use crate::vessel_tracker::VesselStatus;

const KNOTS_TO_MPS: f64 = 0.514444;
/// Floor on effective speed so a drifting vessel still gets a finite ETA.
const MIN_EFFECTIVE_SOG_KN: f64 = 0.5;
/// EMA smoothing factor.
const EMA_ALPHA: f64 = 0.3;
/// A raw ETA this many times the previous smoothed value is an outlier.
const OUTLIER_FACTOR: f64 = 2.5;
/// Samples kept per vessel.
const HISTORY_LEN: usize = 10;
/// Histories idle longer than this are dropped.
const HISTORY_RETENTION_MINS: i64 = 30;

#[derive(Debug, Clone, Copy)]
struct EtaSample {
    eta_minutes: f64,
    at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct VesselEtaHistory {
    samples: VecDeque<EtaSample>,
    last_smoothed: Option<f64>,
    last_update: Option<DateTime<Utc>>,
}

/// Owns per-vessel smoothing state. One instance lives next to the registry.
#[derive(Debug, Default)]
pub struct ProgressiveEtaCalculator {
    histories: HashMap<String, VesselEtaHistory>,
}

impl ProgressiveEtaCalculator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compute the smoothed ETA in minutes to `target`, or `None` when no
    /// finite estimate exists or the status suppresses ETA display.
    #[allow(clippy::too_many_arguments)]
    pub fn compute(
        &mut self,
        mmsi: &str,
        status: Option<VesselStatus>,
        nearest: BridgeId,
        distance_to_nearest_m: f64,
        target: BridgeId,
        sog_kn: f64,
        registry: &BridgeRegistry,
        now: DateTime<Utc>,
    ) -> Option<f64> {
        // A boat waiting at or under its target gets no countdown; the
        // opening is happening, not approaching.
        if matches!(
            status,
            Some(VesselStatus::Waiting { bridge } | VesselStatus::UnderBridge { bridge })
                if bridge == target
        ) {
            return None;
        }

        let effective_sog = sog_kn.max(MIN_EFFECTIVE_SOG_KN);
        if !effective_sog.is_finite() || !distance_to_nearest_m.is_finite() {
            return None;
        }
        let speed_mps = effective_sog * KNOTS_TO_MPS;

        let remaining_m = distance_to_nearest_m + registry.gap_between(nearest, target);
        let raw_minutes = remaining_m / speed_mps / 60.0;
        if !raw_minutes.is_finite() || raw_minutes < 0.0 {
            return None;
        }

        let history = self.histories.entry(mmsi.to_string()).or_default();

        let smoothed = match history.last_smoothed {
            Some(prev) => {
                if raw_minutes > prev * OUTLIER_FACTOR {
                    debug!(
                        mmsi,
                        raw_minutes, prev, "ETA outlier rejected, blending toward previous"
                    );
                }
                // Monotone guard and EMA share the same blend; outliers just
                // get logged before they are damped.
                EMA_ALPHA * raw_minutes + (1.0 - EMA_ALPHA) * prev
            }
            None => raw_minutes,
        };

        if !smoothed.is_finite() || smoothed < 0.0 {
            return None;
        }

        history.last_smoothed = Some(smoothed);
        history.last_update = Some(now);
        if history.samples.len() >= HISTORY_LEN {
            history.samples.pop_front();
        }
        history.samples.push_back(EtaSample {
            eta_minutes: smoothed,
            at: now,
        });

        Some(smoothed)
    }

    /// Forget a vessel (removal path).
    pub fn remove(&mut self, mmsi: &str) {
        self.histories.remove(mmsi);
    }

    /// Drop histories that have not been updated within the retention
    /// window. Called from the registry's periodic sweep.
    pub fn prune(&mut self, now: DateTime<Utc>) {
        let cutoff = now - Duration::minutes(HISTORY_RETENTION_MINS);
        self.histories.retain(|_, h| {
            h.last_update.map(|t| t > cutoff).unwrap_or(false)
                && h.samples.iter().any(|s| s.at > cutoff)
        });
    }

    #[cfg(test)]
    fn history_len(&self, mmsi: &str) -> usize {
        self.histories.get(mmsi).map(|h| h.samples.len()).unwrap_or(0)
    }
}
