//! Error taxonomy for the ingestion and tracking pipeline.
//!
//! Classification drives policy: `Network` is retried by the stream client,
//! `InvalidAis` and `Kinematic` are dropped at the ingress with a counter,
//! `Stale` removes the vessel, `Internal` is logged and the publish path
//! falls back to the last known good bridge text.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrackerError {
    /// Transport-level failure on the AIS stream (connect, read, frame).
    #[error("network error: {0}")]
    Network(String),

    /// A frame that is not a usable position report (schema, 0/0 fix,
    /// out-of-range coordinates, missing MMSI).
    #[error("invalid AIS report: {0}")]
    InvalidAis(String),

    /// A fix rejected by kinematic analysis (implausible GPS jump).
    #[error("kinematically implausible fix for {mmsi}: moved {distance_m:.0} m")]
    Kinematic { mmsi: String, distance_m: f64 },

    /// Vessel aged out of the registry.
    #[error("vessel {0} is stale")]
    Stale(String),

    /// A service precondition was violated; the caller must still publish a
    /// safe bridge text.
    #[error("internal error: {0}")]
    Internal(String),
}

impl TrackerError {
    /// Stable label used for the `fixes_dropped_total` counter.
    pub fn kind(&self) -> &'static str {
        match self {
            TrackerError::Network(_) => "network",
            TrackerError::InvalidAis(_) => "invalid_ais",
            TrackerError::Kinematic { .. } => "kinematic",
            TrackerError::Stale(_) => "stale",
            TrackerError::Internal(_) => "internal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_labels_are_stable() {
        assert_eq!(TrackerError::Network("x".into()).kind(), "network");
        assert_eq!(TrackerError::InvalidAis("x".into()).kind(), "invalid_ais");
        assert_eq!(
            TrackerError::Kinematic {
                mmsi: "265000000".into(),
                distance_m: 1200.0
            }
            .kind(),
            "kinematic"
        );
        assert_eq!(TrackerError::Stale("265000000".into()).kind(), "stale");
        assert_eq!(TrackerError::Internal("x".into()).kind(), "internal");
    }

    #[test]
    fn test_display_includes_context() {
        let err = TrackerError::Kinematic {
            mmsi: "265547210".into(),
            distance_m: 850.0,
        };
        assert!(err.to_string().contains("265547210"));
        assert!(err.to_string().contains("850"));
    }
}
