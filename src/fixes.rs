//! The validated position report emitted by the AIS stream client.
//!
//! aisstream.io frames are JSON with a `MessageType`, a `MetaData` object and
//! a `Message` object keyed by the message type. Field placement is not
//! reliable across message types, so extraction probes both the metadata and
//! the message payload (first entry) for every field.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::TrackerError;

/// AIS message types that carry a usable position.
pub const ACCEPTED_MESSAGE_TYPES: [&str; 3] = [
    "PositionReport",
    "StandardClassBPositionReport",
    "ExtendedClassBPositionReport",
];

/// A single validated vessel position report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VesselFix {
    /// Maritime Mobile Service Identity, the vessel key.
    pub mmsi: String,
    /// Wire message type this fix came from.
    pub msg_type: String,
    pub lat: f64,
    pub lon: f64,
    /// Speed over ground in knots; the wire's "not available" collapses to 0.
    pub sog: f64,
    /// Course over ground, degrees [0, 360). 360 on the wire means north and
    /// is normalised to 0; a missing course stays `None` (unknown, not 0°).
    pub cog: Option<f64>,
    pub ship_name: Option<String>,
    /// When we received the frame.
    pub timestamp: DateTime<Utc>,
}

/// Probe `MetaData` and then the message payload for a field.
fn probe<'a>(frame: &'a Value, msg_type: &str, key_variants: &[&str]) -> Option<&'a Value> {
    for key in key_variants {
        if let Some(v) = frame.get("MetaData").and_then(|m| m.get(*key))
            && !v.is_null()
        {
            return Some(v);
        }
        if let Some(v) = frame
            .get("Message")
            .and_then(|m| m.get(msg_type))
            .and_then(|p| p.get(*key))
            && !v.is_null()
        {
            return Some(v);
        }
    }
    None
}

fn as_f64(v: &Value) -> Option<f64> {
    v.as_f64().or_else(|| v.as_str()?.trim().parse().ok())
}

fn as_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

impl VesselFix {
    /// Extract a validated fix from a raw aisstream.io frame.
    ///
    /// Returns `Ok(None)` for frames that are not position reports, and
    /// `Err(InvalidAis)` for position reports that fail validation (missing
    /// MMSI, non-finite coordinates, or the 0/0 garbage fix).
    pub fn from_frame(
        frame: &Value,
        received_at: DateTime<Utc>,
    ) -> Result<Option<Self>, TrackerError> {
        let msg_type = match frame.get("MessageType").and_then(|v| v.as_str()) {
            Some(t) if ACCEPTED_MESSAGE_TYPES.contains(&t) => t.to_string(),
            _ => return Ok(None),
        };

        let mmsi = probe(frame, &msg_type, &["MMSI", "UserID"])
            .and_then(as_string)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| TrackerError::InvalidAis("missing MMSI".into()))?;

        let lat = probe(frame, &msg_type, &["latitude", "Latitude"])
            .and_then(as_f64)
            .ok_or_else(|| TrackerError::InvalidAis(format!("{mmsi}: missing latitude")))?;
        let lon = probe(frame, &msg_type, &["longitude", "Longitude"])
            .and_then(as_f64)
            .ok_or_else(|| TrackerError::InvalidAis(format!("{mmsi}: missing longitude")))?;

        if !lat.is_finite() || !lon.is_finite() {
            return Err(TrackerError::InvalidAis(format!(
                "{mmsi}: non-finite position"
            )));
        }
        // 0/0 is the canonical garbage fix from unconfigured transponders.
        if lat == 0.0 && lon == 0.0 {
            return Err(TrackerError::InvalidAis(format!("{mmsi}: 0/0 position")));
        }

        let sog = probe(frame, &msg_type, &["Sog", "SOG"])
            .and_then(as_f64)
            .filter(|s| s.is_finite() && *s >= 0.0)
            .unwrap_or(0.0);

        let cog = probe(frame, &msg_type, &["Cog", "COG"])
            .and_then(as_f64)
            .filter(|c| c.is_finite() && (0.0..=360.0).contains(c))
            .map(|c| if c == 360.0 { 0.0 } else { c });

        let ship_name = probe(frame, &msg_type, &["ShipName", "Name"])
            .and_then(as_string)
            .filter(|s| !s.is_empty());

        Ok(Some(VesselFix {
            mmsi,
            msg_type,
            lat,
            lon,
            sog,
            cog,
            ship_name,
            timestamp: received_at,
        }))
    }
}
