//! brovakt - live AIS tracking of vessel traffic toward the Trollhätte
//! canal bridges.
//!
//! The pipeline: the AIS stream client emits validated position reports,
//! the vessel registry derives per-vessel status and ETA, and the coalescer
//! publishes one short Swedish sentence (plus alarm and proximity events)
//! to the home-automation host.

pub mod ais_client;
pub mod bridge_text;
pub mod bridges;
pub mod coalescer;
pub mod config;
pub mod error;
pub mod eta;
pub mod fixes;
pub mod flow_events;
pub mod geometry;
pub mod gps_jump;
pub mod host;
pub mod passage_window;
pub mod proximity;
pub mod system;
pub mod vessel_tracker;

pub use ais_client::{AisEvent, AisStreamClient, ConnectionStats};
pub use bridges::{Bridge, BridgeId, BridgeKind, BridgeRegistry};
pub use error::TrackerError;
pub use fixes::VesselFix;
pub use vessel_tracker::{VesselRegistry, VesselStatus};
