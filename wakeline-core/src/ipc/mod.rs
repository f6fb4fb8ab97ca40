//! Events the core publishes to passive observers (LEDs, display, telemetry,
//! local actuators).
//!
//! All types derive `serde::Serialize` + `serde::Deserialize` so a host can
//! forward them verbatim as JSON.

pub mod events;
