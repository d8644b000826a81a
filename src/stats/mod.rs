//! Telemetry: line-protocol measurements batched over persistent HTTPS.

pub mod line;
pub mod publisher;

pub use line::{FieldValue, Measurement};
pub use publisher::StatsPublisher;
