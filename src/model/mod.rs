//! Wire records for the notification payloads the relay understands.
//!
//! Field names mirror the publishers' JSON exactly. Unknown fields are ignored and
//! missing ones take their zero value, so new publisher fields never break decoding.

pub mod build;
pub mod incident;

pub use build::BuildStatusRecord;
pub use incident::MonitoringIncident;
