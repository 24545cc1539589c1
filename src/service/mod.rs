//! Service integrations for external APIs and clients.
//!
//! This module contains implementations for the services used by the relay:
//! - Bus services (e.g., Google Cloud Pub/Sub)
//! - Chat services (e.g., Keybase)
//!
//! Each service module defines both generic traits and concrete implementations,
//! allowing for extensibility and easy testing.

pub mod bus;
pub mod chat;
