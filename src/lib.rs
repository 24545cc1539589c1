//! Library root for `notify-relay`.
//!
//! The relay forwards notification events from a Pub/Sub subscription into team chat:
//! - Decodes Cloud Build status and Cloud Monitoring incident payloads
//! - Formats them into readable messages
//! - Routes them to a team and channel, honoring per-event overrides
//! - Acknowledges each event only after delivery succeeded
//!
//! Delivery goes either straight to the chat system or onto another topic, where a
//! second relay instance picks it up. The bus and chat integrations sit behind
//! traits so that other backends (and test fakes) can be swapped in.

pub mod base;
pub mod model;
pub mod pipeline;
pub mod runtime;
pub mod service;

use base::{config::Config, types::Res};
use tracing::info;

/// Connect to every external service and build the runtime.
///
/// Any error here is a startup failure; nothing has been received yet.
pub async fn initialize(config: Config) -> Res<runtime::Runtime> {
    info!("Starting notify-relay ...");

    runtime::Runtime::new(config).await
}
