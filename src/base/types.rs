use std::{collections::HashMap, fmt};

use serde::{Deserialize, Serialize};

pub type Err = anyhow::Error;
pub type Res<T> = Result<T, Err>;
pub type Void = Res<()>;

/// Attribute that overrides the destination team.
pub const TEAM_ATTRIBUTE: &str = "team";
/// Attribute that overrides the destination channel.
pub const CHANNEL_ATTRIBUTE: &str = "channel";

/// Which payload shape a pipeline instance decodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// Cloud Build status notifications.
    #[default]
    Build,
    /// Cloud Monitoring incident notifications.
    Incident,
    /// Pre-formatted text, usually produced by an upstream relay.
    Text,
}

/// How a formatted message leaves the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DispatchStrategy {
    /// Send straight to the chat system.
    #[default]
    Direct,
    /// Publish onto an outbound topic for another relay to deliver.
    Republish,
}

/// What to do with an envelope whose payload cannot be decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecodeFailurePolicy {
    /// Drop the envelope by acknowledging it.
    Ack,
    /// Leave the envelope unacknowledged so that it stays visible for inspection.
    Leave,
}

impl fmt::Display for DecodeFailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeFailurePolicy::Ack => f.write_str("ack"),
            DecodeFailurePolicy::Leave => f.write_str("leave"),
        }
    }
}

/// One unit of delivery from the inbound bus.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Envelope {
    /// Opaque handle used to acknowledge this delivery.
    pub ack_id: String,
    /// Bus-assigned message id, for logging.
    pub message_id: String,
    /// Raw payload bytes.
    pub payload: Vec<u8>,
    /// String attributes attached by the publisher.
    pub attributes: HashMap<String, String>,
}

/// Final chat destination: a team and, optionally, a channel within it.
///
/// A `None` channel lets the chat system pick the team's default channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub team: String,
    pub channel: Option<String>,
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.channel {
            Some(channel) => write!(f, "{}#{}", self.team, channel),
            None => write!(f, "{}", self.team),
        }
    }
}

/// A formatted message ready for dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub body: String,
    /// Routing hint chosen by the formatter (`builds`, `devops`).
    ///
    /// Only attached as a bus attribute on republish; it is never the chat channel.
    pub channel_tag: Option<String>,
}

/// The pipeline's verdict for a single envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Acknowledge,
    Leave,
}
