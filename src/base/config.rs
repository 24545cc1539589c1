//! Load configuration via `config` crate with env-override support.

use std::{ops::Deref, sync::Arc};

use serde::Deserialize;

use super::types::{DecodeFailurePolicy, DispatchStrategy, EventKind, Res, Route};

/// Default location of the Keybase executable.
fn default_keybase_location() -> String {
    "keybase".to_string()
}

/// Default Pub/Sub REST endpoint.
fn default_pubsub_endpoint() -> String {
    "https://pubsub.googleapis.com".to_string()
}

/// Default number of envelopes processed concurrently.
fn default_max_outstanding() -> u32 {
    10
}

/// Default delay between failed pulls, in seconds.
fn default_pull_retry_secs() -> u64 {
    5
}

/// Configuration for the relay.
#[derive(Debug, Clone)]
pub struct Config {
    pub inner: Arc<ConfigInner>,
}

impl Deref for Config {
    type Target = ConfigInner;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ConfigInner {
    /// Project that owns the inbound subscription (`PROJECT_ID`).
    #[serde(default)]
    pub project_id: String,
    /// Inbound subscription name (`SUBSCRIPTION_ID`).
    #[serde(default)]
    pub subscription_id: String,
    /// Default destination team (`TEAM_NAME`).
    #[serde(default)]
    pub team_name: String,
    /// Default destination channel (`CHANNEL`); empty means the team's default channel.
    #[serde(default)]
    pub channel: Option<String>,
    /// Payload shape this instance decodes (`EVENT_KIND`).
    #[serde(default)]
    pub event_kind: EventKind,
    /// How formatted messages are delivered (`DISPATCH`).
    #[serde(default)]
    pub dispatch: DispatchStrategy,
    /// Outbound topic, used when `dispatch = republish` (`TOPIC_ID`).
    #[serde(default)]
    pub topic_id: Option<String>,
    /// Project that owns the outbound topic; defaults to `project_id` (`TOPIC_PROJECT_ID`).
    #[serde(default)]
    pub topic_project_id: Option<String>,
    /// What to do with payloads that fail to decode (`DECODE_FAILURE`). Must be set explicitly.
    #[serde(default)]
    pub decode_failure: Option<DecodeFailurePolicy>,
    /// Path to the Keybase executable (`KEYBASE_LOCATION`).
    #[serde(default = "default_keybase_location")]
    pub keybase_location: String,
    /// Pub/Sub REST endpoint.
    #[serde(default = "default_pubsub_endpoint")]
    pub pubsub_endpoint: String,
    /// Pub/Sub emulator `host:port` (`PUBSUB_EMULATOR_HOST`); disables authentication.
    #[serde(default)]
    pub pubsub_emulator_host: Option<String>,
    /// Static bearer token for Pub/Sub; when absent, the metadata server is used.
    #[serde(default)]
    pub pubsub_access_token: Option<String>,
    /// Maximum number of envelopes in flight at once.
    #[serde(default = "default_max_outstanding")]
    pub max_outstanding: u32,
    /// Seconds to wait after a failed pull before pulling again.
    #[serde(default = "default_pull_retry_secs")]
    pub pull_retry_secs: u64,
}

impl Config {
    /// Load the configuration from file, `NOTIFY_RELAY_*` environment variables, and explicit overrides.
    ///
    /// Overrides (usually command-line flags) win over everything else; `None` values are skipped.
    pub fn load(explicit_path: Option<&std::path::Path>, overrides: &[(&str, Option<String>)]) -> Res<Self> {
        let mut cfg = config::Config::builder();

        if let Some(p) = explicit_path {
            cfg = cfg.add_source(config::File::from(p.to_path_buf()));
        } else if std::path::Path::new(".hidden/config.toml").exists() {
            cfg = cfg.add_source(config::File::with_name(".hidden/config.toml"));
        }

        cfg = cfg.add_source(config::Environment::with_prefix("NOTIFY_RELAY").try_parsing(true));

        for (key, value) in overrides {
            cfg = cfg.set_override_option(*key, value.clone())?;
        }

        Self::new(cfg.build()?.try_deserialize()?)
    }

    /// Normalize and validate an already-deserialized configuration.
    pub fn new(mut inner: ConfigInner) -> Res<Self> {
        inner.channel = non_empty(inner.channel);
        inner.topic_id = non_empty(inner.topic_id);
        inner.topic_project_id = non_empty(inner.topic_project_id);
        inner.pubsub_emulator_host = non_empty(inner.pubsub_emulator_host);
        inner.pubsub_access_token = non_empty(inner.pubsub_access_token);

        let mut missing = Vec::new();

        if inner.project_id.is_empty() {
            missing.push("project_id (--project-id / PROJECT_ID)");
        }
        if inner.subscription_id.is_empty() {
            missing.push("subscription_id (--subscription-id / SUBSCRIPTION_ID)");
        }
        if inner.team_name.is_empty() {
            missing.push("team_name (--team-name / TEAM_NAME)");
        }
        if inner.decode_failure.is_none() {
            missing.push("decode_failure (--decode-failure / DECODE_FAILURE), one of `ack` or `leave`");
        }
        if inner.dispatch == DispatchStrategy::Republish && inner.topic_id.is_none() {
            missing.push("topic_id (--topic-id / TOPIC_ID), required when dispatch is `republish`");
        }

        if !missing.is_empty() {
            return Err(anyhow::anyhow!("Missing required configuration:\n  - {}", missing.join("\n  - ")));
        }

        if inner.max_outstanding < 1 || inner.max_outstanding > 1000 {
            return Err(anyhow::anyhow!("max_outstanding must be between 1 and 1000."));
        }

        Ok(Config { inner: Arc::new(inner) })
    }

    /// The statically configured destination.
    pub fn default_route(&self) -> Route {
        Route {
            team: self.team_name.clone(),
            channel: self.channel.clone(),
        }
    }

    /// The decode failure policy; `new` guarantees it is set.
    pub fn decode_failure_policy(&self) -> DecodeFailurePolicy {
        self.decode_failure.unwrap_or(DecodeFailurePolicy::Leave)
    }

    /// The project that owns the outbound topic.
    pub fn topic_project(&self) -> &str {
        self.topic_project_id.as_deref().unwrap_or(&self.project_id)
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}
