//! Cloud Monitoring incident notification (webhook / Pub/Sub channel, schema 1.2).

use std::collections::HashMap;

use serde::Deserialize;
use serde_with::DefaultOnNull;

/// Top-level notification wrapper.
#[serde_with::apply(_ => #[serde_as(deserialize_as = "DefaultOnNull")])]
#[serde_with::serde_as]
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct MonitoringIncident {
    pub incident: Incident,
    pub version: String,
}

#[serde_with::apply(_ => #[serde_as(deserialize_as = "DefaultOnNull")])]
#[serde_with::serde_as]
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Incident {
    pub incident_id: String,
    pub resource_id: String,
    pub resource_name: String,
    pub resource: MonitoredResource,
    pub resource_display_name: String,
    pub resource_type_display_name: String,
    pub metric: Metric,
    /// Epoch seconds.
    pub started_at: i64,
    /// Epoch seconds; 0 while the incident is still open.
    pub ended_at: i64,
    pub policy_name: String,
    pub condition_name: String,
    pub condition: Condition,
    pub url: String,
    pub documentation: Documentation,
    pub state: String,
    pub summary: String,
}

#[serde_with::apply(_ => #[serde_as(deserialize_as = "DefaultOnNull")])]
#[serde_with::serde_as]
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MonitoredResource {
    #[serde(rename = "type")]
    pub kind: String,
    pub labels: HashMap<String, String>,
}

#[serde_with::apply(_ => #[serde_as(deserialize_as = "DefaultOnNull")])]
#[serde_with::serde_as]
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Metric {
    #[serde(rename = "type")]
    pub kind: String,
    pub display_name: String,
}

#[serde_with::apply(_ => #[serde_as(deserialize_as = "DefaultOnNull")])]
#[serde_with::serde_as]
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Condition {
    pub name: String,
    pub display_name: String,
    pub condition_threshold: ConditionThreshold,
}

#[serde_with::apply(_ => #[serde_as(deserialize_as = "DefaultOnNull")])]
#[serde_with::serde_as]
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ConditionThreshold {
    pub filter: String,
    pub comparison: String,
    pub threshold_value: f64,
    pub duration: String,
    pub trigger: Trigger,
}

#[serde_with::apply(_ => #[serde_as(deserialize_as = "DefaultOnNull")])]
#[serde_with::serde_as]
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Trigger {
    pub count: i64,
}

#[serde_with::apply(_ => #[serde_as(deserialize_as = "DefaultOnNull")])]
#[serde_with::serde_as]
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Documentation {
    pub content: String,
    pub mime_type: String,
}
