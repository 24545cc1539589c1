//! Turns decoded records into chat-ready messages.

use chrono::{Local, TimeZone};

use crate::{
    base::types::OutboundMessage,
    model::{BuildStatusRecord, MonitoringIncident},
};

use super::decode::EventRecord;

/// Channel tag attached to build status messages.
pub const BUILDS_CHANNEL_TAG: &str = "builds";
/// Channel tag attached to monitoring alerts.
pub const DEVOPS_CHANNEL_TAG: &str = "devops";

/// Rendered in place of a timestamp that has not happened yet.
pub const UNSET_TIME: &str = "-";

/// Format any decoded record.
pub fn format(record: &EventRecord) -> OutboundMessage {
    match record {
        EventRecord::Build(build) => format_build(build),
        EventRecord::Incident(incident) => format_incident(incident),
        EventRecord::Text(text) => OutboundMessage {
            body: text.clone(),
            channel_tag: None,
        },
    }
}

pub fn format_build(build: &BuildStatusRecord) -> OutboundMessage {
    let body = format!(
        "Project *{}*, Repo: *{}*, Branch: *{}*, Status: *{}*\ncheck build details: {}",
        build.project_id, build.substitutions.repo_name, build.substitutions.branch_name, build.status, build.log_url
    );

    OutboundMessage {
        body,
        channel_tag: Some(BUILDS_CHANNEL_TAG.to_string()),
    }
}

pub fn format_incident(message: &MonitoringIncident) -> OutboundMessage {
    let incident = &message.incident;

    let body = format!(
        ":rotating_light: Incident with resource *{}*.\n\
         Condition: *{}*\n\
         State: *{}*\n\
         Started: *{}*, Ended: *{}*\n\
         Documentation: {}\n\
         Check details: {}",
        incident.resource_display_name,
        incident.condition_name,
        incident.state,
        render_epoch(incident.started_at),
        render_epoch(incident.ended_at),
        incident.documentation.content,
        incident.url,
    );

    OutboundMessage {
        body,
        channel_tag: Some(DEVOPS_CHANNEL_TAG.to_string()),
    }
}

/// Render epoch seconds in the local time zone; 0 means "not yet".
pub fn render_epoch(secs: i64) -> String {
    if secs == 0 {
        return UNSET_TIME.to_string();
    }

    match Local.timestamp_opt(secs, 0).single() {
        Some(time) => time.format("%Y-%m-%d %H:%M:%S %z").to_string(),
        None => secs.to_string(),
    }
}
