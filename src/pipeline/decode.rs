//! Payload decoding.

use anyhow::Context;

use crate::{
    base::types::{EventKind, Res},
    model::{BuildStatusRecord, MonitoringIncident},
};

/// A decoded payload.
#[derive(Debug, Clone, PartialEq)]
pub enum EventRecord {
    Build(BuildStatusRecord),
    Incident(MonitoringIncident),
    Text(String),
}

/// Decode a raw payload as the given kind.
pub fn decode(kind: EventKind, payload: &[u8]) -> Res<EventRecord> {
    let record = match kind {
        EventKind::Build => EventRecord::Build(serde_json::from_slice(payload).context("Failed to decode build status payload")?),
        EventKind::Incident => EventRecord::Incident(serde_json::from_slice(payload).context("Failed to decode monitoring incident payload")?),
        EventKind::Text => EventRecord::Text(String::from_utf8(payload.to_vec()).context("Text payload is not valid UTF-8")?),
    };

    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_each_kind() {
        let build = decode(EventKind::Build, br#"{"projectId": "p1"}"#).unwrap();
        assert!(matches!(build, EventRecord::Build(b) if b.project_id == "p1"));

        let incident = decode(EventKind::Incident, br#"{"incident": {"state": "closed"}}"#).unwrap();
        assert!(matches!(incident, EventRecord::Incident(i) if i.incident.state == "closed"));

        let text = decode(EventKind::Text, "deploy finished ✅".as_bytes()).unwrap();
        assert_eq!(text, EventRecord::Text("deploy finished ✅".to_string()));
    }

    #[test]
    fn malformed_payloads_are_errors() {
        assert!(decode(EventKind::Build, b"not json").is_err());
        assert!(decode(EventKind::Incident, b"").is_err());
        assert!(decode(EventKind::Text, &[0xff, 0xfe]).is_err());
    }

    #[test]
    fn nulls_in_unused_fields_still_decode() {
        let incident = decode(EventKind::Incident, br#"{"incident": {"state": "open", "summary": null, "policy_name": null}}"#).unwrap();
        assert!(matches!(incident, EventRecord::Incident(i) if i.incident.state == "open"));

        let build = decode(EventKind::Build, br#"{"projectId": "p1", "status": "WORKING", "tags": null, "images": null}"#).unwrap();
        assert!(matches!(build, EventRecord::Build(b) if b.status == "WORKING" && b.tags.is_empty()));
    }

    #[test]
    fn foreign_payload_decodes_as_empty_incident() {
        // Shapes are permissive: a build payload decodes as an empty incident.
        let record = decode(EventKind::Incident, br#"{"projectId": "p1", "status": "SUCCESS"}"#).unwrap();
        assert!(matches!(record, EventRecord::Incident(i) if i.incident.state.is_empty()));
    }
}
