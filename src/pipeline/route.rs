//! Destination resolution from static defaults and envelope attributes.

use std::collections::HashMap;

use crate::base::types::{CHANNEL_ATTRIBUTE, Route, TEAM_ATTRIBUTE};

/// Resolve the effective destination for an envelope.
///
/// A non-empty `team` or `channel` attribute replaces the corresponding default.
pub fn resolve(default: &Route, attributes: &HashMap<String, String>) -> Route {
    let team = attribute(attributes, TEAM_ATTRIBUTE).unwrap_or(&default.team).to_string();
    let channel = attribute(attributes, CHANNEL_ATTRIBUTE).map(str::to_string).or_else(|| default.channel.clone());

    Route { team, channel }
}

fn attribute<'a>(attributes: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    attributes.get(key).map(String::as_str).filter(|v| !v.is_empty())
}
