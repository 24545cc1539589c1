//! Cloud Build status notification, as published on the `cloud-builds` topic.
//!
//! Only a handful of fields feed the formatted message; the rest are kept so the
//! record mirrors the wire shape.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_with::DefaultOnNull;

#[serde_with::apply(_ => #[serde_as(deserialize_as = "DefaultOnNull")])]
#[serde_with::serde_as]
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BuildStatusRecord {
    pub id: String,
    pub project_id: String,
    pub status: String,
    pub source: BuildSource,
    pub steps: Vec<BuildStep>,
    pub results: BuildResults,
    pub create_time: Option<DateTime<Utc>>,
    pub start_time: Option<DateTime<Utc>>,
    pub finish_time: Option<DateTime<Utc>>,
    pub timeout: String,
    pub images: Vec<String>,
    pub artifacts: BuildArtifacts,
    pub logs_bucket: String,
    pub source_provenance: SourceProvenance,
    pub build_trigger_id: String,
    pub options: BuildOptions,
    pub log_url: String,
    pub substitutions: Substitutions,
    pub tags: Vec<String>,
    pub timing: BuildTiming,
}

#[serde_with::apply(_ => #[serde_as(deserialize_as = "DefaultOnNull")])]
#[serde_with::serde_as]
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BuildSource {
    pub repo_source: RepoSource,
}

#[serde_with::apply(_ => #[serde_as(deserialize_as = "DefaultOnNull")])]
#[serde_with::serde_as]
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RepoSource {
    pub project_id: String,
    pub repo_name: String,
    pub branch_name: String,
}

/// A start/end pair used throughout the build record.
#[serde_with::apply(_ => #[serde_as(deserialize_as = "DefaultOnNull")])]
#[serde_with::serde_as]
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TimeSpan {
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

#[serde_with::apply(_ => #[serde_as(deserialize_as = "DefaultOnNull")])]
#[serde_with::serde_as]
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BuildStep {
    pub name: String,
    pub args: Vec<String>,
    pub timing: TimeSpan,
    pub pull_timing: TimeSpan,
    pub status: String,
}

#[serde_with::apply(_ => #[serde_as(deserialize_as = "DefaultOnNull")])]
#[serde_with::serde_as]
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BuildResults {
    pub images: Vec<BuiltImage>,
    pub build_step_images: Vec<String>,
}

#[serde_with::apply(_ => #[serde_as(deserialize_as = "DefaultOnNull")])]
#[serde_with::serde_as]
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BuiltImage {
    pub name: String,
    pub digest: String,
    pub push_timing: TimeSpan,
}

#[serde_with::apply(_ => #[serde_as(deserialize_as = "DefaultOnNull")])]
#[serde_with::serde_as]
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BuildArtifacts {
    pub images: Vec<String>,
}

#[serde_with::apply(_ => #[serde_as(deserialize_as = "DefaultOnNull")])]
#[serde_with::serde_as]
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SourceProvenance {
    pub resolved_repo_source: ResolvedRepoSource,
}

#[serde_with::apply(_ => #[serde_as(deserialize_as = "DefaultOnNull")])]
#[serde_with::serde_as]
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ResolvedRepoSource {
    pub project_id: String,
    pub repo_name: String,
    pub commit_sha: String,
}

#[serde_with::apply(_ => #[serde_as(deserialize_as = "DefaultOnNull")])]
#[serde_with::serde_as]
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BuildOptions {
    pub substitution_option: String,
    pub logging: String,
}

/// Built-in substitutions filled in by the build trigger.
#[serde_with::apply(_ => #[serde_as(deserialize_as = "DefaultOnNull")])]
#[serde_with::serde_as]
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "SCREAMING_SNAKE_CASE")]
pub struct Substitutions {
    pub branch_name: String,
    pub commit_sha: String,
    pub repo_name: String,
    pub revision_id: String,
    pub short_sha: String,
}

#[serde_with::apply(_ => #[serde_as(deserialize_as = "DefaultOnNull")])]
#[serde_with::serde_as]
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "SCREAMING_SNAKE_CASE")]
pub struct BuildTiming {
    pub build: TimeSpan,
    pub fetchsource: TimeSpan,
    pub push: TimeSpan,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_consumed_fields() {
        let record: BuildStatusRecord = serde_json::from_str(
            r#"{
                "id": "b-1",
                "projectId": "p1",
                "status": "FAILURE",
                "logUrl": "https://console.cloud.google.com/cloud-build/builds/b-1",
                "substitutions": {"REPO_NAME": "r1", "BRANCH_NAME": "main", "SHORT_SHA": "abc1234"},
                "createTime": "2024-03-01T10:00:00.123456Z",
                "timing": {"BUILD": {"startTime": "2024-03-01T10:00:05Z", "endTime": "2024-03-01T10:02:05Z"}},
                "steps": [{"name": "gcr.io/cloud-builders/docker", "args": ["build", "."], "status": "FAILURE"}]
            }"#,
        )
        .unwrap();

        assert_eq!(record.project_id, "p1");
        assert_eq!(record.status, "FAILURE");
        assert_eq!(record.substitutions.repo_name, "r1");
        assert_eq!(record.substitutions.branch_name, "main");
        assert_eq!(record.substitutions.short_sha, "abc1234");
        assert_eq!(record.steps.len(), 1);
        assert!(record.timing.build.end_time.is_some());
    }

    #[test]
    fn missing_and_null_fields_are_zero_values() {
        let record: BuildStatusRecord = serde_json::from_str(r#"{"projectId": null, "substitutions": null, "status": "QUEUED"}"#).unwrap();

        assert_eq!(record.project_id, "");
        assert_eq!(record.substitutions, Substitutions::default());
        assert_eq!(record.log_url, "");
        assert_eq!(record.create_time, None);
    }

    #[test]
    fn null_anywhere_is_a_zero_value() {
        let record: BuildStatusRecord = serde_json::from_str(
            r#"{
                "status": "SUCCESS",
                "tags": null,
                "steps": null,
                "images": null,
                "timeout": null,
                "createTime": null,
                "source": {"repoSource": null},
                "results": {"images": [{"name": null, "pushTiming": null}]},
                "substitutions": {"COMMIT_SHA": null, "REPO_NAME": "r1"},
                "timing": {"BUILD": {"startTime": null, "endTime": null}, "PUSH": null}
            }"#,
        )
        .unwrap();

        assert_eq!(record.status, "SUCCESS");
        assert!(record.tags.is_empty());
        assert!(record.steps.is_empty());
        assert!(record.images.is_empty());
        assert_eq!(record.source, BuildSource::default());
        assert_eq!(record.results.images[0], BuiltImage::default());
        assert_eq!(record.substitutions.repo_name, "r1");
        assert_eq!(record.substitutions.commit_sha, "");
        assert_eq!(record.timing, BuildTiming::default());
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let record: BuildStatusRecord = serde_json::from_str(r#"{"status": "SUCCESS", "approval": {"state": "APPROVED"}, "queueTtl": "3600s"}"#).unwrap();
        assert_eq!(record.status, "SUCCESS");
    }

    #[test]
    fn malformed_json_is_rejected() {
        assert!(serde_json::from_str::<BuildStatusRecord>(r#"{"status": "SUCCESS""#).is_err());
        assert!(serde_json::from_str::<BuildStatusRecord>(r#"{"status": 7}"#).is_err());
    }
}
