//! The persisted data model: one [`StateDocument`] per template.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const CURRENT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateDocument {
    pub version: u32,
    pub serial: u64,
    pub lineage: String,
    pub builder_version: String,
    pub engine_version: String,
    pub template: TemplateRecord,
    pub builds: BTreeMap<String, BuildRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_run: Option<RunInfo>,
}

impl StateDocument {
    /// A brand-new document for a template that has never been built.
    pub fn new(lineage: String, builder_version: String) -> Self {
        Self {
            version: CURRENT_VERSION,
            serial: 0,
            lineage,
            builder_version,
            engine_version: String::new(),
            template: TemplateRecord::default(),
            builds: BTreeMap::new(),
            last_run: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TemplateRecord {
    pub path: String,
    pub hash: String,
    pub variables: BTreeMap<String, String>,
    pub files: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunInfo {
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildStatus {
    Pending,
    Creating,
    Provisioning,
    PostProcessing,
    Complete,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Complete,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildRecord {
    pub name: String,
    #[serde(rename = "type")]
    pub build_type: String,
    pub status: BuildStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance: Option<InstanceRecord>,
    pub provisioners: Vec<StepRecord>,
    #[serde(default)]
    pub post_processors: Vec<StepRecord>,
    #[serde(default)]
    pub artifacts: Vec<ArtifactRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl BuildRecord {
    pub fn new(name: impl Into<String>, build_type: impl Into<String>, step_types: &[(&str, &str)]) -> Self {
        Self {
            name: name.into(),
            build_type: build_type.into(),
            status: BuildStatus::Pending,
            instance: None,
            provisioners: step_types
                .iter()
                .map(|(t, n)| StepRecord::pending(*t, *n))
                .collect(),
            post_processors: Vec::new(),
            artifacts: Vec::new(),
            error: None,
            started_at: None,
            completed_at: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    #[serde(rename = "type")]
    pub step_type: String,
    pub name: String,
    pub status: StepStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
}

impl StepRecord {
    pub fn pending(step_type: &str, name: &str) -> Self {
        Self {
            step_type: step_type.to_string(),
            name: name.to_string(),
            status: StepStatus::Pending,
            error: None,
            started_at: None,
            ended_at: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InstanceRecord {
    pub id: String,
    pub builder_id: String,
    pub provider: String,
    pub region: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub private_ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_user: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_key_path: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub keep_on_failure: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArtifactRecord {
    pub id: String,
    pub builder_id: String,
    #[serde(rename = "type")]
    pub artifact_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    pub files: Vec<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}
