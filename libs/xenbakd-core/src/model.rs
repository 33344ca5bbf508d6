use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// full vs delta export, selected per job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobMode {
    Full,
    Delta,
}

impl Default for JobMode {
    fn default() -> Self {
        JobMode::Full
    }
}

/// when a job run should trigger external notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportWhen {
    Always,
    Failure,
    Never,
}

impl Default for ReportWhen {
    fn default() -> Self {
        ReportWhen::Failure
    }
}

/// matches VMs by tag, the way `xe vm-list tags:contains=...` does
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VmPattern {
    pub tag_filter: Vec<String>,
    pub tag_filter_exclude: Vec<String>,
}

/// a partial settings record as it appears at one scope key; `None` means
/// "not set at this scope", distinct from the knob's documented default
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PartialSettings {
    pub delete_first: Option<bool>,
    pub export_retention: Option<u32>,
    pub snapshot_retention: Option<u32>,
    pub report_when: Option<ReportWhen>,
    pub vm_timeout_ms: Option<u64>,
}

/// fully merged settings for one lookup (C1's output shape)
#[derive(Debug, Clone, Copy)]
pub struct Settings {
    pub delete_first: bool,
    pub export_retention: u32,
    pub snapshot_retention: u32,
    pub report_when: ReportWhen,
    pub vm_timeout_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            delete_first: false,
            export_retention: 0,
            snapshot_retention: 0,
            report_when: ReportWhen::Failure,
            vm_timeout_ms: 0,
        }
    }
}

/// job-default scope key, per §4.1 ("" = job default)
pub const JOB_DEFAULT_SCOPE: &str = "";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub name: String,
    pub mode: JobMode,
    pub compression: Option<String>,
    pub vms: VmPattern,
    pub remotes: Option<Vec<String>>,
    pub srs: Option<Vec<String>>,
    pub concurrency: usize,
    #[serde(default)]
    pub settings: HashMap<String, PartialSettings>,
}

impl Job {
    /// resolves the scope-key chain the settings resolver walks for a given VM/schedule
    pub fn scope_chain(&self, vm_uuid: &str, schedule_id: &str) -> Vec<String> {
        vec![
            vm_uuid.to_string(),
            schedule_id.to_string(),
            JOB_DEFAULT_SCOPE.to_string(),
        ]
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schedule {
    pub id: String,
    pub job_id: String,
    pub cron: String,
    pub enabled: bool,
}
