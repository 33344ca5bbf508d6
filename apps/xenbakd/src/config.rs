#![allow(dead_code)]
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use xenbakd_core::{Job, JobMode, PartialSettings, ReportWhen, Schedule, VmPattern};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct GeneralConfig {
    pub log_level: String,
    /// identifies this host in notifications and healthchecks.io slugs;
    /// empty means "ask the OS" at startup
    pub hostname: String,
}

impl Default for GeneralConfig {
    fn default() -> GeneralConfig {
        GeneralConfig {
            log_level: "info".into(),
            hostname: String::default(),
        }
    }
}

/// connection details for the pool this daemon drives `xe` against
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct HypervisorConfig {
    pub server: String,
    pub username: String,
    pub password: String,
}

impl Default for HypervisorConfig {
    fn default() -> HypervisorConfig {
        HypervisorConfig {
            server: "localhost".into(),
            username: String::default(),
            password: String::default(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LocalStorageConfig {
    pub enabled: bool,
    pub name: String,
    pub path: String,
}

impl Default for LocalStorageConfig {
    fn default() -> LocalStorageConfig {
        LocalStorageConfig {
            enabled: false,
            name: String::default(),
            path: String::default(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct StorageConfig {
    pub local: Vec<LocalStorageConfig>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct MailMonitoringConfig {
    pub enabled: bool,
    pub smtp_server: String,
    pub smtp_port: u16,
    pub smtp_user: String,
    pub smtp_password: String,
    pub smtp_from: String,
    pub smtp_to: Vec<String>,
}

impl Default for MailMonitoringConfig {
    fn default() -> MailMonitoringConfig {
        MailMonitoringConfig {
            enabled: false,
            smtp_server: String::default(),
            smtp_port: 587,
            smtp_user: String::default(),
            smtp_password: String::default(),
            smtp_from: String::default(),
            smtp_to: vec![],
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct HealthchecksMonitoringConfig {
    pub enabled: bool,
    pub server: String,
    pub api_key: String,
    pub grace: u64,
    pub max_retries: u32,
}

impl Default for HealthchecksMonitoringConfig {
    fn default() -> HealthchecksMonitoringConfig {
        HealthchecksMonitoringConfig {
            enabled: false,
            server: "https://healthchecks.io".into(),
            api_key: String::default(),
            grace: 3600,
            max_retries: 3,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct MonitoringConfig {
    pub mail: MailMonitoringConfig,
    pub healthchecks: HealthchecksMonitoringConfig,
}

/// one cron trigger for a job (§3's Schedule, split out from the job it belongs to
/// so a job can run on more than one cadence with its own per-schedule overrides)
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ScheduleConfig {
    pub id: String,
    pub cron: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

impl Default for ScheduleConfig {
    fn default() -> ScheduleConfig {
        ScheduleConfig {
            id: "default".into(),
            cron: "0 0 0 * * *".into(),
            enabled: true,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct JobConfig {
    pub enabled: bool,
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub mode: JobMode,
    pub schedules: Vec<ScheduleConfig>,
    pub remotes: Vec<String>,
    #[serde(default)]
    pub srs: Vec<String>,
    pub tag_filter: Vec<String>,
    pub tag_filter_exclude: Vec<String>,
    pub concurrency: usize,
    pub compression: Option<String>,
    /// per-scope overrides keyed by vm uuid, schedule id, or "" for the job default (§4.1)
    #[serde(default)]
    pub settings: HashMap<String, PartialSettingsConfig>,
}

impl Default for JobConfig {
    fn default() -> JobConfig {
        JobConfig {
            enabled: false,
            id: String::default(),
            name: String::default(),
            mode: JobMode::Full,
            schedules: vec![ScheduleConfig::default()],
            remotes: vec![],
            srs: vec![],
            tag_filter: vec![],
            tag_filter_exclude: vec![],
            concurrency: 1,
            compression: None,
            settings: HashMap::new(),
        }
    }
}

/// the TOML-facing mirror of `xenbakd_core::PartialSettings` — kept separate
/// so the wire/config shape doesn't change the moment the core crate's
/// resolver internals do
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct PartialSettingsConfig {
    pub delete_first: Option<bool>,
    pub export_retention: Option<u32>,
    pub snapshot_retention: Option<u32>,
    pub report_when: Option<ReportWhen>,
    pub vm_timeout_ms: Option<u64>,
}

impl From<PartialSettingsConfig> for PartialSettings {
    fn from(c: PartialSettingsConfig) -> Self {
        PartialSettings {
            delete_first: c.delete_first,
            export_retention: c.export_retention,
            snapshot_retention: c.snapshot_retention,
            report_when: c.report_when,
            vm_timeout_ms: c.vm_timeout_ms,
        }
    }
}

impl JobConfig {
    pub fn to_core_job(&self) -> Job {
        Job {
            id: self.id.clone(),
            name: self.name.clone(),
            mode: self.mode,
            compression: self.compression.clone(),
            vms: VmPattern {
                tag_filter: self.tag_filter.clone(),
                tag_filter_exclude: self.tag_filter_exclude.clone(),
            },
            remotes: Some(self.remotes.clone()),
            srs: Some(self.srs.clone()),
            concurrency: self.concurrency.max(1),
            settings: self
                .settings
                .iter()
                .map(|(scope, s)| (scope.clone(), s.clone().into()))
                .collect(),
        }
    }

    pub fn to_core_schedules(&self) -> Vec<Schedule> {
        self.schedules
            .iter()
            .map(|s| Schedule {
                id: s.id.clone(),
                job_id: self.id.clone(),
                cron: s.cron.clone(),
                enabled: s.enabled,
            })
            .collect()
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct AppConfig {
    pub general: GeneralConfig,
    pub hypervisor: HypervisorConfig,
    pub storage: StorageConfig,
    pub monitoring: MonitoringConfig,
    pub jobs: Vec<JobConfig>,
}
