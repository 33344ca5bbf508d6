use std::collections::HashMap;

use crate::model::{PartialSettings, ReportWhen, Settings};

/// walks `scopes` in order; the first scope whose record defines the knob wins,
/// otherwise the knob's documented default applies. No implicit global state —
/// every call site passes its own scope list (§4.1).
pub fn resolve(settings: &HashMap<String, PartialSettings>, scopes: &[&str]) -> Settings {
    Settings {
        delete_first: get(settings, scopes, |s| s.delete_first).unwrap_or(false),
        export_retention: get(settings, scopes, |s| s.export_retention).unwrap_or(0),
        snapshot_retention: get(settings, scopes, |s| s.snapshot_retention).unwrap_or(0),
        report_when: get(settings, scopes, |s| s.report_when).unwrap_or(ReportWhen::Failure),
        vm_timeout_ms: get(settings, scopes, |s| s.vm_timeout_ms).unwrap_or(0),
    }
}

fn get<T: Copy>(
    settings: &HashMap<String, PartialSettings>,
    scopes: &[&str],
    knob: impl Fn(&PartialSettings) -> Option<T>,
) -> Option<T> {
    for scope in scopes {
        if let Some(partial) = settings.get(*scope) {
            if let Some(value) = knob(partial) {
                return Some(value);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::JOB_DEFAULT_SCOPE;

    #[test]
    fn first_matching_scope_wins() {
        let mut settings = HashMap::new();
        settings.insert(
            JOB_DEFAULT_SCOPE.to_string(),
            PartialSettings {
                export_retention: Some(3),
                ..Default::default()
            },
        );
        settings.insert(
            "sched-1".to_string(),
            PartialSettings {
                export_retention: Some(5),
                delete_first: Some(true),
                ..Default::default()
            },
        );

        let resolved = resolve(&settings, &["vm-uuid", "sched-1", JOB_DEFAULT_SCOPE]);
        assert_eq!(resolved.export_retention, 5);
        assert!(resolved.delete_first);
    }

    #[test]
    fn falls_back_to_documented_defaults() {
        let settings = HashMap::new();
        let resolved = resolve(&settings, &["vm-uuid", "sched-1", JOB_DEFAULT_SCOPE]);
        assert_eq!(resolved.export_retention, 0);
        assert_eq!(resolved.snapshot_retention, 0);
        assert!(!resolved.delete_first);
        assert_eq!(resolved.report_when, ReportWhen::Failure);
        assert_eq!(resolved.vm_timeout_ms, 0);
    }

    #[test]
    fn vm_scope_overrides_schedule_and_job_default() {
        let mut settings = HashMap::new();
        settings.insert(
            JOB_DEFAULT_SCOPE.to_string(),
            PartialSettings {
                export_retention: Some(1),
                ..Default::default()
            },
        );
        settings.insert(
            "vm-uuid".to_string(),
            PartialSettings {
                export_retention: Some(9),
                ..Default::default()
            },
        );

        let resolved = resolve(&settings, &["vm-uuid", "sched-1", JOB_DEFAULT_SCOPE]);
        assert_eq!(resolved.export_retention, 9);
    }
}
