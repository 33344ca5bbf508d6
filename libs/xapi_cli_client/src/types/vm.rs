use std::collections::HashMap;
use std::str::FromStr;

use serde::Serialize;

use crate::error::XApiCliError;

use super::{parse_timestamp, FromCliOutput};

#[derive(Debug, Default, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VM {
    pub uuid: String,
    pub name_label: String,
    pub name_description: String,
    pub is_a_template: bool,
    pub is_default_template: bool,
    pub is_a_snapshot: bool,
    pub is_control_domain: bool,
    pub power_state: String,
    pub snapshot_time: chrono::DateTime<chrono::Utc>,
    pub snapshot_of: String,
    pub other_config: HashMap<String, String>,
    pub tags: Vec<String>,
}

impl VM {
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.other_config.get(key).map(String::as_str)
    }
}

impl FromCliOutput for VM {
    /// create a new VM struct from `xe vm-param-list` stdout
    fn from_cli_output(output: &str) -> Result<VM, XApiCliError> {
        let output = output.trim();
        let mut vm = VM::default();

        for line in output.lines() {
            let parts: Vec<&str> = line.splitn(2, ':').collect();
            if parts.len() != 2 {
                continue;
            }
            let key = parts[0].trim().split(' ').next().unwrap();
            let value = parts[1].trim();

            match key {
                "uuid" => vm.uuid = value.to_string(),
                "name-label" => vm.name_label = value.to_string(),
                "name-description" => vm.name_description = value.to_string(),
                "power-state" => vm.power_state = value.to_string(),
                "is-a-template" => vm.is_a_template = bool::from_str(value).unwrap_or_default(),
                "is-default-template" => {
                    vm.is_default_template = bool::from_str(value).unwrap_or_default()
                }
                "is-a-snapshot" => vm.is_a_snapshot = bool::from_str(value).unwrap_or_default(),
                "is-control-domain" => {
                    vm.is_control_domain = bool::from_str(value).unwrap_or_default()
                }
                "snapshot-time" => {
                    if !value.is_empty() {
                        vm.snapshot_time = parse_timestamp(value)?;
                    }
                }
                "snapshot-of" => vm.snapshot_of = value.to_string(),
                "tags" => {
                    vm.tags = value
                        .split(';')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect()
                }
                "other-config" => vm.other_config = parse_map(value),
                _ => {}
            }
        }

        Ok(vm)
    }
}

/// parses xe's `k1: v1; k2: v2` map rendering
fn parse_map(value: &str) -> HashMap<String, String> {
    value
        .split(';')
        .filter_map(|pair| {
            let mut kv = pair.splitn(2, ':');
            let k = kv.next()?.trim();
            let v = kv.next()?.trim();
            if k.is_empty() {
                return None;
            }
            Some((k.to_string(), v.to_string()))
        })
        .collect()
}
