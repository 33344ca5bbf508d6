use serde::Serialize;

use crate::error::XApiCliError;

use super::FromCliOutput;

#[derive(Debug, Default, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VDI {
    pub uuid: String,
    pub name_label: String,
    pub sr_uuid: String,
    pub virtual_size: u64,
    pub is_a_snapshot: bool,
}

impl FromCliOutput for VDI {
    fn from_cli_output(output: &str) -> Result<VDI, XApiCliError> {
        let mut vdi = VDI::default();

        for line in output.trim().lines() {
            let parts: Vec<&str> = line.splitn(2, ':').collect();
            if parts.len() != 2 {
                continue;
            }
            let key = parts[0].trim().split(' ').next().unwrap();
            let value = parts[1].trim();

            match key {
                "uuid" => vdi.uuid = value.to_string(),
                "name-label" => vdi.name_label = value.to_string(),
                "sr-uuid" => vdi.sr_uuid = value.to_string(),
                "virtual-size" => vdi.virtual_size = value.parse().unwrap_or_default(),
                "is-a-snapshot" => vdi.is_a_snapshot = value.parse().unwrap_or_default(),
                _ => {}
            }
        }

        Ok(vdi)
    }
}
