use serde::Serialize;

use crate::error::XApiCliError;

use super::FromCliOutput;

#[derive(Debug, Default, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VIF {
    pub uuid: String,
    pub vm_uuid: String,
    pub device: String,
    pub network_uuid: String,
}

impl FromCliOutput for VIF {
    fn from_cli_output(output: &str) -> Result<VIF, XApiCliError> {
        let mut vif = VIF::default();

        for line in output.trim().lines() {
            let parts: Vec<&str> = line.splitn(2, ':').collect();
            if parts.len() != 2 {
                continue;
            }
            let key = parts[0].trim().split(' ').next().unwrap();
            let value = parts[1].trim();

            match key {
                "uuid" => vif.uuid = value.to_string(),
                "vm-uuid" => vif.vm_uuid = value.to_string(),
                "device" => vif.device = value.to_string(),
                "network-uuid" => vif.network_uuid = value.to_string(),
                _ => {}
            }
        }

        Ok(vif)
    }
}
