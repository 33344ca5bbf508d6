use serde::Serialize;

use crate::error::XApiCliError;

use super::FromCliOutput;

#[derive(Debug, Default, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VBD {
    pub uuid: String,
    pub vm_uuid: String,
    pub vdi_uuid: String,
    pub device: String,
    pub vbd_type: String,
}

impl FromCliOutput for VBD {
    fn from_cli_output(output: &str) -> Result<VBD, XApiCliError> {
        let mut vbd = VBD::default();

        for line in output.trim().lines() {
            let parts: Vec<&str> = line.splitn(2, ':').collect();
            if parts.len() != 2 {
                continue;
            }
            let key = parts[0].trim().split(' ').next().unwrap();
            let value = parts[1].trim();

            match key {
                "uuid" => vbd.uuid = value.to_string(),
                "vm-uuid" => vbd.vm_uuid = value.to_string(),
                "vdi-uuid" => vbd.vdi_uuid = value.to_string(),
                "device" => vbd.device = value.to_string(),
                "type" => vbd.vbd_type = value.to_string(),
                _ => {}
            }
        }

        Ok(vbd)
    }
}
