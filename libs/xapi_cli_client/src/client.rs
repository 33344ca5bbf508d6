use std::collections::HashMap;
use std::process::Stdio;

use tokio::process::{Child, Command as AsyncCommand};

use crate::error::XApiCliError;
use crate::http::{RawVdiExport, RawVdiImport, XApiSession};
use crate::types::vbd::VBD;
use crate::types::vdi::VDI;
use crate::types::vif::VIF;
use crate::types::vm::VM;
use crate::types::{clean_stdout, FromCliOutput, Uuid, Uuids};

#[derive(Debug, Clone)]
pub enum SnapshotType {
    Normal,
    Memory,
}

impl ToString for SnapshotType {
    fn to_string(&self) -> String {
        match self {
            SnapshotType::Normal => "vm-snapshot".to_string(),
            SnapshotType::Memory => "vm-checkpoint".to_string(),
        }
    }
}

/// connection details for a single pool, as handed to every `xe` invocation
#[derive(Debug, Clone, Eq, Hash, PartialEq)]
pub struct XenConfig {
    pub server: String,
    pub username: String,
    pub password: String,
}

/// thin async wrapper around the `xe` CLI binary
#[derive(Debug, Clone)]
pub struct XApiCliClient {
    config: XenConfig,
}

impl XApiCliClient {
    pub fn new(config: XenConfig) -> Self {
        XApiCliClient { config }
    }

    fn base_command(&self) -> AsyncCommand {
        let mut command = AsyncCommand::new("xe");

        if self.config.server == "localhost" || self.config.server == "127.0.0.1" {
            command.arg("-s").arg("127.0.0.1");
        } else {
            command
                .arg("-s")
                .arg(&self.config.server)
                .arg("-u")
                .arg(&self.config.username)
                .arg("-pw")
                .arg(&self.config.password);
        }

        command
    }

    async fn run(&self, args: &[String]) -> Result<String, XApiCliError> {
        let output = self.base_command().args(args).output().await?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            Err(XApiCliError::CommandFailed(
                String::from_utf8_lossy(&output.stderr).into_owned(),
            ))
        }
    }

    /// filter by tags and return matching VMs, excluding anything carrying `excluded_tags`
    pub async fn filter_vms_by_tag(
        &self,
        tags: Vec<String>,
        excluded_tags: Vec<String>,
    ) -> Result<Vec<VM>, XApiCliError> {
        let mut args = vec![
            "vm-list".to_string(),
            "is-a-template=false".to_string(),
            "is-a-snapshot=false".to_string(),
            "is-control-domain=false".to_string(),
            "--minimal".to_string(),
        ];
        if !tags.is_empty() {
            args.push(format!("tags:contains={}", tags.join(",")));
        }
        let tagged_uuids = Uuids::from_cli_output(&self.run(&args).await?)?;

        let excluded_uuids = if excluded_tags.is_empty() {
            vec![]
        } else {
            let args = vec![
                "vm-list".to_string(),
                "is-a-template=false".to_string(),
                "is-a-snapshot=false".to_string(),
                "is-control-domain=false".to_string(),
                format!("tags:contains={}", excluded_tags.join(",")),
                "--minimal".to_string(),
            ];
            Uuids::from_cli_output(&self.run(&args).await?)?
        };

        let mut vms = vec![];
        for uuid in tagged_uuids {
            if excluded_uuids.contains(&uuid) {
                continue;
            }
            vms.push(self.get_vm_by_uuid(&uuid).await?);
        }
        Ok(vms)
    }

    pub async fn get_vm_by_uuid(&self, vm_uuid: &str) -> Result<VM, XApiCliError> {
        let output = self
            .run(&["vm-param-list".to_string(), format!("uuid={vm_uuid}")])
            .await?;
        VM::from_cli_output(&output)
    }

    /// lists snapshots whose `other-config` carries `other_config_key=value`
    pub async fn list_snapshots_by_tag(
        &self,
        other_config_key: &str,
        value: &str,
    ) -> Result<Vec<VM>, XApiCliError> {
        let output = self
            .run(&[
                "snapshot-list".to_string(),
                format!("other-config:{other_config_key}={value}"),
                "--minimal".to_string(),
            ])
            .await?;
        let uuids = Uuids::from_cli_output(&output)?;
        let mut snapshots = vec![];
        for uuid in uuids {
            snapshots.push(self.get_snapshot_by_uuid(&uuid).await?);
        }
        Ok(snapshots)
    }

    pub async fn get_snapshot_by_uuid(&self, uuid: &str) -> Result<VM, XApiCliError> {
        let output = self
            .run(&["snapshot-param-list".to_string(), format!("uuid={uuid}")])
            .await?;
        VM::from_cli_output(&output)
    }

    pub async fn snapshot(
        &self,
        vm_uuid: &str,
        label: &str,
        snapshot_type: SnapshotType,
    ) -> Result<VM, XApiCliError> {
        let output = self
            .run(&[
                snapshot_type.to_string(),
                format!("vm={vm_uuid}"),
                format!("new-name-label={label}"),
            ])
            .await;

        let output = match output {
            Ok(o) => o,
            Err(e) => return Err(XApiCliError::SnapshotFailure(e.to_string())),
        };

        let uuid = Uuid::from_cli_output(&output)?;
        self.get_snapshot_by_uuid(&uuid).await
    }

    pub async fn delete_snapshot(&self, snapshot_uuid: &str) -> Result<(), XApiCliError> {
        self.run(&[
            "snapshot-uninstall".to_string(),
            format!("uuid={snapshot_uuid}"),
            "force=true".to_string(),
        ])
        .await?;
        Ok(())
    }

    pub async fn set_snapshot_param_not_template(
        &self,
        snapshot_uuid: &str,
    ) -> Result<(), XApiCliError> {
        self.run(&[
            "snapshot-param-set".to_string(),
            "is-a-template=false".to_string(),
            format!("uuid={snapshot_uuid}"),
        ])
        .await?;
        Ok(())
    }

    pub async fn set_snapshot_name(
        &self,
        snapshot_uuid: &str,
        name: &str,
    ) -> Result<(), XApiCliError> {
        self.run(&[
            "snapshot-param-set".to_string(),
            format!("uuid={snapshot_uuid}"),
            format!("name-label={name}"),
        ])
        .await?;
        Ok(())
    }

    /// clear the three `xo:backup:*` keys from a live VM's `other-config`
    pub async fn clear_other_config_keys(
        &self,
        vm_uuid: &str,
        keys: &[&str],
    ) -> Result<(), XApiCliError> {
        for key in keys {
            // xe tolerates clearing a key that isn't set
            let _ = self
                .run(&[
                    "vm-param-remove".to_string(),
                    format!("uuid={vm_uuid}"),
                    "param-name=other-config".to_string(),
                    format!("param-key={key}"),
                ])
                .await;
        }
        Ok(())
    }

    pub async fn set_other_config(
        &self,
        object_kind: ObjectKind,
        uuid: &str,
        entries: &HashMap<&str, String>,
    ) -> Result<(), XApiCliError> {
        for (key, value) in entries {
            self.run(&[
                object_kind.param_set_command(),
                format!("uuid={uuid}"),
                format!("other-config:{key}={value}"),
            ])
            .await?;
        }
        Ok(())
    }

    pub async fn add_tag(
        &self,
        object_kind: ObjectKind,
        uuid: &str,
        tag: &str,
    ) -> Result<(), XApiCliError> {
        self.run(&[
            object_kind.tag_add_command(),
            format!("uuid={uuid}"),
            "param-name=tags".to_string(),
            format!("param-key={tag}"),
        ])
        .await?;
        Ok(())
    }

    pub async fn block_start_operation(&self, vm_uuid: &str) -> Result<(), XApiCliError> {
        self.run(&[
            "vm-param-add".to_string(),
            format!("uuid={vm_uuid}"),
            "param-name=blocked-operations".to_string(),
            "start=blocked by xenbakd replication".to_string(),
        ])
        .await?;
        Ok(())
    }

    pub async fn set_name_label(&self, vm_uuid: &str, name: &str) -> Result<(), XApiCliError> {
        self.run(&[
            "vm-param-set".to_string(),
            format!("uuid={vm_uuid}"),
            format!("name-label={name}"),
        ])
        .await?;
        Ok(())
    }

    pub async fn list_vdis_for_vm(&self, vm_uuid: &str) -> Result<Vec<VDI>, XApiCliError> {
        let vbds = self.list_vbds_for_vm(vm_uuid).await?;
        let mut vdis = vec![];
        for vbd in vbds {
            if vbd.vdi_uuid.is_empty() {
                continue;
            }
            let output = self
                .run(&[
                    "vdi-param-list".to_string(),
                    format!("uuid={}", vbd.vdi_uuid),
                ])
                .await?;
            vdis.push(VDI::from_cli_output(&output)?);
        }
        Ok(vdis)
    }

    pub async fn list_vbds_for_vm(&self, vm_uuid: &str) -> Result<Vec<VBD>, XApiCliError> {
        let output = self
            .run(&[
                "vbd-list".to_string(),
                format!("vm-uuid={vm_uuid}"),
                "--minimal".to_string(),
            ])
            .await?;
        let uuids = Uuids::from_cli_output(&output)?;
        let mut vbds = vec![];
        for uuid in uuids {
            let output = self
                .run(&["vbd-param-list".to_string(), format!("uuid={uuid}")])
                .await?;
            vbds.push(VBD::from_cli_output(&output)?);
        }
        Ok(vbds)
    }

    pub async fn list_vifs_for_vm(&self, vm_uuid: &str) -> Result<Vec<VIF>, XApiCliError> {
        let output = self
            .run(&[
                "vif-list".to_string(),
                format!("vm-uuid={vm_uuid}"),
                "--minimal".to_string(),
            ])
            .await?;
        let uuids = Uuids::from_cli_output(&output)?;
        let mut vifs = vec![];
        for uuid in uuids {
            let output = self
                .run(&["vif-param-list".to_string(), format!("uuid={uuid}")])
                .await?;
            vifs.push(VIF::from_cli_output(&output)?);
        }
        Ok(vifs)
    }

    /// spawns `xe vm-export ... filename=` with stdout piped, for streaming fan-out
    pub fn spawn_export(&self, vm_uuid: &str, compress: Option<&str>) -> Result<Child, XApiCliError> {
        let mut command = self.base_command();
        command
            .arg("vm-export")
            .arg(format!("vm={vm_uuid}"))
            .arg("filename=");

        if let Some(compress) = compress {
            command.arg(format!("compress={compress}"));
        }

        Ok(command
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?)
    }

    /// spawns `xe vm-import ... filename=/dev/stdin sr-uuid=` with stdin piped
    pub fn spawn_import(&self, sr_uuid: &str) -> Result<Child, XApiCliError> {
        let mut command = self.base_command();
        command
            .arg("vm-import")
            .arg("filename=/dev/stdin")
            .arg(format!("sr-uuid={sr_uuid}"));

        Ok(command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?)
    }

    pub async fn vm_export_to_file(
        &self,
        vm_uuid: &str,
        filename: &str,
        compress: Option<&str>,
    ) -> Result<(), XApiCliError> {
        let mut args = vec![
            "vm-export".to_string(),
            format!("filename={filename}"),
            format!("vm={vm_uuid}"),
        ];
        if let Some(compress) = compress {
            args.push(format!("compress={compress}"));
        }
        self.run(&args).await?;
        Ok(())
    }

    pub async fn delete_vm(&self, vm_uuid: &str, force_destroy_disks: bool) -> Result<(), XApiCliError> {
        if force_destroy_disks {
            self.run(&["vm-uninstall".to_string(), format!("uuid={vm_uuid}"), "force=true".to_string()])
                .await?;
        } else {
            self.run(&["vm-destroy".to_string(), format!("uuid={vm_uuid}")])
                .await?;
        }
        Ok(())
    }

    /// VDIs on `sr_uuid` that XAPI currently reports as unreadable — the
    /// ground-truth signal behind `assertHealthyVdiChains`
    pub async fn list_missing_vdi_uuids(&self, sr_uuid: &str) -> Result<Vec<String>, XApiCliError> {
        let output = self
            .run(&[
                "vdi-list".to_string(),
                format!("sr-uuid={sr_uuid}"),
                "missing=true".to_string(),
                "--minimal".to_string(),
            ])
            .await?;
        Uuids::from_cli_output(&output)
    }

    /// VMs whose `other-config` carries every `(key, value)` pair given — used
    /// to find prior replicated VMs on a target SR by their `xo:backup:*` tags
    pub async fn list_vms_by_other_config(&self, filters: &[(&str, &str)]) -> Result<Vec<VM>, XApiCliError> {
        let mut args = vec!["vm-list".to_string()];
        for (key, value) in filters {
            args.push(format!("other-config:{key}={value}"));
        }
        args.push("--minimal".to_string());
        let uuids = Uuids::from_cli_output(&self.run(&args).await?)?;
        let mut vms = vec![];
        for uuid in uuids {
            vms.push(self.get_vm_by_uuid(&uuid).await?);
        }
        Ok(vms)
    }

    /// snapshots whose `other-config` carries every `(key, value)` pair given
    pub async fn list_snapshots_by_other_config(&self, filters: &[(&str, &str)]) -> Result<Vec<VM>, XApiCliError> {
        let mut args = vec!["snapshot-list".to_string()];
        for (key, value) in filters {
            args.push(format!("other-config:{key}={value}"));
        }
        args.push("--minimal".to_string());
        let uuids = Uuids::from_cli_output(&self.run(&args).await?)?;
        let mut snapshots = vec![];
        for uuid in uuids {
            snapshots.push(self.get_snapshot_by_uuid(&uuid).await?);
        }
        Ok(snapshots)
    }

    pub async fn create_vdi(&self, sr_uuid: &str, name_label: &str, virtual_size: u64) -> Result<String, XApiCliError> {
        let output = self
            .run(&[
                "vdi-create".to_string(),
                format!("sr-uuid={sr_uuid}"),
                format!("name-label={name_label}"),
                format!("virtual-size={virtual_size}"),
                "type=user".to_string(),
            ])
            .await?;
        Ok(clean_stdout(&output))
    }

    fn http_session(&self) -> XApiSession {
        XApiSession::new(&self.config.server)
    }

    /// opens a raw per-VDI export over XAPI's HTTP data-transfer handler;
    /// `base_vdi_uuid` makes it an incremental delta against that VDI
    pub async fn spawn_export_vdi(&self, vdi_uuid: &str, base_vdi_uuid: Option<&str>) -> Result<RawVdiExport, XApiCliError> {
        self.http_session()
            .spawn_export_vdi(&self.config.username, &self.config.password, vdi_uuid, base_vdi_uuid)
            .await
    }

    /// opens a writable half that streams into a freshly created VDI's raw
    /// contents over XAPI's HTTP data-transfer handler
    pub async fn spawn_import_vdi(&self, vdi_uuid: &str) -> Result<RawVdiImport, XApiCliError> {
        self.http_session()
            .spawn_import_vdi(&self.config.username, &self.config.password, vdi_uuid)
            .await
    }

    pub async fn dynamic_command(&self, args: &[&str]) -> Result<String, XApiCliError> {
        let owned: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        Ok(clean_stdout(&self.run(&owned).await?))
    }
}

#[derive(Debug, Clone, Copy)]
pub enum ObjectKind {
    Vm,
    Snapshot,
}

impl ObjectKind {
    fn param_set_command(self) -> String {
        match self {
            ObjectKind::Vm => "vm-param-set".to_string(),
            ObjectKind::Snapshot => "snapshot-param-set".to_string(),
        }
    }

    fn tag_add_command(self) -> String {
        match self {
            ObjectKind::Vm => "vm-param-add".to_string(),
            ObjectKind::Snapshot => "snapshot-param-add".to_string(),
        }
    }
}
