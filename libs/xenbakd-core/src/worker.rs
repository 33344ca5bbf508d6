use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use xapi_cli_client::{VBD, VDI, VIF, VM};

use crate::atomic_writer::AtomicWriter;
use crate::chain;
use crate::error::{BackupError, Result};
use crate::hypervisor::{HypervisorClient, ReplicationRole};
use crate::metadata::BackupMetadata;
use crate::model::{Job, JobMode, Settings};
use crate::ops;
use crate::remote::RemoteHandler;
use crate::retention;
use crate::settings;
use crate::stream_fork;
use crate::task_log::{TaskLogger, TaskOpts};
use crate::vhd::VhdBackend;

/// the external collaborators one job run needs, bundled so the worker
/// doesn't thread five parameters through every call (§6)
pub struct JobRunContext {
    pub job: Job,
    pub hypervisor: Arc<dyn HypervisorClient>,
    pub remotes: Vec<Arc<dyn RemoteHandler>>,
    pub vhd_backend: Arc<dyn VhdBackend>,
    pub task_logger: TaskLogger,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct VmBackupOutcome {
    pub vm_uuid: String,
    pub vm_name: String,
    pub remotes_written: Vec<String>,
}

fn vm_to_json(vm: &VM) -> serde_json::Value {
    serde_json::to_value(vm).unwrap_or(serde_json::Value::Null)
}

/// races `fut` against `timeout_ms`; on expiry cancels `vm_token` so every
/// awaitable downstream of it unwinds instead of running to completion
async fn run_with_timeout<T>(
    vm_token: &CancellationToken,
    timeout_ms: u64,
    fut: impl std::future::Future<Output = Result<T>>,
) -> Result<T> {
    if timeout_ms == 0 {
        return fut.await;
    }
    tokio::select! {
        result = fut => result,
        _ = tokio::time::sleep(std::time::Duration::from_millis(timeout_ms)) => {
            vm_token.cancel();
            Err(BackupError::Timeout(std::time::Duration::from_millis(timeout_ms)))
        }
    }
}

/// copies `reader` into `writer` in chunks, unlinking the partial temp file
/// if `vm_token` fires mid-copy instead of leaving it behind
async fn copy_cancellable(
    reader: &mut stream_fork::ForkReader,
    mut writer: AtomicWriter,
    vm_token: &CancellationToken,
) -> Result<AtomicWriter> {
    let mut buf = vec![0u8; 256 * 1024];
    loop {
        tokio::select! {
            _ = vm_token.cancelled() => {
                writer.abort().await?;
                return Err(BackupError::Cancelled);
            }
            n = reader.read(&mut buf) => {
                let n = n?;
                if n == 0 {
                    break;
                }
                writer.write_all(&buf[..n]).await?;
            }
        }
    }
    Ok(writer)
}

/// runs the full ready → snapshotting → exporting → transferring/rotating →
/// done|failed lifecycle for one VM (C8). `vm_token` is this VM's own fork of
/// the job's cancellation token (§5); `vmTimeout` races it.
pub async fn backup_vm(
    ctx: &JobRunContext,
    vm: VM,
    schedule_id: &str,
    parent_task: Uuid,
    vm_token: CancellationToken,
) -> Result<VmBackupOutcome> {
    let vm_label = vm.name_label.clone();
    let vm_uuid = vm.uuid.clone();

    ctx.task_logger
        .wrap_fn(
            TaskOpts {
                parent_id: Some(parent_task),
                message: format!("backup vm {vm_label}"),
                data: serde_json::json!({ "vmUuid": vm_uuid }),
            },
            move |task_id| async move { run_backup(ctx, vm, schedule_id, task_id, vm_token).await },
        )
        .await
}

async fn run_backup(
    ctx: &JobRunContext,
    vm: VM,
    schedule_id: &str,
    task_id: Uuid,
    vm_token: CancellationToken,
) -> Result<VmBackupOutcome> {
    let settings = settings::resolve(&ctx.job.settings, &ctx.job.scope_chain(&vm.uuid, schedule_id));

    if settings.export_retention == 0 && settings.snapshot_retention == 0 {
        return Err(BackupError::InvalidConfig(
            "both exportRetention and snapshotRetention are 0 — this job would retain nothing".into(),
        ));
    }
    let srs = ctx.job.srs.clone().unwrap_or_default();
    if settings.export_retention > 0 && ctx.remotes.is_empty() && srs.is_empty() {
        return Err(BackupError::InvalidConfig(
            "exportRetention > 0 but job has no remotes or SRs configured".into(),
        ));
    }

    let timestamp = Utc::now();

    // step 1: strip stale backup bookkeeping a prior crashed run may have left
    ctx.hypervisor.clear_backup_tags(&vm.uuid).await?;

    // step 3: prior snapshots for this job, oldest first
    let mut prior_snapshots = ctx.hypervisor.list_snapshots_for_job(&ctx.job.id, &vm.uuid).await?;
    prior_snapshots.sort_by_key(|s| s.snapshot_time);

    // step 4: abort this VM, not the whole job, if its VDI chain is unhealthy
    let vdis = ctx.hypervisor.list_vdis(&vm.uuid).await?;
    ctx.hypervisor.assert_healthy_vdi_chains(&vdis).await?;

    // step 5: snapshot, then tag it before anything else can see it
    let label = format!("[XO Backup {}] {}", ctx.job.name, vm.name_label);
    let snapshot = ctx
        .task_logger
        .wrap(
            TaskOpts {
                parent_id: Some(task_id),
                message: "snapshot".into(),
                data: serde_json::json!({ "vmUuid": vm.uuid }),
            },
            ctx.hypervisor.snapshot(&vm, &label),
        )
        .await?;
    ctx.hypervisor.set_snapshot_not_template(&snapshot.uuid).await?;
    ctx.hypervisor
        .tag_snapshot(&snapshot.uuid, &ctx.job.id, schedule_id, &vm.uuid)
        .await?;

    // step 6: barrier — force the local view to settle before reading it back
    ctx.hypervisor.barrier(&snapshot.uuid).await?;

    // step 7/8/9: a snapshot-only job (exportRetention == 0) skips the transfer
    let transfer_result: Result<Vec<String>> = if settings.export_retention == 0 {
        Ok(vec![])
    } else {
        let base_snapshot = prior_snapshots.last().cloned();
        ctx.task_logger
            .wrap(
                TaskOpts {
                    parent_id: Some(task_id),
                    message: "tranfer".into(),
                    data: serde_json::json!({ "vmUuid": vm.uuid, "mode": ctx.job.mode }),
                },
                run_with_timeout(
                    &vm_token,
                    settings.vm_timeout_ms,
                    export_and_transfer(
                        ctx,
                        &vm,
                        &snapshot,
                        &vdis,
                        base_snapshot.as_ref(),
                        &settings,
                        timestamp,
                        schedule_id,
                        task_id,
                        &vm_token,
                    ),
                ),
            )
            .await
    };

    // step 5 cont'd: deferred cleanup, regardless of transfer outcome — only
    // snapshots beyond snapshotRetention are actually deleted
    let cleanup_result = cleanup_snapshots(
        ctx.hypervisor.as_ref(),
        prior_snapshots,
        &snapshot,
        settings.snapshot_retention,
    )
    .await;

    let remotes_written = transfer_result?;
    cleanup_result?;

    Ok(VmBackupOutcome {
        vm_uuid: vm.uuid,
        vm_name: vm.name_label,
        remotes_written,
    })
}

/// deletes every tagged snapshot beyond `retention`, oldest first (I3/P5). A
/// retention of 0 means delete all of them, including the one just taken —
/// the inverse of export retention's "0 = keep nothing new" semantics, since
/// here there's no payload to keep regardless.
async fn cleanup_snapshots(
    hypervisor: &dyn HypervisorClient,
    mut prior: Vec<VM>,
    new_snapshot: &VM,
    retention: u32,
) -> Result<()> {
    prior.push(new_snapshot.clone());
    prior.sort_by_key(|s| s.snapshot_time);

    let stale = if retention == 0 {
        prior
    } else {
        retention::old_entries(retention, &prior)
    };
    for snap in stale {
        hypervisor.delete_snapshot(&snap.uuid).await?;
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn export_and_transfer(
    ctx: &JobRunContext,
    vm: &VM,
    snapshot: &VM,
    vdis: &[VDI],
    base_snapshot: Option<&VM>,
    settings: &Settings,
    timestamp: DateTime<Utc>,
    schedule_id: &str,
    task_id: Uuid,
    vm_token: &CancellationToken,
) -> Result<Vec<String>> {
    let srs = ctx.job.srs.clone().unwrap_or_default();
    let remotes_configured = !ctx.remotes.is_empty();
    let srs_configured = !srs.is_empty();

    if !remotes_configured && !srs_configured {
        return Err(BackupError::InvalidConfig("job has no configured remotes or SRs".into()));
    }

    let mut written = vec![];
    let mut first_err: Option<BackupError> = None;

    if remotes_configured {
        let result = match ctx.job.mode {
            JobMode::Full => export_full_to_remotes(ctx, vm, snapshot, settings, timestamp, schedule_id, task_id, vm_token).await,
            JobMode::Delta => {
                export_delta_to_remotes(
                    ctx,
                    vm,
                    snapshot,
                    vdis,
                    base_snapshot,
                    settings,
                    timestamp,
                    schedule_id,
                    task_id,
                    vm_token,
                )
                .await
            }
        };
        match result {
            Ok(ids) => written.extend(ids),
            Err(e) => {
                first_err.get_or_insert(e);
            }
        }
    }

    if srs_configured {
        // SR replication always ships a full VM export regardless of job
        // mode — see DESIGN.md for why a per-VDI incremental SR write isn't
        // implemented. The role tag still distinguishes full vs delta jobs.
        let role = match ctx.job.mode {
            JobMode::Full => ReplicationRole::DisasterRecovery,
            JobMode::Delta => ReplicationRole::ContinuousReplication,
        };
        match replicate_to_srs(ctx, vm, snapshot, settings, timestamp, schedule_id, &srs, role, vm_token).await {
            Ok(ids) => written.extend(ids),
            Err(e) => {
                first_err.get_or_insert(e);
            }
        }
    }

    match first_err {
        Some(e) => Err(e),
        None => Ok(written),
    }
}

#[allow(clippy::too_many_arguments)]
async fn export_full_to_remotes(
    ctx: &JobRunContext,
    vm: &VM,
    snapshot: &VM,
    settings: &Settings,
    timestamp: DateTime<Utc>,
    schedule_id: &str,
    task_id: Uuid,
    vm_token: &CancellationToken,
) -> Result<Vec<String>> {
    let export = ctx
        .hypervisor
        .spawn_export(&snapshot.uuid, ctx.job.compression.as_deref())
        .await?;
    let mut fork = stream_fork::fork(export.reader, ctx.remotes.len(), 4);

    let filename_stem = timestamp.format("%Y%m%dT%H%M%SZ").to_string();
    let mut handles = Vec::with_capacity(ctx.remotes.len());

    for (remote, reader) in ctx.remotes.iter().cloned().zip(fork.readers.drain(..)) {
        let vm = vm.clone();
        let snapshot = snapshot.clone();
        let job_id = ctx.job.id.clone();
        let schedule_id = schedule_id.to_string();
        let filename_stem = filename_stem.clone();
        let vhd_backend = ctx.vhd_backend.clone();
        let task_logger = ctx.task_logger.clone();
        let settings = *settings;
        let vm_token = vm_token.clone();

        handles.push(tokio::spawn(async move {
            write_full_to_remote(
                remote,
                vhd_backend,
                task_logger,
                reader,
                job_id,
                schedule_id,
                vm,
                snapshot,
                filename_stem,
                timestamp,
                settings,
                task_id,
                vm_token,
            )
            .await
        }));
    }

    let mut written = vec![];
    let mut first_err: Option<BackupError> = None;
    for handle in handles {
        match handle.await {
            Ok(Ok(remote_id)) => written.push(remote_id),
            Ok(Err(e)) => {
                first_err.get_or_insert(e);
            }
            Err(join_err) => {
                first_err.get_or_insert(BackupError::TransferFailed(join_err.to_string()));
            }
        }
    }

    match fork.task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            first_err.get_or_insert(e);
        }
        Err(join_err) => {
            first_err.get_or_insert(BackupError::TransferFailed(join_err.to_string()));
        }
    }

    export.finish().await?;

    match first_err {
        Some(e) => Err(e),
        None => Ok(written),
    }
}

#[allow(clippy::too_many_arguments)]
async fn write_full_to_remote(
    remote: Arc<dyn RemoteHandler>,
    vhd_backend: Arc<dyn VhdBackend>,
    task_logger: TaskLogger,
    mut reader: stream_fork::ForkReader,
    job_id: String,
    schedule_id: String,
    vm: VM,
    snapshot: VM,
    filename_stem: String,
    timestamp: DateTime<Utc>,
    settings: Settings,
    task_id: Uuid,
    vm_token: CancellationToken,
) -> Result<String> {
    let vm_dir = remote.vm_dir(&vm.uuid);
    remote.ensure_dir(&vm_dir).await?;

    // pre-write listing: the retention window is computed once and reused
    // for either a before- or after-write delete, never re-listed post-write
    let old = select_old_entries(remote.as_ref(), &vm.uuid, &schedule_id, JobMode::Full, settings.export_retention).await?;
    if settings.delete_first {
        delete_old_entries(vhd_backend.as_ref(), remote.as_ref(), &task_logger, &vm.uuid, &old, task_id).await?;
    }

    let payload_name = format!("{filename_stem}.xva");
    let payload_path = vm_dir.join(&payload_name);
    let writer = remote.open_writer(&payload_path).await?;
    let writer = copy_cancellable(&mut reader, writer, &vm_token).await?;
    writer.finish().await?;

    let metadata = BackupMetadata {
        job_id,
        schedule_id,
        timestamp,
        version: crate::metadata::METADATA_VERSION.to_string(),
        vm: vm_to_json(&vm),
        vm_snapshot: vm_to_json(&snapshot),
        mode: JobMode::Full,
        xva: Some(format!("./{payload_name}")),
        vbds: None,
        vdis: None,
        vifs: None,
        vhds: None,
        _filename: None,
    };
    let metadata_path = vm_dir.join(format!("{filename_stem}.json"));
    remote.write_metadata(&metadata_path, &metadata).await?;

    if !settings.delete_first {
        delete_old_entries(vhd_backend.as_ref(), remote.as_ref(), &task_logger, &vm.uuid, &old, task_id).await?;
    }

    Ok(remote.id().to_string())
}

#[allow(clippy::too_many_arguments)]
async fn export_delta_to_remotes(
    ctx: &JobRunContext,
    vm: &VM,
    snapshot: &VM,
    vdis: &[VDI],
    base_snapshot: Option<&VM>,
    settings: &Settings,
    timestamp: DateTime<Utc>,
    schedule_id: &str,
    task_id: Uuid,
    vm_token: &CancellationToken,
) -> Result<Vec<String>> {
    let vbds = ctx.hypervisor.list_vbds(&snapshot.uuid).await?;
    let vifs = ctx.hypervisor.list_vifs(&snapshot.uuid).await?;
    let base_vdis = match base_snapshot {
        Some(base) => ctx.hypervisor.list_vdis(&base.uuid).await?,
        None => vec![],
    };

    let filename_stem = timestamp.format("%Y%m%dT%H%M%SZ").to_string();

    // one vhd-path map per remote, filled in as each VDI's fork lands, then
    // written as a single sidecar per remote once every VDI is done
    let mut vhds_per_remote: HashMap<String, HashMap<String, String>> =
        ctx.remotes.iter().map(|r| (r.id().to_string(), HashMap::new())).collect();

    for vdi in vdis {
        let base_uuid = base_vdis.iter().find(|b| b.name_label == vdi.name_label).map(|b| b.uuid.clone());
        let export = ctx.hypervisor.export_delta_vdi(&vdi.uuid, base_uuid.as_deref()).await?;
        let mut fork = stream_fork::fork(export.reader, ctx.remotes.len(), 4);

        let mut handles = Vec::with_capacity(ctx.remotes.len());
        for (remote, reader) in ctx.remotes.iter().cloned().zip(fork.readers.drain(..)) {
            let vhd_backend = ctx.vhd_backend.clone();
            let vm_uuid = vm.uuid.clone();
            let job_id = ctx.job.id.clone();
            let vdi_uuid = vdi.uuid.clone();
            let filename_stem = filename_stem.clone();
            let vm_token = vm_token.clone();
            handles.push(tokio::spawn(async move {
                write_vdi_to_remote(remote, vhd_backend, reader, vm_uuid, job_id, vdi_uuid, filename_stem, vm_token).await
            }));
        }

        let mut first_err: Option<BackupError> = None;
        for (idx, handle) in handles.into_iter().enumerate() {
            let remote_id = ctx.remotes[idx].id().to_string();
            match handle.await {
                Ok(Ok(rel)) => {
                    vhds_per_remote.get_mut(&remote_id).expect("seeded above").insert(vdi.uuid.clone(), rel);
                }
                Ok(Err(e)) => {
                    first_err.get_or_insert(e);
                }
                Err(join_err) => {
                    first_err.get_or_insert(BackupError::TransferFailed(join_err.to_string()));
                }
            }
        }
        match fork.task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                first_err.get_or_insert(e);
            }
            Err(join_err) => {
                first_err.get_or_insert(BackupError::TransferFailed(join_err.to_string()));
            }
        }
        export.finish().await?;
        if let Some(e) = first_err {
            return Err(e);
        }
    }

    let mut written = vec![];
    let mut first_err: Option<BackupError> = None;
    for remote in &ctx.remotes {
        let vhds = vhds_per_remote.remove(remote.id()).unwrap_or_default();
        let result = finalize_delta_sidecar(
            remote.as_ref(),
            ctx.vhd_backend.as_ref(),
            &ctx.task_logger,
            vm,
            snapshot,
            &vbds,
            &vifs,
            vdis,
            &ctx.job.id,
            schedule_id,
            timestamp,
            vhds,
            settings,
            task_id,
        )
        .await;
        match result {
            Ok(id) => written.push(id),
            Err(e) => {
                first_err.get_or_insert(e);
            }
        }
    }

    match first_err {
        Some(e) => Err(e),
        None => Ok(written),
    }
}

#[allow(clippy::too_many_arguments)]
async fn write_vdi_to_remote(
    remote: Arc<dyn RemoteHandler>,
    vhd_backend: Arc<dyn VhdBackend>,
    mut reader: stream_fork::ForkReader,
    vm_uuid: String,
    job_id: String,
    vdi_uuid: String,
    filename_stem: String,
    vm_token: CancellationToken,
) -> Result<String> {
    let vdi_dir = remote.vdi_dir(&vm_uuid, &job_id, &vdi_uuid);
    remote.ensure_dir(&vdi_dir).await?;

    let payload_name = format!("{filename_stem}.vhd");
    let payload_path = vdi_dir.join(&payload_name);
    let writer = remote.open_writer(&payload_path).await?;
    let writer = copy_cancellable(&mut reader, writer, &vm_token).await?;
    writer.finish().await?;

    // splice onto this VDI's existing chain tip, if one exists — the just
    // written file sorts last lexicographically, so the prior tip is
    // whatever else is already in the directory
    if let Some(parent) = chain::list(&vdi_dir)
        .await?
        .into_iter()
        .filter(|p| p != &payload_path)
        .last()
    {
        chain::splice(vhd_backend.as_ref(), &parent, &payload_path).await?;
    }

    Ok(format!("./vdis/{job_id}/{vdi_uuid}/{payload_name}"))
}

#[allow(clippy::too_many_arguments)]
async fn finalize_delta_sidecar(
    remote: &dyn RemoteHandler,
    vhd_backend: &dyn VhdBackend,
    task_logger: &TaskLogger,
    vm: &VM,
    snapshot: &VM,
    vbds: &[VBD],
    vifs: &[VIF],
    vdis: &[VDI],
    job_id: &str,
    schedule_id: &str,
    timestamp: DateTime<Utc>,
    vhds: HashMap<String, String>,
    settings: &Settings,
    task_id: Uuid,
) -> Result<String> {
    let vm_dir = remote.vm_dir(&vm.uuid);
    remote.ensure_dir(&vm_dir).await?;

    let old = select_old_entries(remote, &vm.uuid, schedule_id, JobMode::Delta, settings.export_retention).await?;
    if settings.delete_first {
        delete_old_entries(vhd_backend, remote, task_logger, &vm.uuid, &old, task_id).await?;
    }

    let filename_stem = timestamp.format("%Y%m%dT%H%M%SZ").to_string();
    let metadata = BackupMetadata {
        job_id: job_id.to_string(),
        schedule_id: schedule_id.to_string(),
        timestamp,
        version: crate::metadata::METADATA_VERSION.to_string(),
        vm: vm_to_json(vm),
        vm_snapshot: vm_to_json(snapshot),
        mode: JobMode::Delta,
        xva: None,
        vbds: Some(vbds.iter().map(|v| serde_json::to_value(v).unwrap_or(serde_json::Value::Null)).collect()),
        vdis: Some(vdis.iter().map(|v| serde_json::to_value(v).unwrap_or(serde_json::Value::Null)).collect()),
        vifs: Some(vifs.iter().map(|v| serde_json::to_value(v).unwrap_or(serde_json::Value::Null)).collect()),
        vhds: Some(vhds),
        _filename: None,
    };
    let metadata_path = vm_dir.join(format!("{filename_stem}.json"));
    remote.write_metadata(&metadata_path, &metadata).await?;

    if !settings.delete_first {
        delete_old_entries(vhd_backend, remote, task_logger, &vm.uuid, &old, task_id).await?;
    }

    Ok(remote.id().to_string())
}

/// the sidecars for a (vm, schedule, mode) beyond `retention`, oldest first —
/// scoped per schedule+mode so retention counts don't bleed across jobs or
/// modes sharing the same remote (I2)
async fn select_old_entries(
    remote: &dyn RemoteHandler,
    vm_uuid: &str,
    schedule_id: &str,
    mode: JobMode,
    retention: u32,
) -> Result<Vec<BackupMetadata>> {
    if retention == 0 {
        return Ok(vec![]);
    }
    let mut entries = remote.list_metadata(vm_uuid).await?;
    entries.retain(|e| e.schedule_id == schedule_id && e.mode == mode);
    crate::metadata::sort_by_timestamp(&mut entries);
    Ok(retention::old_entries(retention, &entries))
}

async fn delete_old_entries(
    vhd_backend: &dyn VhdBackend,
    remote: &dyn RemoteHandler,
    task_logger: &TaskLogger,
    vm_uuid: &str,
    old: &[BackupMetadata],
    parent_task: Uuid,
) -> Result<()> {
    for entry in old {
        ops::deleter::safe_delete(vhd_backend, remote, task_logger, vm_uuid, entry, parent_task).await?;
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn replicate_to_srs(
    ctx: &JobRunContext,
    vm: &VM,
    snapshot: &VM,
    settings: &Settings,
    timestamp: DateTime<Utc>,
    schedule_id: &str,
    srs: &[String],
    role: ReplicationRole,
    vm_token: &CancellationToken,
) -> Result<Vec<String>> {
    let export = ctx
        .hypervisor
        .spawn_export(&snapshot.uuid, ctx.job.compression.as_deref())
        .await?;
    let mut fork = stream_fork::fork(export.reader, srs.len(), 4);

    let name = format!("{} ({})", vm.name_label, timestamp.format("%Y-%m-%d %H:%M:%S"));
    let mut handles = Vec::with_capacity(srs.len());
    for (sr_uuid, reader) in srs.iter().cloned().zip(fork.readers.drain(..)) {
        let hypervisor = ctx.hypervisor.clone();
        let vm_uuid = vm.uuid.clone();
        let schedule_id = schedule_id.to_string();
        let name = name.clone();
        let delete_first = settings.delete_first;
        let vm_token = vm_token.clone();

        handles.push(tokio::spawn(async move {
            replicate_to_sr(
                hypervisor.as_ref(),
                reader,
                &sr_uuid,
                &vm_uuid,
                &schedule_id,
                &name,
                role,
                delete_first,
                &vm_token,
            )
            .await
        }));
    }

    let mut written = vec![];
    let mut first_err: Option<BackupError> = None;
    for handle in handles {
        match handle.await {
            Ok(Ok(sr_id)) => written.push(sr_id),
            Ok(Err(e)) => {
                first_err.get_or_insert(e);
            }
            Err(join_err) => {
                first_err.get_or_insert(BackupError::TransferFailed(join_err.to_string()));
            }
        }
    }

    match fork.task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            first_err.get_or_insert(e);
        }
        Err(join_err) => {
            first_err.get_or_insert(BackupError::TransferFailed(join_err.to_string()));
        }
    }

    export.finish().await?;

    match first_err {
        Some(e) => Err(e),
        None => Ok(written),
    }
}

#[allow(clippy::too_many_arguments)]
async fn replicate_to_sr(
    hypervisor: &dyn HypervisorClient,
    mut reader: stream_fork::ForkReader,
    sr_uuid: &str,
    vm_uuid: &str,
    schedule_id: &str,
    name: &str,
    role: ReplicationRole,
    delete_first: bool,
    vm_token: &CancellationToken,
) -> Result<String> {
    let prior = hypervisor.list_replicated_vms(sr_uuid, schedule_id, vm_uuid).await?;

    if delete_first {
        for old in &prior {
            hypervisor.delete_vm(&old.uuid, true).await?;
        }
    }

    let mut handle = hypervisor.spawn_import(sr_uuid).await?;
    let mut buf = vec![0u8; 256 * 1024];
    loop {
        tokio::select! {
            _ = vm_token.cancelled() => {
                return Err(BackupError::Cancelled);
            }
            n = reader.read(&mut buf) => {
                let n = n?;
                if n == 0 {
                    break;
                }
                handle.stdin.write_all(&buf[..n]).await?;
            }
        }
    }
    handle.stdin.shutdown().await?;
    let new_uuid = handle.finish().await?;

    hypervisor.set_name_label(&new_uuid, name).await?;
    hypervisor.block_start(&new_uuid).await?;
    hypervisor
        .tag_replicated_vm(&new_uuid, sr_uuid, schedule_id, vm_uuid, role)
        .await?;

    if !delete_first {
        for old in &prior {
            hypervisor.delete_vm(&old.uuid, true).await?;
        }
    }

    Ok(sr_uuid.to_string())
}
