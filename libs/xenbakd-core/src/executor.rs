use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{BackupError, Result};
use crate::task_log::TaskOpts;
use crate::worker::{self, JobRunContext, VmBackupOutcome};

#[derive(Debug, Clone, serde::Serialize)]
pub struct VmFailure {
    pub vm_uuid: String,
    pub vm_name: String,
    pub error: String,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct JobReport {
    pub job_id: String,
    pub schedule_id: String,
    pub started_at: DateTime<Utc>,
    pub duration_ms: i64,
    pub successful: Vec<VmBackupOutcome>,
    pub failed: Vec<VmFailure>,
}

/// fans a job run out across its matched VMs with `job.concurrency` workers
/// in flight at once (C9). A VM failing never aborts the others — every
/// worker runs to completion and its outcome is folded into the report.
pub async fn run_job(ctx: Arc<JobRunContext>, schedule_id: &str, parent_task: Uuid) -> Result<JobReport> {
    let started_at = Utc::now();

    ctx.task_logger
        .wrap(
            TaskOpts {
                parent_id: Some(parent_task),
                message: format!("job {}", ctx.job.name),
                data: serde_json::json!({ "jobId": ctx.job.id, "scheduleId": schedule_id }),
            },
            run_job_inner(ctx.clone(), schedule_id, parent_task, started_at),
        )
        .await
}

async fn run_job_inner(
    ctx: Arc<JobRunContext>,
    schedule_id: &str,
    parent_task: Uuid,
    started_at: DateTime<Utc>,
) -> Result<JobReport> {
    let vms = ctx.hypervisor.filter_vms(&ctx.job.vms).await?;
    if vms.is_empty() {
        return Err(BackupError::NoVmsMatchPattern);
    }

    let permits = Arc::new(Semaphore::new(ctx.job.concurrency.max(1)));
    let job_token = CancellationToken::new();
    let mut handles = Vec::with_capacity(vms.len());

    for vm in vms {
        let permit = permits.clone().acquire_owned().await.expect("semaphore never closed");
        let ctx = ctx.clone();
        let schedule_id = schedule_id.to_string();
        let vm_token = job_token.child_token();

        handles.push(tokio::spawn(async move {
            let _permit = permit;
            let vm_uuid = vm.uuid.clone();
            let vm_name = vm.name_label.clone();
            let result = worker::backup_vm(&ctx, vm, &schedule_id, parent_task, vm_token).await;
            (vm_uuid, vm_name, result)
        }));
    }

    let mut successful = vec![];
    let mut failed = vec![];
    for handle in handles {
        match handle.await {
            Ok((_, _, Ok(outcome))) => successful.push(outcome),
            Ok((vm_uuid, vm_name, Err(e))) => failed.push(VmFailure {
                vm_uuid,
                vm_name,
                error: e.to_string(),
            }),
            Err(join_err) => failed.push(VmFailure {
                vm_uuid: "unknown".into(),
                vm_name: "unknown".into(),
                error: join_err.to_string(),
            }),
        }
    }

    Ok(JobReport {
        job_id: ctx.job.id.clone(),
        schedule_id: schedule_id.to_string(),
        started_at,
        duration_ms: (Utc::now() - started_at).num_milliseconds(),
        successful,
        failed,
    })
}
