use std::sync::Arc;

use tokio_cron_scheduler::{Job as CronJob, JobScheduler};
use tracing::{error, info};
use uuid::Uuid;
use xenbakd_core::model::JOB_DEFAULT_SCOPE;
use xenbakd_core::worker::JobRunContext;
use xenbakd_core::{executor, settings, Job, Schedule};

use crate::GlobalState;

pub struct XenbakScheduler {
    scheduler: JobScheduler,
}

impl XenbakScheduler {
    pub async fn new() -> eyre::Result<XenbakScheduler> {
        Ok(XenbakScheduler {
            scheduler: JobScheduler::new().await?,
        })
    }

    /// registers one cron trigger per (job, schedule) pair — a job may run on
    /// more than one cadence, each its own settings scope (§3)
    pub async fn add_job(
        &mut self,
        job: Job,
        schedule: Schedule,
        global_state: Arc<GlobalState>,
    ) -> eyre::Result<()> {
        info!(
            "Adding job '{}' schedule '{}' [{}] to scheduler",
            job.name, schedule.id, schedule.cron
        );

        self.scheduler
            .add(CronJob::new_async(schedule.cron.as_str(), move |_uuid, _l| {
                let job = job.clone();
                let schedule = schedule.clone();
                let global_state = global_state.clone();
                Box::pin(async move {
                    run_once(job, schedule, global_state).await;
                })
            })?)
            .await?;

        Ok(())
    }

    pub async fn start(&mut self) -> eyre::Result<()> {
        self.scheduler.start().await?;
        Ok(())
    }

    pub async fn shutdown(&mut self) -> eyre::Result<()> {
        self.scheduler.shutdown().await?;
        Ok(())
    }
}

/// runs one job/schedule pair end to end and fires notifications according
/// to the job's resolved `reportWhen`
async fn run_once(job: Job, schedule: Schedule, global_state: Arc<GlobalState>) {
    let job_name = job.name.clone();
    let report_when = settings::resolve(&job.settings, &[JOB_DEFAULT_SCOPE]).report_when;

    global_state.dispatcher.notify_start(&global_state.hostname, &job_name).await;

    let ctx = Arc::new(JobRunContext {
        job,
        hypervisor: global_state.hypervisor.clone(),
        remotes: global_state.remotes.clone(),
        vhd_backend: global_state.vhd_backend.clone(),
        task_logger: global_state.task_logger.clone(),
    });

    let parent_task = Uuid::new_v4();
    match executor::run_job(ctx, &schedule.id, parent_task).await {
        Ok(report) => {
            global_state
                .dispatcher
                .notify_result(&global_state.hostname, &job_name, report_when, &report)
                .await;
        }
        Err(e) => {
            error!("job '{job_name}' schedule '{}' failed outright: {e}", schedule.id);
        }
    }
}
