use std::sync::Arc;

use tracing::warn;
use xenbakd_core::executor::JobReport;
use xenbakd_core::ReportWhen;

pub mod healthchecks;
pub mod mail;

#[async_trait::async_trait]
pub trait MonitoringTrait: Send + Sync {
    async fn start(&self, hostname: &str, job_name: &str) -> eyre::Result<()>;
    async fn success(&self, hostname: &str, job_name: &str, report: &JobReport) -> eyre::Result<()>;
    async fn failure(&self, hostname: &str, job_name: &str, report: &JobReport) -> eyre::Result<()>;
}

/// fans a job's start/success/failure notifications out to every configured
/// sink, gated by the job's resolved `reportWhen` (§4.E) — a sink never sees
/// a run it wasn't configured to hear about
#[derive(Clone, Default)]
pub struct NotificationDispatcher {
    sinks: Vec<Arc<dyn MonitoringTrait>>,
}

impl NotificationDispatcher {
    pub fn new(sinks: Vec<Arc<dyn MonitoringTrait>>) -> Self {
        NotificationDispatcher { sinks }
    }

    pub async fn notify_start(&self, hostname: &str, job_name: &str) {
        for sink in &self.sinks {
            if let Err(e) = sink.start(hostname, job_name).await {
                warn!("notification sink failed to send start ping for '{job_name}': {e}");
            }
        }
    }

    pub async fn notify_result(
        &self,
        hostname: &str,
        job_name: &str,
        report_when: ReportWhen,
        report: &JobReport,
    ) {
        let failed = !report.failed.is_empty();
        let should_notify = match report_when {
            ReportWhen::Always => true,
            ReportWhen::Failure => failed,
            ReportWhen::Never => false,
        };
        if !should_notify {
            return;
        }

        for sink in &self.sinks {
            let outcome = if failed {
                sink.failure(hostname, job_name, report).await
            } else {
                sink.success(hostname, job_name, report).await
            };
            if let Err(e) = outcome {
                warn!("notification sink failed to send result for '{job_name}': {e}");
            }
        }
    }
}
