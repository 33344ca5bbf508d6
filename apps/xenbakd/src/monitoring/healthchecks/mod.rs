use std::collections::HashMap;

use eyre::ContextCompat;
use reqwest::header::HeaderMap;
use reqwest_middleware::ClientWithMiddleware;
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use tracing::debug;
use xenbakd_core::executor::JobReport;

mod types;

use crate::config::{HealthchecksMonitoringConfig, JobConfig};

use self::types::{
    HealthchecksCheckInfo, HealthchecksCreateCheckRequest, HealthchecksListChecksResponse,
};

use super::MonitoringTrait;

#[derive(Clone, Debug)]
pub struct HealthchecksService {
    config: HealthchecksMonitoringConfig,
    client: ClientWithMiddleware,
    checks: HashMap<String, HealthchecksCheckInfo>,
}

impl HealthchecksService {
    /// builds the service from a config
    pub fn from_config(config: HealthchecksMonitoringConfig) -> Self {
        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(config.max_retries);

        HealthchecksService {
            config,
            client: reqwest_middleware::ClientBuilder::new(reqwest::Client::new())
                .with(RetryTransientMiddleware::new_with_policy(retry_policy))
                .build(),
            checks: HashMap::new(),
        }
    }

    /// generates 'X-Api-Key' header for healthchecks.io api requests
    fn generate_auth_header(&self) -> eyre::Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "X-Api-Key",
            self.config
                .api_key
                .as_str()
                .parse()
                .expect("Failed to parse api key"),
        );

        Ok(headers)
    }

    fn generate_slug(job_name: &str, hostname: &str) -> String {
        format!("{job_name}_{hostname}")
    }
}

#[async_trait::async_trait]
impl MonitoringTrait for HealthchecksService {
    async fn start(&self, hostname: &str, job_name: &str) -> eyre::Result<()> {
        debug!("Sending start notification for job '{}' on host '{}'", job_name, hostname);

        let check = self
            .checks
            .get(&Self::generate_slug(job_name, hostname))
            .context("check not registered, run init-storage / daemon startup initialization first")?;

        self.client
            .post(format!("{}/start", check.ping_url))
            .send()
            .await?;

        Ok(())
    }

    async fn success(&self, hostname: &str, job_name: &str, report: &JobReport) -> eyre::Result<()> {
        debug!("Sending success notification for job '{}' on host '{}'", job_name, hostname);

        let check = self
            .checks
            .get(&Self::generate_slug(job_name, hostname))
            .context("check not registered, run init-storage / daemon startup initialization first")?;

        self.client.post(check.ping_url.clone()).json(report).send().await?;

        Ok(())
    }

    async fn failure(&self, hostname: &str, job_name: &str, report: &JobReport) -> eyre::Result<()> {
        debug!("Sending failure notification for job '{}' on host '{}'", job_name, hostname);

        let check = self
            .checks
            .get(&Self::generate_slug(job_name, hostname))
            .context("check not registered, run init-storage / daemon startup initialization first")?;

        self.client
            .post(format!("{}/fail", check.ping_url))
            .json(report)
            .send()
            .await?;

        Ok(())
    }
}

#[async_trait::async_trait]
pub trait HealthchecksManagementApiTrait {
    async fn list_checks(
        &self,
        tag_filter: Option<Vec<String>>,
        slug_filter: Option<String>,
    ) -> eyre::Result<HealthchecksListChecksResponse>;
    async fn initialize(&mut self, jobs: &[JobConfig], hostname: &str) -> eyre::Result<()>;
}

#[async_trait::async_trait]
impl HealthchecksManagementApiTrait for HealthchecksService {
    /// lists all checks for the current healthchecks.io project
    async fn list_checks(
        &self,
        tag_filter: Option<Vec<String>>,
        slug_filter: Option<String>,
    ) -> eyre::Result<HealthchecksListChecksResponse> {
        let url = format!("{}/api/v3/checks", self.config.server);
        let mut request = self.client.get(&url).headers(self.generate_auth_header()?);

        if let Some(tag_filter) = tag_filter {
            for tag in tag_filter {
                request = request.query(&[("tag", tag)]);
            }
        }
        if let Some(slug_filter) = slug_filter {
            request = request.query(&[("slug", slug_filter)]);
        }

        let response = request.send().await?;
        if response.status().is_success() {
            Ok(response.json().await?)
        } else {
            Err(eyre::eyre!(
                "Failed to list healthchecks.io checks ({}): {}",
                response.status(),
                response.text().await?
            ))
        }
    }

    /// creates or updates one healthchecks.io check per enabled job, keyed by
    /// job name + hostname — if a check already exists it's updated in place
    async fn initialize(&mut self, jobs: &[JobConfig], hostname: &str) -> eyre::Result<()> {
        for job in jobs.iter().filter(|j| j.enabled) {
            let name = Self::generate_slug(&job.name, hostname);
            let tags = hostname.to_string();
            let grace = self.config.grace;
            // healthchecks.io understands 5-field cron; our schedules carry the
            // 6-field (with-seconds) form `tokio_cron_scheduler` needs, so the
            // first schedule's seconds field is dropped for the ping's own sake
            let schedule = job
                .schedules
                .first()
                .map(|s| s.cron.split_whitespace().skip(1).collect::<Vec<_>>().join(" "))
                .unwrap_or_default();

            debug!(name);

            let create_url = format!("{}/api/v3/checks/", self.config.server);
            let request = HealthchecksCreateCheckRequest {
                name: name.clone(),
                tags,
                schedule,
                grace,
                timeout: 86400,
                slug: name.clone(),
                unique: vec!["name".into()],
            };

            let response: HealthchecksCheckInfo = self
                .client
                .post(&create_url)
                .headers(self.generate_auth_header()?)
                .json(&request)
                .send()
                .await?
                .json()
                .await?;

            self.checks.insert(name, response);
        }

        Ok(())
    }
}
