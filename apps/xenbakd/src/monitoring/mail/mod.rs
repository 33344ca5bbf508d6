use lettre::{AsyncSmtpTransport, AsyncTransport};
use xenbakd_core::executor::JobReport;

use crate::config::MailMonitoringConfig;

use super::MonitoringTrait;

#[derive(Debug, Clone)]
pub struct MailService {
    from: String,
    to: String,
    mailer: lettre::AsyncSmtpTransport<lettre::Tokio1Executor>,
}

impl MailService {
    pub async fn from_config(config: MailMonitoringConfig) -> eyre::Result<Self> {
        let mut mailer = AsyncSmtpTransport::<lettre::Tokio1Executor>::relay(&config.smtp_server)?
            .port(config.smtp_port)
            .tls(lettre::transport::smtp::client::Tls::None);
        match (config.smtp_user.as_str(), config.smtp_password.as_str()) {
            ("", "") => (),
            (user, pass) => {
                mailer =
                    mailer.credentials(lettre::transport::smtp::authentication::Credentials::new(
                        user.to_string(),
                        pass.to_string(),
                    ))
            }
        };
        let mailer = mailer.build();

        let to = config.smtp_to.join(", ");

        let mail_service = MailService {
            mailer,
            from: config.smtp_from,
            to,
        };

        mail_service.test_conn().await?;

        Ok(mail_service)
    }

    pub async fn test_conn(&self) -> eyre::Result<()> {
        match self.mailer.test_connection().await {
            Ok(_) => Ok(()),
            Err(e) => Err(eyre::eyre!("Failed to connect to SMTP server: {}", e)),
        }
    }

    fn format_body(hostname: &str, report: &JobReport) -> eyre::Result<String> {
        let pretty = serde_json::to_string_pretty(report)?;
        Ok(format!(
            "Backup job on host '{}' finished with {} succeeded / {} failed.\n\nReport: {}",
            hostname,
            report.successful.len(),
            report.failed.len(),
            pretty
        ))
    }
}

#[async_trait::async_trait]
impl MonitoringTrait for MailService {
    async fn start(&self, _hostname: &str, _job_name: &str) -> eyre::Result<()> {
        // mail doesn't have a "dead man's switch" concept, nothing to send
        Ok(())
    }

    async fn success(&self, hostname: &str, job_name: &str, report: &JobReport) -> eyre::Result<()> {
        let email = lettre::Message::builder()
            .from(self.from.parse()?)
            .to(self.to.parse()?)
            .subject(format!("Success: Backup job '{job_name}' on host '{hostname}'"))
            .body(Self::format_body(hostname, report)?)?;

        self.mailer
            .send(email)
            .await
            .map(|_| ())
            .map_err(|e| eyre::eyre!("Failed to send email: {}", e))
    }

    async fn failure(&self, hostname: &str, job_name: &str, report: &JobReport) -> eyre::Result<()> {
        let email = lettre::Message::builder()
            .from(self.from.parse()?)
            .to(self.to.parse()?)
            .subject(format!("Failure: Backup job '{job_name}' on host '{hostname}'"))
            .body(Self::format_body(hostname, report)?)?;

        self.mailer
            .send(email)
            .await
            .map(|_| ())
            .map_err(|e| eyre::eyre!("Failed to send email: {}", e))
    }
}
