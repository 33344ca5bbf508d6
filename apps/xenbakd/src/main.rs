const BANNER: &str = r#"
__  _____ _ __ | |__   __ _| | ____| |
\ \/ / _ \ '_ \| '_ \ / _` | |/ / _` |
 >  <  __/ | | | |_) | (_| |   < (_| |
/_/\_\___|_| |_|_.__/ \__,_|_|\_\__,_|
  "#;

mod cli;
mod config;
mod monitoring;
mod scheduler;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use colored::Colorize;
use figment::{
    providers::{Format, Serialized, Toml},
    Figment,
};
use tracing::{error, info, warn, Level};
use uuid::Uuid;
use xenbakd_core::hypervisor::xe::XeHypervisor;
use xenbakd_core::hypervisor::HypervisorClient;
use xenbakd_core::merge_worker::ProcessMergeWorker;
use xenbakd_core::ops::{deleter, importer, lister};
use xenbakd_core::remote::local::LocalRemote;
use xenbakd_core::remote::RemoteHandler;
use xenbakd_core::task_log::TaskLogger;
use xenbakd_core::vhd::{SimpleVhdBackend, VhdBackend};
use xenbakd_core::worker::JobRunContext;
use xenbakd_core::executor;

use crate::cli::{SubCommand, XenbakdCli};
use crate::config::AppConfig;
use crate::monitoring::healthchecks::{HealthchecksManagementApiTrait, HealthchecksService};
use crate::monitoring::mail::MailService;
use crate::monitoring::{MonitoringTrait, NotificationDispatcher};

#[tokio::main]
async fn main() -> eyre::Result<()> {
    color_eyre::install().unwrap();
    println!("{}", BANNER.cyan());

    let cli = XenbakdCli::parse();
    let config_path = cli.config;

    let mut config = Figment::from(Serialized::defaults(AppConfig::default()))
        .merge(Toml::file(config_path))
        .extract::<AppConfig>()
        .expect("Failed to load configuration");

    init_tracing(&config.general.log_level);
    info!("Starting xenbakd!");

    if config.general.hostname.trim().is_empty() {
        config.general.hostname = system_hostname();
    }
    let hostname = config.general.hostname.clone();

    let global_state = Arc::new(build_global_state(&mut config, &hostname).await?);

    match cli.subcmd {
        None | Some(SubCommand::Daemon(_)) => run_daemon(config, global_state).await,
        Some(SubCommand::Run(args)) => run_once_now(config, global_state, args.jobs).await,
        Some(SubCommand::DryRun(args)) => dry_run(config, global_state, args.jobs).await,
        Some(SubCommand::InitStorage(args)) => init_storage(global_state, args.storages).await,
        Some(SubCommand::List(args)) => list_backups(global_state, &args.remote, &args.vm).await,
        Some(SubCommand::Import(args)) => {
            import_backup(global_state, &args.remote, &args.vm, &args.timestamp, &args.sr).await
        }
        Some(SubCommand::Delete(args)) => {
            delete_backup(global_state, &args.remote, &args.vm, &args.timestamp).await
        }
    }
}

fn init_tracing(log_level: &str) {
    let level = match log_level {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_max_level(level)
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");
}

/// the OS doesn't have a portable stdlib hostname lookup; shelling out to
/// `hostname` matches how this daemon already talks to everything else (`xe`)
fn system_hostname() -> String {
    std::process::Command::new("hostname")
        .output()
        .ok()
        .filter(|o| o.status.success())
        .map(|o| String::from_utf8_lossy(&o.stdout).trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "unknown-host".to_string())
}

pub struct GlobalState {
    pub config: AppConfig,
    pub hostname: String,
    pub dispatcher: NotificationDispatcher,
    pub hypervisor: Arc<dyn HypervisorClient>,
    pub remotes: Vec<Arc<dyn RemoteHandler>>,
    pub vhd_backend: Arc<dyn VhdBackend>,
    pub task_logger: TaskLogger,
}

async fn build_global_state(config: &mut AppConfig, hostname: &str) -> eyre::Result<GlobalState> {
    let hypervisor: Arc<dyn HypervisorClient> = Arc::new(XeHypervisor::new(xapi_cli_client::XenConfig {
        server: config.hypervisor.server.clone(),
        username: config.hypervisor.username.clone(),
        password: config.hypervisor.password.clone(),
    }));

    let remotes: Vec<Arc<dyn RemoteHandler>> = config
        .storage
        .local
        .iter()
        .filter(|c| c.enabled)
        .map(|c| Arc::new(LocalRemote::new(c.name.clone(), PathBuf::from(&c.path))) as Arc<dyn RemoteHandler>)
        .collect();

    let merge_worker_binary = merge_worker_binary_path();
    let vhd_backend: Arc<dyn VhdBackend> =
        Arc::new(ProcessMergeWorker::new(merge_worker_binary, SimpleVhdBackend::new()));

    let task_logger = TaskLogger::tracing_only();

    let mut sinks: Vec<Arc<dyn MonitoringTrait>> = vec![];

    if config.monitoring.healthchecks.enabled {
        info!("Initializing healthchecks.io service...");
        let mut service = HealthchecksService::from_config(config.monitoring.healthchecks.clone());
        match service.initialize(&config.jobs, hostname).await {
            Ok(()) => sinks.push(Arc::new(service)),
            Err(e) => {
                warn!("Failed to initialize healthchecks service: {e}");
                warn!("Disabling healthchecks service...");
                config.monitoring.healthchecks.enabled = false;
            }
        }
    } else {
        warn!("Healthchecks service is disabled");
    }

    if config.monitoring.mail.enabled {
        info!("Initializing mail service...");
        match MailService::from_config(config.monitoring.mail.clone()).await {
            Ok(service) => sinks.push(Arc::new(service)),
            Err(e) => {
                warn!("Failed to initialize mail service: {e}");
                warn!("Disabling mail service...");
                config.monitoring.mail.enabled = false;
            }
        }
    } else {
        warn!("Mail service is disabled");
    }

    Ok(GlobalState {
        config: config.clone(),
        hostname: hostname.to_string(),
        dispatcher: NotificationDispatcher::new(sinks),
        hypervisor,
        remotes,
        vhd_backend,
        task_logger,
    })
}

/// the merge worker ships as a sibling binary next to this daemon's own executable
fn merge_worker_binary_path() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(|d| d.join("xenbak-merge-worker")))
        .unwrap_or_else(|| PathBuf::from("xenbak-merge-worker"))
}

async fn run_daemon(config: AppConfig, global_state: Arc<GlobalState>) -> eyre::Result<()> {
    let mut xenbak_scheduler = scheduler::XenbakScheduler::new().await?;
    for job in config.jobs.iter().filter(|j| j.enabled) {
        let core_job = job.to_core_job();
        for core_schedule in job.to_core_schedules().into_iter().filter(|s| s.enabled) {
            xenbak_scheduler
                .add_job(core_job.clone(), core_schedule, global_state.clone())
                .await?;
        }
    }

    xenbak_scheduler.start().await?;
    tokio::signal::ctrl_c().await.unwrap();
    xenbak_scheduler.shutdown().await?;
    Ok(())
}

async fn run_once_now(
    config: AppConfig,
    global_state: Arc<GlobalState>,
    job_filter: Option<Vec<String>>,
) -> eyre::Result<()> {
    for job in config.jobs.iter().filter(|j| j.enabled) {
        if let Some(names) = &job_filter {
            if !names.contains(&job.name) {
                continue;
            }
        }

        let core_job = job.to_core_job();
        let ctx = Arc::new(JobRunContext {
            job: core_job,
            hypervisor: global_state.hypervisor.clone(),
            remotes: global_state.remotes.clone(),
            vhd_backend: global_state.vhd_backend.clone(),
            task_logger: global_state.task_logger.clone(),
        });

        for schedule in job.to_core_schedules() {
            info!("Running job '{}' schedule '{}'", job.name, schedule.id);
            match executor::run_job(ctx.clone(), &schedule.id, Uuid::new_v4()).await {
                Ok(report) => {
                    info!(
                        "Job '{}' finished: {} succeeded, {} failed",
                        job.name,
                        report.successful.len(),
                        report.failed.len()
                    );
                }
                Err(e) => error!("Job '{}' failed outright: {e}", job.name),
            }
        }
    }
    Ok(())
}

async fn dry_run(config: AppConfig, global_state: Arc<GlobalState>, job_filter: Option<Vec<String>>) -> eyre::Result<()> {
    for job in config.jobs.iter().filter(|j| j.enabled) {
        if let Some(names) = &job_filter {
            if !names.contains(&job.name) {
                continue;
            }
        }

        let pattern = xenbakd_core::VmPattern {
            tag_filter: job.tag_filter.clone(),
            tag_filter_exclude: job.tag_filter_exclude.clone(),
        };
        let vms = global_state.hypervisor.filter_vms(&pattern).await?;
        println!("job '{}' would back up {} VM(s):", job.name, vms.len());
        for vm in vms {
            println!("  - {} [{}]", vm.name_label, vm.uuid);
        }
    }
    Ok(())
}

async fn init_storage(global_state: Arc<GlobalState>, storages: Option<Vec<String>>) -> eyre::Result<()> {
    for remote in &global_state.remotes {
        if let Some(names) = &storages {
            if !names.contains(&remote.id().to_string()) {
                continue;
            }
        }
        info!("Checking remote '{}'...", remote.id());
        remote.healthcheck().await?;
        info!("Remote '{}' is healthy", remote.id());
    }
    Ok(())
}

fn find_remote<'a>(global_state: &'a GlobalState, id: &str) -> eyre::Result<&'a Arc<dyn RemoteHandler>> {
    global_state
        .remotes
        .iter()
        .find(|r| r.id() == id)
        .ok_or_else(|| eyre::eyre!("no such remote configured: {id}"))
}

async fn list_backups(global_state: Arc<GlobalState>, remote_id: &str, vm_uuid: &str) -> eyre::Result<()> {
    let remote = find_remote(&global_state, remote_id)?;
    let backups = lister::list_backups(remote.as_ref(), vm_uuid).await?;
    println!("{}", serde_json::to_string_pretty(&backups)?);
    Ok(())
}

async fn import_backup(
    global_state: Arc<GlobalState>,
    remote_id: &str,
    vm_uuid: &str,
    timestamp: &str,
    sr_uuid: &str,
) -> eyre::Result<()> {
    let remote = find_remote(&global_state, remote_id)?;
    let backups = lister::list_backups(remote.as_ref(), vm_uuid).await?;
    let backup = backups
        .into_iter()
        .find(|b| b.timestamp.to_rfc3339() == timestamp)
        .ok_or_else(|| eyre::eyre!("no backup with timestamp '{timestamp}' for VM '{vm_uuid}' on remote '{remote_id}'"))?;

    let imported_uuid = importer::restore_backup(
        global_state.hypervisor.as_ref(),
        global_state.vhd_backend.as_ref(),
        remote.as_ref(),
        vm_uuid,
        &backup,
        sr_uuid,
    )
    .await?;
    info!("Imported backup as VM/VDIs '{imported_uuid}'");
    Ok(())
}

async fn delete_backup(
    global_state: Arc<GlobalState>,
    remote_id: &str,
    vm_uuid: &str,
    timestamp: &str,
) -> eyre::Result<()> {
    let remote = find_remote(&global_state, remote_id)?;
    let backups = lister::list_backups(remote.as_ref(), vm_uuid).await?;
    let backup = backups
        .into_iter()
        .find(|b| b.timestamp.to_rfc3339() == timestamp)
        .ok_or_else(|| eyre::eyre!("no backup with timestamp '{timestamp}' for VM '{vm_uuid}' on remote '{remote_id}'"))?;

    deleter::safe_delete(
        global_state.vhd_backend.as_ref(),
        remote.as_ref(),
        &global_state.task_logger,
        vm_uuid,
        &backup,
        Uuid::new_v4(),
    )
    .await?;
    info!("Deleted backup '{timestamp}' for VM '{vm_uuid}' on remote '{remote_id}'");
    Ok(())
}
