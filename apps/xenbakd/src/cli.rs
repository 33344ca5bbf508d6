use clap::Parser;

#[derive(Parser)]
#[command(version, about, long_about)]
pub struct XenbakdCli {
    /// Sets a custom config file
    #[clap(short, long)]
    pub config: String,
    #[clap(subcommand)]
    pub subcmd: Option<SubCommand>,
}

#[derive(Parser)]
pub enum SubCommand {
    #[clap(name = "daemon", about = "Starts the xenbakd daemon")]
    Daemon(DaemonSubCommand),
    #[clap(name = "init-storage", about = "Initializes storage backends")]
    InitStorage(InitalizeStorageSubCommand),
    #[clap(name = "dry-run", about = "Shows which VMs a job would back up, without running it")]
    DryRun(DryRunSubCommand),
    #[clap(name = "run", about = "Runs jobs once")]
    Run(RunSubCommand),
    #[clap(name = "list", about = "Lists stored backups for a VM on a remote")]
    List(ListSubCommand),
    #[clap(name = "import", about = "Restores a stored backup onto an SR")]
    Import(ImportSubCommand),
    #[clap(name = "delete", about = "Deletes one stored backup, merging its VHD chain first")]
    Delete(DeleteSubCommand),
}

#[derive(Parser)]
pub struct DaemonSubCommand {}

#[derive(Parser)]
pub struct InitalizeStorageSubCommand {
    #[clap(short, long)]
    pub storages: Option<Vec<String>>,
}

#[derive(Parser)]
pub struct RunSubCommand {
    #[clap(short, long)]
    pub jobs: Option<Vec<String>>,
}

#[derive(Parser)]
pub struct DryRunSubCommand {
    #[clap(short, long)]
    pub jobs: Option<Vec<String>>,
}

#[derive(Parser)]
pub struct ListSubCommand {
    #[clap(short, long)]
    pub remote: String,
    #[clap(short, long)]
    pub vm: String,
}

#[derive(Parser)]
pub struct ImportSubCommand {
    #[clap(short, long)]
    pub remote: String,
    #[clap(short, long)]
    pub vm: String,
    /// the timestamp (as printed by `list`) identifying which sidecar to restore
    #[clap(short, long)]
    pub timestamp: String,
    /// destination SR uuid
    #[clap(long)]
    pub sr: String,
}

#[derive(Parser)]
pub struct DeleteSubCommand {
    #[clap(short, long)]
    pub remote: String,
    #[clap(short, long)]
    pub vm: String,
    #[clap(short, long)]
    pub timestamp: String,
}
