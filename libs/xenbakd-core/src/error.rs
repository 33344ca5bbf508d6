use thiserror::Error;

/// error kinds surfaced to the task log (§7)
#[derive(Debug, Error)]
pub enum BackupError {
    #[error("invalid job config: {0}")]
    InvalidConfig(String),

    #[error("no VMs matched job pattern")]
    NoVmsMatchPattern,

    #[error("unhealthy VDI chain for VM {0}")]
    UnhealthyVdiChain(String),

    #[error("VM backup timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("transfer failed: {0}")]
    TransferFailed(String),

    #[error("merge failed for {child}: {source}")]
    MergeFailed {
        child: String,
        #[source]
        source: std::io::Error,
    },

    #[error("remote '{remote}' unavailable: {source}")]
    RemoteUnavailable {
        remote: String,
        #[source]
        source: std::io::Error,
    },

    #[error("no such backup: {0}")]
    NoSuchBackup(String),

    #[error("cancelled")]
    Cancelled,

    #[error("hypervisor error: {0}")]
    Hypervisor(#[from] xapi_cli_client::XApiCliError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, BackupError>;
