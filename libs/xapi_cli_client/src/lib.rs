pub mod client;
pub mod error;
pub mod http;
pub mod types;

pub use client::{ObjectKind, SnapshotType, XApiCliClient, XenConfig};
pub use error::XApiCliError;
pub use http::{RawVdiExport, RawVdiExportHandle, RawVdiImport};
pub use types::vbd::VBD;
pub use types::vdi::VDI;
pub use types::vif::VIF;
pub use types::vm::VM;
pub use types::{clean_stdout, parse_timestamp, FromCliOutput, Uuid, Uuids};
