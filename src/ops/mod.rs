//! Tunnel orchestration, command construction and execution.

pub mod command;
pub mod dump;
pub mod import;
pub mod options;
pub mod outcome;
pub mod ports;
pub mod probe;
pub mod registry;
pub mod shell;
#[cfg(all(test, unix))]
pub(crate) mod testing;
pub mod tunnel;

pub use command::{build_dump_command, build_import_command, Endpoint};
pub use dump::DumpExecutor;
pub use import::ImportExecutor;
pub use options::{generate_output_path, is_gzipped, DumpOptions, DumpRequest, ImportOptions};
pub use outcome::{DumpResult, ImportResult};
pub use probe::{Listing, ProbeReport, Prober};
pub use registry::{ServerProfile, ServerRegistry, SshTunnelConfig};
pub use tunnel::{TunnelHandle, TunnelManager, TunnelState};
