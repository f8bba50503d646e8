//! I/O adapters: everything that touches the filesystem, processes, the
//! network or the host.

pub mod agent;
pub mod config;
pub mod git;
pub mod metrics;
pub mod notify;
pub mod paths;
pub mod process;
pub mod prompt;
pub mod resources;
pub mod run_log;
pub mod sandbox;
pub mod snapshot;
