pub mod model;
pub mod remote_cmd;
pub mod scripts;
pub mod ssh;

use crate::server::model::{CommandOutput, SshConnectConfig};
use anyhow::Result;
use async_trait::async_trait;

/// An open, authenticated shell on a remote host.
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Runs `command` to completion and captures its output. A non-zero
    /// exit status is returned, not raised; see [`remote_cmd::run_remote`].
    async fn exec(&self, command: &str) -> Result<CommandOutput>;

    async fn close(&self) -> Result<()>;
}

/// Opens remote sessions. Split from [`RemoteExecutor`] so a workflow can be
/// driven without a live host.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, config: &SshConnectConfig) -> Result<Box<dyn RemoteExecutor>>;
}
