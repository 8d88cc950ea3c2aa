use crate::server::remote_cmd::{run_remote, HostScriptCmd, PullImageCmd, VersionCheckCmd};
use crate::server::scripts::DOCKER_INSTALL_SCRIPT;
use crate::server::RemoteExecutor;
use anyhow::{Context, Result};
use log::info;

/// Versions reported by the freshly installed runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeVersions {
    pub docker: String,
    pub compose: String,
}

/// Installs and checks the container runtime on the host.
pub struct HostProvisioner<'a> {
    executor: &'a dyn RemoteExecutor,
    use_sudo: bool,
}

impl<'a> HostProvisioner<'a> {
    pub fn new(executor: &'a dyn RemoteExecutor, use_sudo: bool) -> Self {
        Self { executor, use_sudo }
    }

    /// Runs the install script, then both version checks. The script is
    /// re-run on hosts that already have Docker; apt makes that a no-op.
    pub async fn install_runtime(&self) -> Result<RuntimeVersions> {
        info!("--- Installing Docker and Docker Compose on the host ---");
        run_remote(
            self.executor,
            &HostScriptCmd {
                label: "docker installation script",
                script: DOCKER_INSTALL_SCRIPT,
            },
            self.use_sudo,
        )
        .await
        .context("Docker installation failed")?;

        let docker = run_remote(
            self.executor,
            &VersionCheckCmd {
                command: "docker --version",
            },
            self.use_sudo,
        )
        .await
        .context("Docker is not usable after installation")?;
        let compose = run_remote(
            self.executor,
            &VersionCheckCmd {
                command: "docker compose version",
            },
            self.use_sudo,
        )
        .await
        .context("Docker Compose is not usable after installation")?;

        info!("{}", docker);
        info!("{}", compose);
        Ok(RuntimeVersions { docker, compose })
    }

    pub async fn pull_image(&self, image: &str) -> Result<()> {
        run_remote(
            self.executor,
            &PullImageCmd {
                image: image.to_string(),
            },
            self.use_sudo,
        )
        .await
        .with_context(|| format!("Failed to pull image {}", image))
    }
}
