use crate::server::remote_cmd::{run_remote, short_id, ContainerScriptCmd, RunContainerCmd};
use crate::server::scripts::{render_app_install_script, APP_DIR, APP_LOG_PATH};
use crate::server::RemoteExecutor;
use anyhow::{Context, Result};
use log::info;
use rand::Rng;
use std::ops::RangeInclusive;
use uuid::Uuid;

/// IANA dynamic/private port range.
pub const EPHEMERAL_PORT_RANGE: RangeInclusive<u16> = 49152..=65535;

pub fn random_host_port() -> u16 {
    rand::thread_rng().gen_range(EPHEMERAL_PORT_RANGE)
}

/// `app-<name>-<8 hex chars>`, with spaces in the app name turned into dashes.
pub fn container_name(app_name: &str) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("app-{}-{}", app_name.replace(' ', "-"), &suffix[..8])
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedContainer {
    pub id: String,
    pub name: String,
    pub host_port: u16,
}

pub struct ContainerProvisioner<'a> {
    executor: &'a dyn RemoteExecutor,
    use_sudo: bool,
}

impl<'a> ContainerProvisioner<'a> {
    pub fn new(executor: &'a dyn RemoteExecutor, use_sudo: bool) -> Self {
        Self { executor, use_sudo }
    }

    /// Starts a detached container that idles on `tail -f /dev/null` so the
    /// app can be installed into it afterwards.
    pub async fn create(
        &self,
        app_name: &str,
        image: &str,
        container_port: u16,
    ) -> Result<CreatedContainer> {
        let name = container_name(app_name);
        let host_port = random_host_port();
        info!(
            "--- Creating container {} (host port {} -> {}) ---",
            name, host_port, container_port
        );

        let id = run_remote(
            self.executor,
            &RunContainerCmd {
                name: name.clone(),
                image: image.to_string(),
                host_port,
                container_port,
            },
            self.use_sudo,
        )
        .await
        .with_context(|| format!("Failed to create container {}", name))?;

        info!("Container {} created with id {}", name, short_id(&id));
        Ok(CreatedContainer {
            id,
            name,
            host_port,
        })
    }

    /// Installs tooling and the app inside `container_id` and starts the dev
    /// server on `container_port`.
    pub async fn install_app(&self, container_id: &str, container_port: u16) -> Result<()> {
        info!(
            "--- Installing application into {} of container {} ---",
            APP_DIR,
            short_id(container_id)
        );
        let script = render_app_install_script(container_port);
        run_remote(
            self.executor,
            &ContainerScriptCmd {
                label: "application installation script",
                container_id,
                script: &script,
            },
            self.use_sudo,
        )
        .await
        .with_context(|| format!("Failed to install the application in {}", short_id(container_id)))?;

        info!(
            "Application started on port {}, logs in {}",
            container_port, APP_LOG_PATH
        );
        Ok(())
    }
}
