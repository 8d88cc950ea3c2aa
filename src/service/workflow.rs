//! The provisioning run as an ordered list of named steps.
//!
//! Every step reads what earlier steps left in [`WorkflowState`] and adds its
//! own identifiers. The first failing step ends the run; nothing that already
//! happened is rolled back, but the state travels with the error so a partial
//! run can be inspected and cleaned up by hand.

use super::container::{ContainerProvisioner, CreatedContainer};
use super::host::HostProvisioner;
use super::tunnel::{full_domain, generate_subdomain, TunnelProvisioner};
use crate::cloudflare::types::CreatedTunnel;
use crate::cloudflare::TunnelProvider;
use crate::config::ProvisionConfig;
use crate::database::models::EventType;
use crate::database::recorder::{AuditEvent, StateRecorder, TunnelDetails};
use crate::server::remote_cmd::short_id;
use crate::server::{Connector, RemoteExecutor};
use anyhow::{anyhow, Result};
use log::{error, info, warn};
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Connect,
    InstallHostRuntime,
    RegisterServer,
    CreateContainer,
    ProvisionContainerApp,
    CreateTunnel,
    AllocateSubdomain,
    RegisterDomain,
    CreateDnsRecord,
    ConfigureIngress,
    PersistTunnelRecord,
    StartTunnelClient,
}

impl Step {
    pub const ALL: [Step; 12] = [
        Step::Connect,
        Step::InstallHostRuntime,
        Step::RegisterServer,
        Step::CreateContainer,
        Step::ProvisionContainerApp,
        Step::CreateTunnel,
        Step::AllocateSubdomain,
        Step::RegisterDomain,
        Step::CreateDnsRecord,
        Step::ConfigureIngress,
        Step::PersistTunnelRecord,
        Step::StartTunnelClient,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Step::Connect => "connect",
            Step::InstallHostRuntime => "install_host_runtime",
            Step::RegisterServer => "register_server",
            Step::CreateContainer => "create_container",
            Step::ProvisionContainerApp => "provision_container_app",
            Step::CreateTunnel => "create_tunnel",
            Step::AllocateSubdomain => "allocate_subdomain",
            Step::RegisterDomain => "register_domain",
            Step::CreateDnsRecord => "create_dns_record",
            Step::ConfigureIngress => "configure_ingress",
            Step::PersistTunnelRecord => "persist_tunnel_record",
            Step::StartTunnelClient => "start_tunnel_client",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Identifiers produced so far by a run.
#[derive(Debug, Clone, Default)]
pub struct WorkflowState {
    pub server_id: Option<String>,
    pub container: Option<CreatedContainer>,
    pub tunnel: Option<CreatedTunnel>,
    pub subdomain: Option<String>,
    pub full_domain: Option<String>,
    pub domain_id: Option<String>,
    pub dns_record_id: Option<String>,
    pub tunnel_record_id: Option<String>,
    pub completed: Vec<Step>,
}

fn required<'s, T>(value: &'s Option<T>, what: &str) -> Result<&'s T> {
    value
        .as_ref()
        .ok_or_else(|| anyhow!("{} is not available yet", what))
}

impl WorkflowState {
    fn container(&self) -> Result<&CreatedContainer> {
        required(&self.container, "container")
    }

    fn tunnel(&self) -> Result<&CreatedTunnel> {
        required(&self.tunnel, "tunnel")
    }

    fn full_domain(&self) -> Result<&str> {
        required(&self.full_domain, "full domain").map(String::as_str)
    }
}

/// First failure of a run, with everything that had been created before it.
#[derive(Debug)]
pub struct WorkflowError {
    pub step: Step,
    pub state: WorkflowState,
    pub source: anyhow::Error,
}

impl fmt::Display for WorkflowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "step {} failed", self.step)
    }
}

impl std::error::Error for WorkflowError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        let source: &(dyn std::error::Error + 'static) = self.source.as_ref();
        Some(source)
    }
}

/// Summary printed after a successful run. Carries no credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProvisionOutcome {
    pub tunnel_record_id: String,
    pub server_id: String,
    pub domain_id: String,
    pub container_id: String,
    pub container_name: String,
    pub host_port: u16,
    pub container_port: u16,
    pub tunnel_id: String,
    pub dns_record_id: String,
    pub full_domain: String,
    pub public_url: String,
}

impl ProvisionOutcome {
    fn from_state(state: &WorkflowState, container_port: u16) -> Result<Self> {
        let container = state.container()?;
        let full_domain = state.full_domain()?.to_string();
        Ok(Self {
            tunnel_record_id: required(&state.tunnel_record_id, "tunnel record")?.clone(),
            server_id: required(&state.server_id, "server id")?.clone(),
            domain_id: required(&state.domain_id, "domain id")?.clone(),
            container_id: container.id.clone(),
            container_name: container.name.clone(),
            host_port: container.host_port,
            container_port,
            tunnel_id: state.tunnel()?.id.clone(),
            dns_record_id: required(&state.dns_record_id, "DNS record")?.clone(),
            public_url: format!("https://{}", full_domain),
            full_domain,
        })
    }
}

fn session(session: &Option<Box<dyn RemoteExecutor>>) -> Result<&dyn RemoteExecutor> {
    session
        .as_deref()
        .ok_or_else(|| anyhow!("no open SSH session"))
}

pub struct Provisioner<'a> {
    config: &'a ProvisionConfig,
    connector: &'a dyn Connector,
    provider: &'a dyn TunnelProvider,
    recorder: StateRecorder,
}

impl<'a> Provisioner<'a> {
    pub fn new(
        config: &'a ProvisionConfig,
        connector: &'a dyn Connector,
        provider: &'a dyn TunnelProvider,
        recorder: StateRecorder,
    ) -> Self {
        Self {
            config,
            connector,
            provider,
            recorder,
        }
    }

    pub async fn run(&self) -> Result<ProvisionOutcome, WorkflowError> {
        let mut state = WorkflowState::default();
        let mut ssh: Option<Box<dyn RemoteExecutor>> = None;
        let mut failure = None;

        for (index, step) in Step::ALL.into_iter().enumerate() {
            info!("[{}/{}] {}", index + 1, Step::ALL.len(), step);
            match self.apply(step, &mut state, &mut ssh).await {
                Ok(()) => state.completed.push(step),
                Err(e) => {
                    error!("Step {} failed: {:#}", step, e);
                    failure = Some((step, e));
                    break;
                }
            }
        }

        if let Some((Step::StartTunnelClient, _)) = &failure {
            if let Some(record_id) = &state.tunnel_record_id {
                self.recorder.mark_tunnel_failed(record_id).await;
            }
        }

        if let Some(ssh) = ssh.take() {
            if let Err(e) = ssh.close().await {
                warn!("Failed to close SSH session: {:#}", e);
            }
        }

        let (step, source) = match failure {
            Some(failure) => failure,
            None => match ProvisionOutcome::from_state(&state, self.config.app.container_port) {
                Ok(outcome) => {
                    self.log_created(&outcome).await;
                    info!("Provisioning complete: {}", outcome.public_url);
                    return Ok(outcome);
                }
                Err(source) => (Step::StartTunnelClient, source),
            },
        };

        self.recorder
            .record_event(AuditEvent {
                event_type: EventType::TunnelCreateFailed,
                server_id: state.server_id.as_deref(),
                tunnel_record_id: state.tunnel_record_id.as_deref(),
                dns_record_id: state.dns_record_id.as_deref(),
                description: format!(
                    "Provisioning {} failed at step {}: {:#}",
                    self.config.host.target(),
                    step,
                    source
                ),
            })
            .await;
        Err(WorkflowError {
            step,
            state,
            source,
        })
    }

    async fn log_created(&self, outcome: &ProvisionOutcome) {
        self.recorder
            .record_event(AuditEvent {
                event_type: EventType::TunnelCreated,
                server_id: Some(outcome.server_id.as_str()),
                tunnel_record_id: Some(outcome.tunnel_record_id.as_str()),
                dns_record_id: Some(outcome.dns_record_id.as_str()),
                description: format!(
                    "Tunnel {} created for container {} on {}. DNS record {}. Host port {}",
                    outcome.full_domain,
                    short_id(&outcome.container_id),
                    self.config.host.ssh_host,
                    outcome.dns_record_id,
                    outcome.host_port
                ),
            })
            .await;
    }

    async fn apply(
        &self,
        step: Step,
        state: &mut WorkflowState,
        ssh: &mut Option<Box<dyn RemoteExecutor>>,
    ) -> Result<()> {
        let config = self.config;
        let use_sudo = config.app.use_sudo;
        let tunnels = TunnelProvisioner::new(self.provider);

        match step {
            Step::Connect => {
                *ssh = Some(self.connector.connect(&config.host).await?);
            }
            Step::InstallHostRuntime => {
                let host = HostProvisioner::new(session(ssh)?, use_sudo);
                host.install_runtime().await?;
                host.pull_image(&config.app.image).await?;
            }
            Step::RegisterServer => {
                state.server_id = Some(self.recorder.register_server(&config.host).await?);
            }
            Step::CreateContainer => {
                let container = ContainerProvisioner::new(session(ssh)?, use_sudo)
                    .create(&config.app.name, &config.app.image, config.app.container_port)
                    .await?;
                state.container = Some(container);
            }
            Step::ProvisionContainerApp => {
                ContainerProvisioner::new(session(ssh)?, use_sudo)
                    .install_app(&state.container()?.id, config.app.container_port)
                    .await?;
            }
            Step::CreateTunnel => {
                let tunnel = tunnels.create_tunnel(&state.container()?.id).await?;
                state.tunnel = Some(tunnel);
            }
            Step::AllocateSubdomain => {
                let subdomain = generate_subdomain();
                let full = full_domain(&subdomain, &config.cloudflare.domain_name);
                info!("Allocated {}", full);
                state.subdomain = Some(subdomain);
                state.full_domain = Some(full);
            }
            Step::RegisterDomain => {
                state.domain_id = Some(self.recorder.register_domain(&config.cloudflare).await?);
            }
            Step::CreateDnsRecord => {
                let record = tunnels
                    .create_dns_record(state.full_domain()?, &state.tunnel()?.id)
                    .await?;
                state.dns_record_id = Some(record.id);
            }
            Step::ConfigureIngress => {
                tunnels
                    .configure_ingress(
                        &state.tunnel()?.id,
                        state.full_domain()?,
                        config.app.container_port,
                    )
                    .await?;
            }
            Step::PersistTunnelRecord => {
                let container = state.container()?;
                let details = TunnelDetails {
                    server_id: required(&state.server_id, "server id")?,
                    container_id: &container.id,
                    cloudflare_domain_id: required(&state.domain_id, "domain id")?,
                    subdomain: required(&state.subdomain, "subdomain")?,
                    full_domain: state.full_domain()?,
                    container_port: config.app.container_port,
                    host_port: container.host_port,
                    tunnel: state.tunnel()?,
                };
                let record_id = self.recorder.record_tunnel(&details).await?;
                state.tunnel_record_id = Some(record_id);
            }
            Step::StartTunnelClient => {
                let tunnel = state.tunnel()?;
                tunnels
                    .start_client(
                        session(ssh)?,
                        use_sudo,
                        &state.container()?.id,
                        &tunnel.id,
                        &tunnel.token,
                    )
                    .await?;
            }
        }
        Ok(())
    }
}
