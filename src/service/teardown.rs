use super::tunnel::TunnelProvisioner;
use crate::cloudflare::TunnelProvider;
use crate::config::ProvisionConfig;
use crate::database::models::{EventType, TunnelRecord};
use crate::database::recorder::{AuditEvent, StateRecorder};
use crate::error::ProvisionError;
use crate::server::remote_cmd::{run_remote, short_id, RemoveContainerCmd};
use crate::server::{Connector, RemoteExecutor};
use anyhow::Result;
use log::{info, warn};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TeardownReport {
    pub tunnel_record_id: String,
    pub container_id: String,
    pub container_removed: bool,
    pub dns_records_removed: usize,
    pub tunnel_id: String,
}

fn is_missing_container(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<ProvisionError>(),
        Some(ProvisionError::RemoteCommand { stderr, .. }) if stderr.contains("No such container")
    )
}

/// Removes what one provisioning run created: container, DNS records,
/// Cloudflare tunnel and finally the tunnel record itself.
pub struct Teardown<'a> {
    config: &'a ProvisionConfig,
    connector: &'a dyn Connector,
    provider: &'a dyn TunnelProvider,
    recorder: StateRecorder,
}

impl<'a> Teardown<'a> {
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

    pub async fn run(&self, tunnel_record_id: &str) -> Result<TeardownReport> {
        let record = self
            .recorder
            .load_tunnel(tunnel_record_id)
            .await?
            .ok_or_else(|| ProvisionError::NotFound {
                kind: "tunnel record",
                id: tunnel_record_id.to_string(),
            })?;
        info!(
            "Tearing down {} (container {}, tunnel {})",
            record.full_domain,
            short_id(&record.container_id),
            record.tunnel_id
        );

        let result = self.connect_and_remove(&record).await;
        let (event_type, description) = match &result {
            Ok(_) => (
                EventType::TunnelDeleted,
                format!(
                    "Tunnel {} removed for container {}",
                    record.full_domain,
                    short_id(&record.container_id)
                ),
            ),
            Err(e) => (
                EventType::TunnelDeleteFailed,
                format!("Teardown of {} failed: {:#}", record.full_domain, e),
            ),
        };
        self.recorder
            .record_event(AuditEvent {
                event_type,
                server_id: Some(record.server_id.as_str()),
                tunnel_record_id: Some(record.id.as_str()),
                dns_record_id: None,
                description,
            })
            .await;
        result
    }

    async fn connect_and_remove(&self, record: &TunnelRecord) -> Result<TeardownReport> {
        let ssh = self.connector.connect(&self.config.host).await?;
        let result = self.remove(ssh.as_ref(), record).await;
        if let Err(e) = ssh.close().await {
            warn!("Failed to close SSH session: {:#}", e);
        }
        result
    }

    async fn remove(&self, ssh: &dyn RemoteExecutor, record: &TunnelRecord) -> Result<TeardownReport> {
        let container_removed = match run_remote(
            ssh,
            &RemoveContainerCmd {
                container_id: &record.container_id,
            },
            self.config.app.use_sudo,
        )
        .await
        {
            Ok(()) => true,
            Err(e) if is_missing_container(&e) => {
                warn!(
                    "Container {} is already gone",
                    short_id(&record.container_id)
                );
                false
            }
            Err(e) => return Err(e),
        };

        let tunnels = TunnelProvisioner::new(self.provider);
        let dns_records_removed = tunnels.remove_dns_records(&record.full_domain).await?;
        tunnels.delete_tunnel(&record.tunnel_id).await?;
        self.recorder.forget_tunnel(&record.id).await?;

        info!("Teardown of {} complete", record.full_domain);
        Ok(TeardownReport {
            tunnel_record_id: record.id.clone(),
            container_id: record.container_id.clone(),
            container_removed,
            dns_records_removed,
            tunnel_id: record.tunnel_id.clone(),
        })
    }
}
