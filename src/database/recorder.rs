use super::models::{
    DomainRecord, EventType, ServerEvent, ServerRecord, ServerStatus, TunnelRecord, TunnelStatus,
};
use super::Datastore;
use crate::cloudflare::types::CreatedTunnel;
use crate::config::CloudflareConfig;
use crate::server::model::SshConnectConfig;
use anyhow::{Context, Result};
use log::{info, warn};
use std::sync::Arc;
use uuid::Uuid;

/// What a finished run knows about its tunnel before it is persisted.
#[derive(Debug, Clone)]
pub struct TunnelDetails<'a> {
    pub server_id: &'a str,
    pub container_id: &'a str,
    pub cloudflare_domain_id: &'a str,
    pub subdomain: &'a str,
    pub full_domain: &'a str,
    pub container_port: u16,
    pub host_port: u16,
    pub tunnel: &'a CreatedTunnel,
}

/// One audit log entry. Ids are whatever the run had produced when the
/// event happened.
#[derive(Debug, Clone)]
pub struct AuditEvent<'a> {
    pub event_type: EventType,
    pub server_id: Option<&'a str>,
    pub tunnel_record_id: Option<&'a str>,
    pub dns_record_id: Option<&'a str>,
    pub description: String,
}

/// Writes provisioning results for one owner.
pub struct StateRecorder {
    store: Arc<dyn Datastore>,
    owner_id: String,
}

impl StateRecorder {
    pub fn new(store: Arc<dyn Datastore>, owner_id: impl Into<String>) -> Self {
        Self {
            store,
            owner_id: owner_id.into(),
        }
    }

    /// Returns the id of the owner's server at `host.ssh_host`, creating the
    /// record on first use.
    pub async fn register_server(&self, host: &SshConnectConfig) -> Result<String> {
        if let Some(id) = self
            .store
            .find_server_id(&host.ssh_host, &self.owner_id)
            .await
            .context("Failed to look up server")?
        {
            info!("Server {} already registered as {}", host.ssh_host, id);
            return Ok(id);
        }

        let record = ServerRecord {
            id: Uuid::new_v4().to_string(),
            user_id: self.owner_id.clone(),
            name: format!("Production Server ({})", host.ssh_host),
            ip_address: host.ssh_host.clone(),
            ssh_port: host.ssh_port,
            ssh_username: host.ssh_user.clone(),
            ssh_password: host.auth.password().cloned(),
            status: ServerStatus::Ready,
        };
        let id = self
            .store
            .insert_server(&record)
            .await
            .context("Failed to register server")?;
        info!("Registered server {} as {}", host.ssh_host, id);
        Ok(id)
    }

    pub async fn register_domain(&self, cloudflare: &CloudflareConfig) -> Result<String> {
        if let Some(id) = self
            .store
            .find_domain_id(&cloudflare.domain_name, &self.owner_id)
            .await
            .context("Failed to look up domain")?
        {
            info!(
                "Domain {} already registered as {}",
                cloudflare.domain_name, id
            );
            return Ok(id);
        }

        let record = DomainRecord {
            user_id: self.owner_id.clone(),
            domain_name: cloudflare.domain_name.clone(),
            api_token: cloudflare.api_token.clone(),
            zone_id: cloudflare.zone_id.clone(),
            account_id: cloudflare.account_id.clone(),
        };
        let id = self
            .store
            .insert_domain(&record)
            .await
            .context("Failed to register domain")?;
        info!("Registered domain {} as {}", cloudflare.domain_name, id);
        Ok(id)
    }

    /// Every run gets its own record; nothing is deduplicated here.
    pub async fn record_tunnel(&self, details: &TunnelDetails<'_>) -> Result<String> {
        let record = TunnelRecord {
            id: Uuid::new_v4().to_string(),
            user_id: self.owner_id.clone(),
            server_id: details.server_id.to_string(),
            container_id: details.container_id.to_string(),
            cloudflare_domain_id: details.cloudflare_domain_id.to_string(),
            subdomain: details.subdomain.to_string(),
            full_domain: details.full_domain.to_string(),
            container_port: details.container_port,
            host_port: details.host_port,
            tunnel_id: details.tunnel.id.clone(),
            tunnel_secret: details.tunnel.token.clone(),
            status: TunnelStatus::Active,
        };
        let id = self
            .store
            .insert_tunnel(&record)
            .await
            .context("Failed to persist tunnel record")?;
        info!("Persisted tunnel record {} for {}", id, details.full_domain);
        Ok(id)
    }

    /// Best effort: a failure here is logged, never returned.
    pub async fn mark_tunnel_failed(&self, tunnel_record_id: &str) {
        match self
            .store
            .update_tunnel_status(tunnel_record_id, TunnelStatus::Failed)
            .await
        {
            Ok(()) => info!("Marked tunnel record {} as failed", tunnel_record_id),
            Err(e) => warn!(
                "Could not mark tunnel record {} as failed: {:#}",
                tunnel_record_id, e
            ),
        }
    }

    /// Best effort: a failure here is logged, never returned.
    pub async fn record_event(&self, event: AuditEvent<'_>) {
        let record = ServerEvent {
            id: Uuid::new_v4().to_string(),
            user_id: self.owner_id.clone(),
            server_id: event.server_id.map(str::to_string),
            event_type: event.event_type,
            description: event.description,
            tunnel_record_id: event.tunnel_record_id.map(str::to_string),
            dns_record_id: event.dns_record_id.map(str::to_string),
        };
        match self.store.insert_event(&record).await {
            Ok(id) => info!("Logged {} event {}", record.event_type, id),
            Err(e) => warn!("Could not log {} event: {:#}", record.event_type, e),
        }
    }

    pub async fn load_tunnel(&self, tunnel_record_id: &str) -> Result<Option<TunnelRecord>> {
        self.store
            .get_tunnel(tunnel_record_id, &self.owner_id)
            .await
            .with_context(|| format!("Failed to load tunnel record {}", tunnel_record_id))
    }

    pub async fn forget_tunnel(&self, tunnel_record_id: &str) -> Result<()> {
        self.store
            .delete_tunnel(tunnel_record_id)
            .await
            .with_context(|| format!("Failed to delete tunnel record {}", tunnel_record_id))
    }
}
