use crate::cloudflare::types::{
    CreatedTunnel, DnsRecord, DnsRecordRequest, TunnelConfigurationRequest,
};
use crate::cloudflare::TunnelProvider;
use crate::config::Secret;
use crate::server::remote_cmd::{run_remote, short_id, StartTunnelClientCmd};
use crate::server::scripts::TUNNEL_LOG_PATH;
use crate::server::RemoteExecutor;
use anyhow::{Context, Result};
use log::info;
use rand::Rng;

pub const SUBDOMAIN_LENGTH: usize = 15;
const SUBDOMAIN_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Random DNS label of [`SUBDOMAIN_LENGTH`] lowercase letters and digits.
/// Collisions are possible and not checked.
pub fn generate_subdomain() -> String {
    let mut rng = rand::thread_rng();
    (0..SUBDOMAIN_LENGTH)
        .map(|_| SUBDOMAIN_ALPHABET[rng.gen_range(0..SUBDOMAIN_ALPHABET.len())] as char)
        .collect()
}

pub fn full_domain(subdomain: &str, base_domain: &str) -> String {
    format!("{}.{}", subdomain, base_domain)
}

pub fn tunnel_name(container_id: &str) -> String {
    format!("tunnel-{}", short_id(container_id))
}

/// Tunnel and DNS operations against Cloudflare, plus starting the tunnel
/// client inside the container.
pub struct TunnelProvisioner<'a> {
    provider: &'a dyn TunnelProvider,
}

impl<'a> TunnelProvisioner<'a> {
    pub fn new(provider: &'a dyn TunnelProvider) -> Self {
        Self { provider }
    }

    pub async fn create_tunnel(&self, container_id: &str) -> Result<CreatedTunnel> {
        let name = tunnel_name(container_id);
        info!("--- Creating Cloudflare tunnel {} ---", name);
        let tunnel = self
            .provider
            .create_tunnel(&name)
            .await
            .with_context(|| format!("Failed to create tunnel {}", name))?;
        info!("Tunnel created with id {}", tunnel.id);
        Ok(tunnel)
    }

    pub async fn create_dns_record(&self, full_domain: &str, tunnel_id: &str) -> Result<DnsRecord> {
        info!("--- Creating DNS record {} ---", full_domain);
        let record = self
            .provider
            .create_dns_record(&DnsRecordRequest::tunnel_cname(full_domain, tunnel_id))
            .await
            .with_context(|| format!("Failed to create DNS record for {}", full_domain))?;
        info!("DNS record {} -> {}", record.name, record.content);
        Ok(record)
    }

    pub async fn configure_ingress(
        &self,
        tunnel_id: &str,
        full_domain: &str,
        container_port: u16,
    ) -> Result<()> {
        info!(
            "--- Routing {} to localhost:{} ---",
            full_domain, container_port
        );
        let config = TunnelConfigurationRequest::single_hostname(full_domain, container_port);
        self.provider
            .configure_tunnel(tunnel_id, &config)
            .await
            .with_context(|| format!("Failed to configure ingress for tunnel {}", tunnel_id))
    }

    /// Starts `cloudflared` in the background inside the container.
    pub async fn start_client(
        &self,
        executor: &dyn RemoteExecutor,
        use_sudo: bool,
        container_id: &str,
        tunnel_id: &str,
        token: &Secret,
    ) -> Result<()> {
        info!("--- Starting tunnel client in {} ---", short_id(container_id));
        run_remote(
            executor,
            &StartTunnelClientCmd {
                container_id,
                tunnel_id,
                token,
            },
            use_sudo,
        )
        .await
        .context("Failed to start the tunnel client")?;
        info!("Tunnel client running, logs in {}", TUNNEL_LOG_PATH);
        Ok(())
    }

    /// Deletes every DNS record named `full_domain`; returns how many.
    pub async fn remove_dns_records(&self, full_domain: &str) -> Result<usize> {
        let records = self
            .provider
            .find_dns_records(full_domain)
            .await
            .with_context(|| format!("Failed to look up DNS records for {}", full_domain))?;
        for record in &records {
            info!("Deleting DNS record {} ({})", record.id, record.name);
            self.provider
                .delete_dns_record(&record.id)
                .await
                .with_context(|| format!("Failed to delete DNS record {}", record.id))?;
        }
        Ok(records.len())
    }

    pub async fn delete_tunnel(&self, tunnel_id: &str) -> Result<()> {
        info!("Deleting tunnel {}", tunnel_id);
        self.provider
            .delete_tunnel(tunnel_id)
            .await
            .with_context(|| format!("Failed to delete tunnel {}", tunnel_id))
    }
}
