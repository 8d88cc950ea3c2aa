pub mod types;

use crate::config::{CloudflareConfig, Secret};
use crate::error::ProvisionError;
use anyhow::{Context, Result};
use async_trait::async_trait;
use log::debug;
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde::Serialize;
use types::{
    parse_response, CreateTunnelRequest, CreatedTunnel, DnsRecord, DnsRecordRequest,
    TunnelConfigurationRequest, TunnelResult,
};

/// The slice of the Cloudflare API the workflow depends on.
#[async_trait]
pub trait TunnelProvider: Send + Sync {
    async fn create_tunnel(&self, name: &str) -> Result<CreatedTunnel>;

    async fn configure_tunnel(
        &self,
        tunnel_id: &str,
        config: &TunnelConfigurationRequest,
    ) -> Result<()>;

    async fn create_dns_record(&self, record: &DnsRecordRequest) -> Result<DnsRecord>;

    async fn find_dns_records(&self, name: &str) -> Result<Vec<DnsRecord>>;

    async fn delete_dns_record(&self, record_id: &str) -> Result<()>;

    async fn delete_tunnel(&self, tunnel_id: &str) -> Result<()>;
}

pub struct CloudflareClient {
    http: Client,
    api_base: String,
    api_token: Secret,
    account_id: String,
    zone_id: String,
}

impl CloudflareClient {
    pub fn new(config: &CloudflareConfig) -> Result<Self> {
        let http = Client::builder()
            .user_agent(concat!("launchpad/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http,
            api_base: config.api_base.clone(),
            api_token: config.api_token.clone(),
            account_id: config.account_id.clone(),
            zone_id: config.zone_id.clone(),
        })
    }

    async fn call<T, B>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<&B>,
    ) -> Result<Option<T>>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized + Sync,
    {
        let url = format!("{}{}", self.api_base, path);
        debug!("Cloudflare {} {}", method, path);

        let mut request = self
            .http
            .request(method.clone(), &url)
            .bearer_auth(self.api_token.expose());
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("Failed to call Cloudflare {} {}", method, path))?;
        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .context("Failed to read Cloudflare response body")?;

        Ok(parse_response(status, &text)?)
    }
}

#[async_trait]
impl TunnelProvider for CloudflareClient {
    async fn create_tunnel(&self, name: &str) -> Result<CreatedTunnel> {
        let path = format!("/accounts/{}/cfd_tunnel", self.account_id);
        let result: Option<TunnelResult> = self
            .call(
                Method::POST,
                &path,
                &[],
                Some(&CreateTunnelRequest::remotely_managed(name)),
            )
            .await?;

        let tunnel = result.ok_or_else(|| {
            ProvisionError::Api("tunnel creation returned no result".to_string())
        })?;
        Ok(tunnel.into_created()?)
    }

    async fn configure_tunnel(
        &self,
        tunnel_id: &str,
        config: &TunnelConfigurationRequest,
    ) -> Result<()> {
        let path = format!(
            "/accounts/{}/cfd_tunnel/{}/configurations",
            self.account_id, tunnel_id
        );
        self.call::<serde_json::Value, _>(Method::PUT, &path, &[], Some(config))
            .await?;
        Ok(())
    }

    async fn create_dns_record(&self, record: &DnsRecordRequest) -> Result<DnsRecord> {
        let path = format!("/zones/{}/dns_records", self.zone_id);
        let created: Option<DnsRecord> = self
            .call(Method::POST, &path, &[], Some(record))
            .await?;
        created.ok_or_else(|| {
            ProvisionError::Api("DNS record creation returned no result".to_string()).into()
        })
    }

    async fn find_dns_records(&self, name: &str) -> Result<Vec<DnsRecord>> {
        let path = format!("/zones/{}/dns_records", self.zone_id);
        let records: Option<Vec<DnsRecord>> = self
            .call::<_, ()>(Method::GET, &path, &[("name", name)], None)
            .await?;
        Ok(records.unwrap_or_default())
    }

    async fn delete_dns_record(&self, record_id: &str) -> Result<()> {
        let path = format!("/zones/{}/dns_records/{}", self.zone_id, record_id);
        self.call::<serde_json::Value, ()>(Method::DELETE, &path, &[], None)
            .await?;
        Ok(())
    }

    async fn delete_tunnel(&self, tunnel_id: &str) -> Result<()> {
        let path = format!("/accounts/{}/cfd_tunnel/{}", self.account_id, tunnel_id);
        self.call::<serde_json::Value, ()>(Method::DELETE, &path, &[], None)
            .await?;
        Ok(())
    }
}
