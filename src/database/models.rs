use crate::config::Secret;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ServerStatus {
    Ready,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TunnelStatus {
    Active,
    Failed,
}

impl TunnelStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TunnelStatus::Active => "active",
            TunnelStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for TunnelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TunnelStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(TunnelStatus::Active),
            "failed" => Ok(TunnelStatus::Failed),
            other => Err(format!("unknown tunnel status {other}")),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    TunnelCreated,
    TunnelCreateFailed,
    TunnelDeleted,
    TunnelDeleteFailed,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::TunnelCreated => "tunnel_created",
            EventType::TunnelCreateFailed => "tunnel_create_failed",
            EventType::TunnelDeleted => "tunnel_deleted",
            EventType::TunnelDeleteFailed => "tunnel_delete_failed",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Row of `user_servers`: one per physical host and owner.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ServerRecord {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub ip_address: String,
    pub ssh_port: u16,
    pub ssh_username: String,
    pub ssh_password: Option<Secret>,
    pub status: ServerStatus,
}

/// Row of `cloudflare_domains`. The id is assigned by the datastore.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct DomainRecord {
    pub user_id: String,
    pub domain_name: String,
    pub api_token: Secret,
    pub zone_id: String,
    pub account_id: String,
}

/// Row of `docker_tunnels`: one per provisioning run.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct TunnelRecord {
    pub id: String,
    pub user_id: String,
    pub server_id: String,
    pub container_id: String,
    pub cloudflare_domain_id: String,
    pub subdomain: String,
    pub full_domain: String,
    pub container_port: u16,
    pub host_port: u16,
    pub tunnel_id: String,
    pub tunnel_secret: Secret,
    pub status: TunnelStatus,
}

/// Row of `server_events_log`. `server_id` is empty when a run failed
/// before its server was registered.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ServerEvent {
    pub id: String,
    pub user_id: String,
    pub server_id: Option<String>,
    pub event_type: EventType,
    pub description: String,
    pub tunnel_record_id: Option<String>,
    pub dns_record_id: Option<String>,
}
