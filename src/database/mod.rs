pub mod entity;
pub mod models;
pub mod recorder;
pub mod rest;
pub mod sqlite;

use crate::config::DatastoreConfig;
use anyhow::Result;
use async_trait::async_trait;
use log::info;
use models::{DomainRecord, ServerEvent, ServerRecord, TunnelRecord, TunnelStatus};
use std::sync::Arc;

pub const SERVERS_TABLE: &str = "user_servers";
pub const DOMAINS_TABLE: &str = "cloudflare_domains";
pub const TUNNELS_TABLE: &str = "docker_tunnels";
pub const EVENTS_TABLE: &str = "server_events_log";

/// Persistence for the provisioning tables and their audit log. Lookups are always scoped
/// to the owning user.
#[async_trait]
pub trait Datastore: Send + Sync {
    async fn find_server_id(&self, ip_address: &str, user_id: &str) -> Result<Option<String>>;

    /// Inserts the row and returns the id the datastore reports for it.
    async fn insert_server(&self, server: &ServerRecord) -> Result<String>;

    async fn find_domain_id(&self, domain_name: &str, user_id: &str) -> Result<Option<String>>;

    async fn insert_domain(&self, domain: &DomainRecord) -> Result<String>;

    async fn insert_tunnel(&self, tunnel: &TunnelRecord) -> Result<String>;

    async fn update_tunnel_status(&self, id: &str, status: TunnelStatus) -> Result<()>;

    async fn get_tunnel(&self, id: &str, user_id: &str) -> Result<Option<TunnelRecord>>;

    async fn delete_tunnel(&self, id: &str) -> Result<()>;

    async fn insert_event(&self, event: &ServerEvent) -> Result<String>;
}

/// Picks the backend from the URL: `sqlite:<path>` opens a local ledger,
/// anything else is treated as a PostgREST endpoint.
pub async fn open(config: &DatastoreConfig) -> Result<Arc<dyn Datastore>> {
    match config.sqlite_path() {
        Some(path) => {
            info!("Using SQLite ledger at {}", path.display());
            Ok(Arc::new(sqlite::SqliteDatastore::open(&path).await?))
        }
        None => {
            info!("Using REST datastore at {}", config.url);
            Ok(Arc::new(rest::RestDatastore::new(config)?))
        }
    }
}
