use super::entity::prelude::*;
use super::entity::{domain, event, server, tunnel};
use super::models::{
    DomainRecord, ServerEvent, ServerRecord, ServerStatus, TunnelRecord, TunnelStatus,
};
use super::Datastore;
use crate::config::Secret;
use crate::error::ProvisionError;
use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{debug, info, warn};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ColumnTrait, ConnectOptions, Database, DatabaseConnection, EntityTrait, QueryFilter, Set,
};
use std::path::Path;
use std::time::Duration;
use uuid::Uuid;

/// Local ledger with the same tables as the hosted datastore.
#[derive(Clone, Debug)]
pub struct SqliteDatastore {
    connection: DatabaseConnection,
}

impl SqliteDatastore {
    pub async fn open(db_path: &Path) -> Result<Self> {
        if let Some(dir) = db_path.parent() {
            if !dir.as_os_str().is_empty() && !dir.exists() {
                std::fs::create_dir_all(dir).context("Failed to create ledger directory")?;
            }
        }

        if !db_path.exists() {
            info!("Creating ledger file at: {}", db_path.display());
            std::fs::File::create(db_path).context("Failed to create ledger file")?;
        }

        let db_url = format!("sqlite:{}?mode=rwc", db_path.display());
        run_migrations(&db_url).await?;

        let mut opt = ConnectOptions::new(&db_url);
        opt.max_connections(4)
            .min_connections(1)
            .connect_timeout(Duration::from_secs(10))
            .sqlx_logging(false);

        let connection = Database::connect(opt)
            .await
            .context("Failed to connect to ledger")?;

        Ok(Self { connection })
    }
}

fn port_from_column(value: i32, column: &str) -> Result<u16> {
    u16::try_from(value).map_err(|_| {
        ProvisionError::InvalidConfig {
            key: column.to_string(),
            value: value.to_string(),
        }
        .into()
    })
}

impl TryFrom<tunnel::Model> for TunnelRecord {
    type Error = anyhow::Error;

    fn try_from(row: tunnel::Model) -> Result<Self> {
        let status = row
            .status
            .parse::<TunnelStatus>()
            .map_err(anyhow::Error::msg)?;

        Ok(TunnelRecord {
            container_port: port_from_column(row.container_port, "container_port")?,
            host_port: port_from_column(row.host_port, "host_port")?,
            id: row.id,
            user_id: row.user_id,
            server_id: row.server_id,
            container_id: row.container_id,
            cloudflare_domain_id: row.cloudflare_domain_id,
            subdomain: row.subdomain,
            full_domain: row.full_domain,
            tunnel_id: row.tunnel_id,
            tunnel_secret: Secret::new(row.tunnel_secret),
            status,
        })
    }
}

#[async_trait]
impl Datastore for SqliteDatastore {
    async fn find_server_id(&self, ip_address: &str, user_id: &str) -> Result<Option<String>> {
        debug!("Looking up server {} for {}", ip_address, user_id);
        let found = UserServer::find()
            .filter(server::Column::IpAddress.eq(ip_address))
            .filter(server::Column::UserId.eq(user_id))
            .one(&self.connection)
            .await
            .context("Failed to query servers")?;
        Ok(found.map(|row| row.id))
    }

    async fn insert_server(&self, record: &ServerRecord) -> Result<String> {
        debug!("Inserting server {}", record.id);
        let status = match record.status {
            ServerStatus::Ready => "ready",
        };
        let active_model = server::ActiveModel {
            id: Set(record.id.clone()),
            user_id: Set(record.user_id.clone()),
            name: Set(record.name.clone()),
            ip_address: Set(record.ip_address.clone()),
            ssh_port: Set(i32::from(record.ssh_port)),
            ssh_username: Set(record.ssh_username.clone()),
            ssh_password: Set(record
                .ssh_password
                .as_ref()
                .map(|secret| secret.expose().to_string())),
            status: Set(status.to_string()),
        };

        UserServer::insert(active_model)
            .exec_without_returning(&self.connection)
            .await
            .with_context(|| format!("Failed to insert server {}", record.id))?;
        Ok(record.id.clone())
    }

    async fn find_domain_id(&self, domain_name: &str, user_id: &str) -> Result<Option<String>> {
        debug!("Looking up domain {} for {}", domain_name, user_id);
        let found = CloudflareDomain::find()
            .filter(domain::Column::DomainName.eq(domain_name))
            .filter(domain::Column::UserId.eq(user_id))
            .one(&self.connection)
            .await
            .context("Failed to query domains")?;
        Ok(found.map(|row| row.id))
    }

    async fn insert_domain(&self, record: &DomainRecord) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        debug!("Inserting domain {} as {}", record.domain_name, id);
        let active_model = domain::ActiveModel {
            id: Set(id.clone()),
            user_id: Set(record.user_id.clone()),
            domain_name: Set(record.domain_name.clone()),
            api_token: Set(record.api_token.expose().to_string()),
            zone_id: Set(record.zone_id.clone()),
            account_id: Set(record.account_id.clone()),
        };

        CloudflareDomain::insert(active_model)
            .exec_without_returning(&self.connection)
            .await
            .with_context(|| format!("Failed to insert domain {}", record.domain_name))?;
        Ok(id)
    }

    async fn insert_tunnel(&self, record: &TunnelRecord) -> Result<String> {
        debug!("Inserting tunnel record {}", record.id);
        let active_model = tunnel::ActiveModel {
            id: Set(record.id.clone()),
            user_id: Set(record.user_id.clone()),
            server_id: Set(record.server_id.clone()),
            container_id: Set(record.container_id.clone()),
            cloudflare_domain_id: Set(record.cloudflare_domain_id.clone()),
            subdomain: Set(record.subdomain.clone()),
            full_domain: Set(record.full_domain.clone()),
            container_port: Set(i32::from(record.container_port)),
            host_port: Set(i32::from(record.host_port)),
            tunnel_id: Set(record.tunnel_id.clone()),
            tunnel_secret: Set(record.tunnel_secret.expose().to_string()),
            status: Set(record.status.as_str().to_string()),
        };

        DockerTunnel::insert(active_model)
            .exec_without_returning(&self.connection)
            .await
            .with_context(|| format!("Failed to insert tunnel record {}", record.id))?;
        Ok(record.id.clone())
    }

    async fn update_tunnel_status(&self, id: &str, status: TunnelStatus) -> Result<()> {
        debug!("Setting tunnel record {} to {}", id, status);
        let res = DockerTunnel::update_many()
            .col_expr(tunnel::Column::Status, Expr::value(status.as_str()))
            .filter(tunnel::Column::Id.eq(id))
            .exec(&self.connection)
            .await
            .with_context(|| format!("Failed to update tunnel record {}", id))?;

        if res.rows_affected == 0 {
            warn!("Tunnel record {} not found", id);
        }
        Ok(())
    }

    async fn get_tunnel(&self, id: &str, user_id: &str) -> Result<Option<TunnelRecord>> {
        debug!("Loading tunnel record {}", id);
        let found = DockerTunnel::find_by_id(id)
            .filter(tunnel::Column::UserId.eq(user_id))
            .one(&self.connection)
            .await
            .with_context(|| format!("Failed to load tunnel record {}", id))?;

        found.map(TunnelRecord::try_from).transpose()
    }

    async fn delete_tunnel(&self, id: &str) -> Result<()> {
        debug!("Deleting tunnel record {}", id);
        let res = DockerTunnel::delete_by_id(id)
            .exec(&self.connection)
            .await
            .context("Failed to delete tunnel record")?;

        if res.rows_affected == 0 {
            warn!("Tunnel record {} not found", id);
            return Err(ProvisionError::NotFound {
                kind: "tunnel record",
                id: id.to_string(),
            }
            .into());
        }
        Ok(())
    }

    async fn insert_event(&self, record: &ServerEvent) -> Result<String> {
        debug!("Logging {} event {}", record.event_type, record.id);
        let active_model = event::ActiveModel {
            id: Set(record.id.clone()),
            user_id: Set(record.user_id.clone()),
            server_id: Set(record.server_id.clone()),
            event_type: Set(record.event_type.as_str().to_string()),
            description: Set(record.description.clone()),
            tunnel_record_id: Set(record.tunnel_record_id.clone()),
            dns_record_id: Set(record.dns_record_id.clone()),
        };

        ServerEventLog::insert(active_model)
            .exec_without_returning(&self.connection)
            .await
            .with_context(|| format!("Failed to log event {}", record.id))?;
        Ok(record.id.clone())
    }
}

async fn run_migrations(db_url: &str) -> Result<()> {
    info!("Running ledger migrations");

    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect(db_url)
        .await
        .context("Failed to connect for migrations")?;

    sqlx::migrate!()
        .run(&pool)
        .await
        .context("Migration failed")?;
    pool.close().await;

    info!("Ledger migrations complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn tunnel_record(id: &str) -> TunnelRecord {
        TunnelRecord {
            id: id.into(),
            user_id: "owner-1".into(),
            server_id: "srv-1".into(),
            container_id: "c0ffee".into(),
            cloudflare_domain_id: "dom-1".into(),
            subdomain: "abcdefghij01234".into(),
            full_domain: "abcdefghij01234.example.com".into(),
            container_port: 3000,
            host_port: 50123,
            tunnel_id: "tun-1".into(),
            tunnel_secret: Secret::new("token"),
            status: TunnelStatus::Active,
        }
    }

    #[tokio::test]
    async fn test_open_creates_nested_ledger() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state").join("ledger.db");
        SqliteDatastore::open(&path).await.unwrap();
        assert!(path.exists());

        // Migrations are re-run on every open.
        SqliteDatastore::open(&path).await.unwrap();
    }

    #[tokio::test]
    async fn test_tunnel_record_lifecycle() {
        let dir = TempDir::new().unwrap();
        let store = SqliteDatastore::open(&dir.path().join("ledger.db"))
            .await
            .unwrap();

        let id = store.insert_tunnel(&tunnel_record("t-1")).await.unwrap();
        assert_eq!(id, "t-1");

        store
            .update_tunnel_status("t-1", TunnelStatus::Failed)
            .await
            .unwrap();
        let loaded = store.get_tunnel("t-1", "owner-1").await.unwrap().unwrap();
        assert_eq!(loaded.status, TunnelStatus::Failed);
        assert_eq!(loaded.host_port, 50123);
        assert_eq!(loaded.tunnel_secret.expose(), "token");

        assert!(store.get_tunnel("t-1", "someone-else").await.unwrap().is_none());

        store.delete_tunnel("t-1").await.unwrap();
        assert!(store.get_tunnel("t-1", "owner-1").await.unwrap().is_none());
        assert!(store.delete_tunnel("t-1").await.is_err());
    }

    #[tokio::test]
    async fn test_events_keep_the_dns_record_id() {
        let dir = TempDir::new().unwrap();
        let store = SqliteDatastore::open(&dir.path().join("ledger.db"))
            .await
            .unwrap();
        let logged = ServerEvent {
            id: "ev-1".into(),
            user_id: "owner-1".into(),
            server_id: None,
            event_type: crate::database::models::EventType::TunnelCreated,
            description: "created".into(),
            tunnel_record_id: Some("t-1".into()),
            dns_record_id: Some("0123456789abcdef0123456789abcdef".into()),
        };
        assert_eq!(store.insert_event(&logged).await.unwrap(), "ev-1");

        let rows = ServerEventLog::find()
            .filter(event::Column::TunnelRecordId.eq("t-1"))
            .all(&store.connection)
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].event_type, "tunnel_created");
        assert_eq!(rows[0].server_id, None);
        assert_eq!(
            rows[0].dns_record_id.as_deref(),
            Some("0123456789abcdef0123456789abcdef")
        );
    }

    #[tokio::test]
    async fn test_domain_ids_are_assigned_by_the_ledger() {
        let dir = TempDir::new().unwrap();
        let store = SqliteDatastore::open(&dir.path().join("ledger.db"))
            .await
            .unwrap();
        let record = DomainRecord {
            user_id: "owner-1".into(),
            domain_name: "example.com".into(),
            api_token: Secret::new("cf-token"),
            zone_id: "zone".into(),
            account_id: "acct".into(),
        };

        let id = store.insert_domain(&record).await.unwrap();
        assert!(Uuid::parse_str(&id).is_ok());
        assert_eq!(
            store.find_domain_id("example.com", "owner-1").await.unwrap(),
            Some(id)
        );
        assert_eq!(
            store.find_domain_id("example.com", "owner-2").await.unwrap(),
            None
        );
    }
}
