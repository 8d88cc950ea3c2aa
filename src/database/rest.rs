use super::models::{DomainRecord, ServerEvent, ServerRecord, TunnelRecord, TunnelStatus};
use super::{Datastore, DOMAINS_TABLE, EVENTS_TABLE, SERVERS_TABLE, TUNNELS_TABLE};
use crate::config::{DatastoreConfig, Secret};
use crate::error::ProvisionError;
use anyhow::{Context, Result};
use async_trait::async_trait;
use log::debug;
use reqwest::{Client, Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// PostgREST-style datastore (`{url}/rest/v1/{table}`).
pub struct RestDatastore {
    http: Client,
    rest_url: String,
    service_key: Secret,
}

#[derive(Debug, Deserialize)]
struct IdRow {
    id: Value,
}

impl IdRow {
    /// Ids may come back as UUID strings or as integers.
    fn into_id(self) -> String {
        match self.id {
            Value::String(id) => id,
            other => other.to_string(),
        }
    }
}

fn eq(value: &str) -> String {
    format!("eq.{}", value)
}

impl RestDatastore {
    pub fn new(config: &DatastoreConfig) -> Result<Self> {
        let http = Client::builder()
            .user_agent(concat!("launchpad/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http,
            rest_url: format!("{}/rest/v1", config.url.trim_end_matches('/')),
            service_key: config.service_key.clone(),
        })
    }

    fn request(&self, method: Method, table: &str) -> RequestBuilder {
        let key = self.service_key.expose();
        self.http
            .request(method, format!("{}/{}", self.rest_url, table))
            .header("apikey", key)
            .bearer_auth(key)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder, what: &str) -> Result<T> {
        let response = request
            .send()
            .await
            .with_context(|| format!("Failed to {}", what))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .with_context(|| format!("Failed to read response to {}", what))?;

        if !status.is_success() {
            return Err(ProvisionError::Datastore {
                status: status.as_u16(),
                body,
            })
            .with_context(|| format!("Failed to {}", what));
        }

        serde_json::from_str(&body).with_context(|| format!("Malformed response to {}", what))
    }

    async fn find_id(&self, table: &str, filters: &[(&str, String)]) -> Result<Option<String>> {
        debug!("GET {} {:?}", table, filters);
        let mut query: Vec<(&str, String)> = filters.to_vec();
        query.push(("select", "id".to_string()));

        let rows: Vec<IdRow> = self
            .send(
                self.request(Method::GET, table).query(&query),
                &format!("query {}", table),
            )
            .await?;
        Ok(rows.into_iter().next().map(IdRow::into_id))
    }

    async fn insert<B: Serialize + Sync>(&self, table: &str, row: &B) -> Result<String> {
        debug!("POST {}", table);
        let rows: Vec<IdRow> = self
            .send(
                self.request(Method::POST, table)
                    .header("Prefer", "return=representation")
                    .json(row),
                &format!("insert into {}", table),
            )
            .await?;

        rows.into_iter()
            .next()
            .map(IdRow::into_id)
            .ok_or_else(|| {
                ProvisionError::Datastore {
                    status: 201,
                    body: format!("insert into {} returned no row", table),
                }
                .into()
            })
    }
}

#[async_trait]
impl Datastore for RestDatastore {
    async fn find_server_id(&self, ip_address: &str, user_id: &str) -> Result<Option<String>> {
        self.find_id(
            SERVERS_TABLE,
            &[("ip_address", eq(ip_address)), ("user_id", eq(user_id))],
        )
        .await
    }

    async fn insert_server(&self, server: &ServerRecord) -> Result<String> {
        self.insert(SERVERS_TABLE, server).await
    }

    async fn find_domain_id(&self, domain_name: &str, user_id: &str) -> Result<Option<String>> {
        self.find_id(
            DOMAINS_TABLE,
            &[("domain_name", eq(domain_name)), ("user_id", eq(user_id))],
        )
        .await
    }

    async fn insert_domain(&self, domain: &DomainRecord) -> Result<String> {
        self.insert(DOMAINS_TABLE, domain).await
    }

    async fn insert_tunnel(&self, tunnel: &TunnelRecord) -> Result<String> {
        self.insert(TUNNELS_TABLE, tunnel).await
    }

    async fn update_tunnel_status(&self, id: &str, status: TunnelStatus) -> Result<()> {
        debug!("PATCH {} id={} status={}", TUNNELS_TABLE, id, status);
        let _: Value = self
            .send(
                self.request(Method::PATCH, TUNNELS_TABLE)
                    .query(&[("id", eq(id))])
                    .header("Prefer", "return=representation")
                    .json(&json!({ "status": status })),
                &format!("update tunnel {}", id),
            )
            .await?;
        Ok(())
    }

    async fn get_tunnel(&self, id: &str, user_id: &str) -> Result<Option<TunnelRecord>> {
        debug!("GET {} id={}", TUNNELS_TABLE, id);
        let rows: Vec<TunnelRecord> = self
            .send(
                self.request(Method::GET, TUNNELS_TABLE).query(&[
                    ("id", eq(id)),
                    ("user_id", eq(user_id)),
                    ("select", "*".to_string()),
                ]),
                &format!("load tunnel {}", id),
            )
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn delete_tunnel(&self, id: &str) -> Result<()> {
        debug!("DELETE {} id={}", TUNNELS_TABLE, id);
        let _: Value = self
            .send(
                self.request(Method::DELETE, TUNNELS_TABLE)
                    .query(&[("id", eq(id))])
                    .header("Prefer", "return=representation"),
                &format!("delete tunnel {}", id),
            )
            .await?;
        Ok(())
    }

    async fn insert_event(&self, event: &ServerEvent) -> Result<String> {
        self.insert(EVENTS_TABLE, event).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::recorder::StateRecorder;
    use crate::testing::{self, HttpStub};
    use std::sync::Arc;

    fn store_at(stub: &HttpStub) -> RestDatastore {
        RestDatastore::new(&DatastoreConfig {
            url: stub.base_url.clone(),
            service_key: Secret::new("service-key"),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_register_server_looks_up_then_inserts() {
        let stub = HttpStub::start(&[(200, "[]"), (201, r#"[{"id":"srv-9"}]"#)]).await;
        let recorder = StateRecorder::new(Arc::new(store_at(&stub)), "owner-1");

        let id = recorder
            .register_server(&testing::provision_config().host)
            .await
            .unwrap();
        assert_eq!(id, "srv-9");

        let requests = stub.requests();
        assert_eq!(requests.len(), 2);

        let lookup = &requests[0];
        assert_eq!(lookup.method, "GET");
        assert_eq!(
            lookup.target,
            "/rest/v1/user_servers?ip_address=eq.203.0.113.10&user_id=eq.owner-1&select=id"
        );
        assert_eq!(lookup.header("apikey"), Some("service-key"));
        assert_eq!(lookup.header("authorization"), Some("Bearer service-key"));

        let insert = &requests[1];
        assert_eq!(insert.method, "POST");
        assert_eq!(insert.target, "/rest/v1/user_servers");
        assert_eq!(insert.header("prefer"), Some("return=representation"));
        assert_eq!(insert.header("apikey"), Some("service-key"));
        let row = insert.json();
        assert_eq!(row["ip_address"], "203.0.113.10");
        assert_eq!(row["ssh_password"], "hunter2");
        assert_eq!(row["status"], "ready");
    }

    #[tokio::test]
    async fn test_server_error_aborts_registration() {
        let stub = HttpStub::start(&[(500, "upstream down")]).await;
        let recorder = StateRecorder::new(Arc::new(store_at(&stub)), "owner-1");

        let err = recorder
            .register_server(&testing::provision_config().host)
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ProvisionError>(),
            Some(ProvisionError::Datastore { status: 500, .. })
        ));
        assert!(format!("{:#}", err).contains("upstream down"));
        assert_eq!(stub.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_rejected_insert_aborts_registration() {
        let stub = HttpStub::start(&[
            (200, "[]"),
            (401, r#"{"message":"Invalid API key"}"#),
        ])
        .await;
        let recorder = StateRecorder::new(Arc::new(store_at(&stub)), "owner-1");

        let err = recorder
            .register_server(&testing::provision_config().host)
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ProvisionError>(),
            Some(ProvisionError::Datastore { status: 401, .. })
        ));
        assert!(format!("{:#}", err).contains("Invalid API key"));
    }

    #[tokio::test]
    async fn test_status_update_patches_by_id() {
        let stub = HttpStub::start(&[(200, "[]")]).await;
        store_at(&stub)
            .update_tunnel_status("rec-1", TunnelStatus::Failed)
            .await
            .unwrap();

        let requests = stub.requests();
        assert_eq!(requests[0].method, "PATCH");
        assert_eq!(requests[0].target, "/rest/v1/docker_tunnels?id=eq.rec-1");
        assert_eq!(requests[0].json(), json!({ "status": "failed" }));
    }

    #[test]
    fn test_rest_url_is_derived_from_base() {
        let store = RestDatastore::new(&DatastoreConfig {
            url: "https://db.example.com/".into(),
            service_key: Secret::new("key"),
        })
        .unwrap();
        assert_eq!(store.rest_url, "https://db.example.com/rest/v1");
    }

    #[test]
    fn test_id_rows_accept_text_and_numeric_ids() {
        let rows: Vec<IdRow> = serde_json::from_str(r#"[{"id":"a-1"},{"id":42}]"#).unwrap();
        let ids: Vec<String> = rows.into_iter().map(IdRow::into_id).collect();
        assert_eq!(ids, vec!["a-1".to_string(), "42".to_string()]);
    }

    #[test]
    fn test_equality_filter() {
        assert_eq!(eq("10.0.0.1"), "eq.10.0.0.1");
    }
}
