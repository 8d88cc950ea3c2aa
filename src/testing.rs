//! Test doubles for the remote host, the Cloudflare API and the datastore,
//! plus a one-request-per-connection HTTP responder for the real clients.

use crate::cloudflare::types::{
    parse_response, CreatedTunnel, DnsRecord, DnsRecordRequest, TunnelConfigurationRequest,
    TunnelResult,
};
use crate::cloudflare::TunnelProvider;
use crate::config::{
    AppSettings, CloudflareConfig, DatastoreConfig, ProvisionConfig, Secret,
    DEFAULT_CLOUDFLARE_API_BASE,
};
use crate::database::models::{
    DomainRecord, ServerEvent, ServerRecord, TunnelRecord, TunnelStatus,
};
use crate::database::Datastore;
use crate::error::ProvisionError;
use crate::server::model::{CommandOutput, SshAuth, SshConnectConfig};
use crate::server::{Connector, RemoteExecutor};
use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

pub const CONTAINER_ID: &str = "3f2a9c0d1e4b5a6978877665544332211aabbccddeeff00112233445566778899";
pub const TUNNEL_ID: &str = "c1744f8b-faa1-48a4-9e5c-02ac921467fa";
pub const TUNNEL_TOKEN: &str = "eyJhIjoiYWNjdCIsInQiOiJ0dW4iLCJzIjoic2VjcmV0In0=";

pub fn cloudflare_config() -> CloudflareConfig {
    CloudflareConfig {
        api_base: DEFAULT_CLOUDFLARE_API_BASE.to_string(),
        api_token: Secret::new("cf-api-token"),
        account_id: "acct-1".into(),
        zone_id: "zone-1".into(),
        domain_name: "example.com".into(),
    }
}

pub fn provision_config() -> ProvisionConfig {
    ProvisionConfig {
        owner_id: "owner-1".into(),
        host: SshConnectConfig {
            ssh_host: "203.0.113.10".into(),
            ssh_port: 22,
            ssh_user: "root".into(),
            auth: SshAuth::Password(Secret::new("hunter2")),
        },
        datastore: DatastoreConfig {
            url: "https://db.example.com".into(),
            service_key: Secret::new("service-key"),
        },
        cloudflare: cloudflare_config(),
        app: AppSettings::default(),
    }
}

pub fn ok(stdout: &str) -> CommandOutput {
    CommandOutput {
        stdout: stdout.to_string(),
        stderr: String::new(),
        exit_code: 0,
    }
}

pub fn failed(exit_code: u32, stderr: &str) -> CommandOutput {
    CommandOutput {
        stdout: String::new(),
        stderr: stderr.to_string(),
        exit_code,
    }
}

/// Scripted remote host. The first response whose needle occurs in the
/// command wins; unmatched commands succeed with `ok` on stdout.
#[derive(Clone, Default)]
pub struct FakeExecutor {
    responses: Arc<Mutex<Vec<(String, CommandOutput)>>>,
    commands: Arc<Mutex<Vec<String>>>,
    closed: Arc<AtomicBool>,
}

impl FakeExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// A host with Docker in place that hands out [`CONTAINER_ID`].
    pub fn healthy_host() -> Self {
        Self::new()
            .respond("docker --version", ok("Docker version 27.3.1, build ce12230\n"))
            .respond("docker compose version", ok("Docker Compose version v2.29.7\n"))
            .respond("docker run", ok(&format!("{}\n", CONTAINER_ID)))
    }

    pub fn respond(self, needle: &str, output: CommandOutput) -> Self {
        if let Ok(mut responses) = self.responses.lock() {
            responses.push((needle.to_string(), output));
        }
        self
    }

    /// Puts `output` ahead of every response registered so far.
    pub fn override_with(self, needle: &str, output: CommandOutput) -> Self {
        if let Ok(mut responses) = self.responses.lock() {
            responses.insert(0, (needle.to_string(), output));
        }
        self
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn ran(&self, needle: &str) -> bool {
        self.commands().iter().any(|command| command.contains(needle))
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteExecutor for FakeExecutor {
    async fn exec(&self, command: &str) -> Result<CommandOutput> {
        if let Ok(mut commands) = self.commands.lock() {
            commands.push(command.to_string());
        }
        let responses = self.responses.lock().map(|r| r.clone()).unwrap_or_default();
        Ok(responses
            .into_iter()
            .find(|(needle, _)| command.contains(needle.as_str()))
            .map(|(_, output)| output)
            .unwrap_or_else(|| ok("ok\n")))
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct FakeConnector {
    pub executor: FakeExecutor,
    reject_auth: bool,
    connects: Arc<AtomicUsize>,
}

impl FakeConnector {
    pub fn new(executor: FakeExecutor) -> Self {
        Self {
            executor,
            reject_auth: false,
            connects: Arc::default(),
        }
    }

    pub fn rejecting() -> Self {
        Self {
            reject_auth: true,
            ..Self::default()
        }
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self, config: &SshConnectConfig) -> Result<Box<dyn RemoteExecutor>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.reject_auth {
            return Err(ProvisionError::Authentication {
                user: config.ssh_user.clone(),
                host: config.target(),
            }
            .into());
        }
        Ok(Box::new(self.executor.clone()))
    }
}

#[derive(Default)]
struct ProviderState {
    overrides: HashMap<&'static str, (u16, String)>,
    calls: Vec<String>,
    dns_records: Vec<DnsRecord>,
    ingress: Option<(String, TunnelConfigurationRequest)>,
    tunnels: Vec<String>,
}

/// Cloudflare stand-in. Each operation answers with a JSON envelope that
/// goes through the real response parser; `respond` replaces the envelope
/// of one operation.
#[derive(Clone, Default)]
pub struct FakeProvider {
    state: Arc<Mutex<ProviderState>>,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(self, operation: &'static str, status: u16, body: &str) -> Self {
        if let Ok(mut state) = self.state.lock() {
            state.overrides.insert(operation, (status, body.to_string()));
        }
        self
    }

    /// Pretends `name` already resolves through a tunnel CNAME.
    pub fn with_dns_record(self, id: &str, name: &str) -> Self {
        if let Ok(mut state) = self.state.lock() {
            state.dns_records.push(DnsRecord {
                id: id.to_string(),
                record_type: "CNAME".into(),
                name: name.to_string(),
                content: format!("{}.cfargotunnel.com", TUNNEL_ID),
                proxied: Some(true),
            });
        }
        self
    }

    pub fn with_tunnel(self, tunnel_id: &str) -> Self {
        if let Ok(mut state) = self.state.lock() {
            state.tunnels.push(tunnel_id.to_string());
        }
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.state
            .lock()
            .map(|s| s.calls.clone())
            .unwrap_or_default()
    }

    pub fn dns_records(&self) -> Vec<DnsRecord> {
        self.state
            .lock()
            .map(|s| s.dns_records.clone())
            .unwrap_or_default()
    }

    pub fn tunnels(&self) -> Vec<String> {
        self.state
            .lock()
            .map(|s| s.tunnels.clone())
            .unwrap_or_default()
    }

    pub fn ingress(&self) -> Option<(String, TunnelConfigurationRequest)> {
        self.state.lock().ok().and_then(|s| s.ingress.clone())
    }

    fn answer<T: serde::de::DeserializeOwned>(
        &self,
        operation: &'static str,
        default: serde_json::Value,
    ) -> Result<Option<T>> {
        let (status, body) = {
            let mut state = self
                .state
                .lock()
                .map_err(|_| anyhow::anyhow!("provider state poisoned"))?;
            state.calls.push(operation.to_string());
            state
                .overrides
                .get(operation)
                .cloned()
                .unwrap_or_else(|| {
                    (
                        200,
                        json!({"success": true, "errors": [], "result": default}).to_string(),
                    )
                })
        };
        Ok(parse_response(status, &body)?)
    }

    fn update(&self, f: impl FnOnce(&mut ProviderState)) {
        if let Ok(mut state) = self.state.lock() {
            f(&mut state);
        }
    }
}

#[async_trait]
impl TunnelProvider for FakeProvider {
    async fn create_tunnel(&self, name: &str) -> Result<CreatedTunnel> {
        let result: Option<TunnelResult> = self.answer(
            "create_tunnel",
            json!({"id": TUNNEL_ID, "name": name, "token": TUNNEL_TOKEN}),
        )?;
        let tunnel = result
            .ok_or_else(|| ProvisionError::Api("tunnel creation returned no result".into()))?
            .into_created()?;
        self.update(|s| s.tunnels.push(tunnel.id.clone()));
        Ok(tunnel)
    }

    async fn configure_tunnel(
        &self,
        tunnel_id: &str,
        config: &TunnelConfigurationRequest,
    ) -> Result<()> {
        self.answer::<serde_json::Value>("configure_tunnel", json!({"version": 1}))?;
        self.update(|s| s.ingress = Some((tunnel_id.to_string(), config.clone())));
        Ok(())
    }

    async fn create_dns_record(&self, record: &DnsRecordRequest) -> Result<DnsRecord> {
        let id = format!("dns-{}", self.dns_records().len() + 1);
        let created: Option<DnsRecord> = self.answer(
            "create_dns_record",
            json!({
                "id": id,
                "type": record.record_type,
                "name": record.name,
                "content": record.content,
                "proxied": record.proxied
            }),
        )?;
        let created =
            created.ok_or_else(|| ProvisionError::Api("DNS record creation returned no result".into()))?;
        self.update(|s| s.dns_records.push(created.clone()));
        Ok(created)
    }

    async fn find_dns_records(&self, name: &str) -> Result<Vec<DnsRecord>> {
        let matching: Vec<DnsRecord> = self
            .dns_records()
            .into_iter()
            .filter(|record| record.name == name)
            .collect();
        let found: Option<Vec<DnsRecord>> =
            self.answer("find_dns_records", serde_json::to_value(&matching)?)?;
        Ok(found.unwrap_or_default())
    }

    async fn delete_dns_record(&self, record_id: &str) -> Result<()> {
        self.answer::<serde_json::Value>("delete_dns_record", json!({"id": record_id}))?;
        self.update(|s| s.dns_records.retain(|record| record.id != record_id));
        Ok(())
    }

    async fn delete_tunnel(&self, tunnel_id: &str) -> Result<()> {
        self.answer::<serde_json::Value>("delete_tunnel", json!({"id": tunnel_id}))?;
        self.update(|s| s.tunnels.retain(|id| id != tunnel_id));
        Ok(())
    }
}

#[derive(Default)]
struct Tables {
    servers: Vec<ServerRecord>,
    domains: Vec<(String, DomainRecord)>,
    tunnels: Vec<TunnelRecord>,
    events: Vec<ServerEvent>,
}

/// In-memory datastore with the same lookup semantics as the real backends.
#[derive(Clone, Default)]
pub struct MemoryDatastore {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryDatastore {
    pub fn servers(&self) -> Vec<ServerRecord> {
        self.tables
            .lock()
            .map(|t| t.servers.clone())
            .unwrap_or_default()
    }

    pub fn domains(&self) -> Vec<DomainRecord> {
        self.tables
            .lock()
            .map(|t| t.domains.iter().map(|(_, d)| d.clone()).collect())
            .unwrap_or_default()
    }

    pub fn tunnels(&self) -> Vec<TunnelRecord> {
        self.tables
            .lock()
            .map(|t| t.tunnels.clone())
            .unwrap_or_default()
    }

    pub fn events(&self) -> Vec<ServerEvent> {
        self.tables
            .lock()
            .map(|t| t.events.clone())
            .unwrap_or_default()
    }

    fn with<T>(&self, f: impl FnOnce(&mut Tables) -> T) -> Result<T> {
        let mut tables = self
            .tables
            .lock()
            .map_err(|_| anyhow::anyhow!("datastore poisoned"))?;
        Ok(f(&mut tables))
    }
}

#[async_trait]
impl Datastore for MemoryDatastore {
    async fn find_server_id(&self, ip_address: &str, user_id: &str) -> Result<Option<String>> {
        self.with(|t| {
            t.servers
                .iter()
                .find(|s| s.ip_address == ip_address && s.user_id == user_id)
                .map(|s| s.id.clone())
        })
    }

    async fn insert_server(&self, server: &ServerRecord) -> Result<String> {
        self.with(|t| {
            t.servers.push(server.clone());
            server.id.clone()
        })
    }

    async fn find_domain_id(&self, domain_name: &str, user_id: &str) -> Result<Option<String>> {
        self.with(|t| {
            t.domains
                .iter()
                .find(|(_, d)| d.domain_name == domain_name && d.user_id == user_id)
                .map(|(id, _)| id.clone())
        })
    }

    async fn insert_domain(&self, domain: &DomainRecord) -> Result<String> {
        self.with(|t| {
            let id = (t.domains.len() + 1).to_string();
            t.domains.push((id.clone(), domain.clone()));
            id
        })
    }

    async fn insert_tunnel(&self, tunnel: &TunnelRecord) -> Result<String> {
        self.with(|t| {
            t.tunnels.push(tunnel.clone());
            tunnel.id.clone()
        })
    }

    async fn update_tunnel_status(&self, id: &str, status: TunnelStatus) -> Result<()> {
        self.with(|t| {
            t.tunnels
                .iter_mut()
                .filter(|record| record.id == id)
                .for_each(|record| record.status = status)
        })
    }

    async fn get_tunnel(&self, id: &str, user_id: &str) -> Result<Option<TunnelRecord>> {
        self.with(|t| {
            t.tunnels
                .iter()
                .find(|record| record.id == id && record.user_id == user_id)
                .cloned()
        })
    }

    async fn delete_tunnel(&self, id: &str) -> Result<()> {
        let removed = self.with(|t| {
            let before = t.tunnels.len();
            t.tunnels.retain(|record| record.id != id);
            before - t.tunnels.len()
        })?;
        if removed == 0 {
            return Err(ProvisionError::NotFound {
                kind: "tunnel record",
                id: id.to_string(),
            }
            .into());
        }
        Ok(())
    }

    async fn insert_event(&self, event: &ServerEvent) -> Result<String> {
        self.with(|t| {
            t.events.push(event.clone());
            event.id.clone()
        })
    }
}

/// An HTTP request as the stub server received it.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub target: String,
    headers: Vec<(String, String)>,
    pub body: String,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn json(&self) -> serde_json::Value {
        serde_json::from_str(&self.body).unwrap()
    }
}

/// Answers one request per scripted `(status, body)` pair, in order, and
/// records what it was sent.
pub struct HttpStub {
    pub base_url: String,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl HttpStub {
    pub async fn start(responses: &[(u16, &str)]) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        let requests: Arc<Mutex<Vec<RecordedRequest>>> = Arc::default();
        let recorded = Arc::clone(&requests);
        let responses: Vec<(u16, String)> = responses
            .iter()
            .map(|(status, body)| (*status, body.to_string()))
            .collect();

        tokio::spawn(async move {
            for (status, body) in responses {
                let Ok((mut stream, _)) = listener.accept().await else {
                    return;
                };
                let Some(request) = read_request(&mut stream).await else {
                    return;
                };
                recorded.lock().unwrap().push(request);
                let response = format!(
                    "HTTP/1.1 {} Stub\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            }
        });

        Self { base_url, requests }
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }
}

async fn read_request(stream: &mut TcpStream) -> Option<RecordedRequest> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let header_end = loop {
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos;
        }
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let mut lines = head.split("\r\n");
    let mut request_line = lines.next()?.split_whitespace();
    let method = request_line.next()?.to_string();
    let target = request_line.next()?.to_string();
    let headers: Vec<(String, String)> = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(key, value)| (key.trim().to_ascii_lowercase(), value.trim().to_string()))
        .collect();
    let length = headers
        .iter()
        .find(|(key, _)| key == "content-length")
        .and_then(|(_, value)| value.parse::<usize>().ok())
        .unwrap_or(0);

    let mut body = buf[header_end + 4..].to_vec();
    while body.len() < length {
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..n]);
    }

    Some(RecordedRequest {
        method,
        target,
        headers,
        body: String::from_utf8_lossy(&body).to_string(),
    })
}
