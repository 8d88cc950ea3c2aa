use crate::config::Secret;
use crate::error::ProvisionError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Suffix of the CNAME target Cloudflare assigns to every tunnel.
pub const TUNNEL_CNAME_SUFFIX: &str = "cfargotunnel.com";

/// Origin answering every hostname that has no rule of its own.
pub const CATCH_ALL_SERVICE: &str = "http_status:404";

#[derive(Debug, Clone, Deserialize)]
pub struct ApiMessage {
    #[serde(default)]
    pub code: Option<i64>,
    pub message: String,
}

impl ApiMessage {
    fn describe(&self) -> String {
        match self.code {
            Some(code) => format!("(Code: {}) {}", code, self.message),
            None => self.message.clone(),
        }
    }
}

/// `{success, errors, result}` wrapper around every Cloudflare v4 response.
#[derive(Debug, Deserialize)]
pub struct ApiEnvelope<T> {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub errors: Vec<ApiMessage>,
    pub result: Option<T>,
}

impl<T> ApiEnvelope<T> {
    /// A response counts as failed when `success` is false or any error is
    /// listed; all messages are folded into one error.
    pub fn into_result(self) -> Result<Option<T>, ProvisionError> {
        if self.success && self.errors.is_empty() {
            return Ok(self.result);
        }
        let message = if self.errors.is_empty() {
            "Unknown Cloudflare API error".to_string()
        } else {
            self.errors
                .iter()
                .map(ApiMessage::describe)
                .collect::<Vec<_>>()
                .join("; ")
        };
        Err(ProvisionError::Api(message))
    }
}

/// Decodes a raw response body. Cloudflare sends an envelope on 4xx/5xx as
/// well, so the envelope's messages win over the bare status code. The
/// result is only decoded into `T` once the envelope is known to be a
/// success, since failed calls often carry a placeholder `result`.
pub fn parse_response<T: DeserializeOwned>(
    status: u16,
    body: &str,
) -> Result<Option<T>, ProvisionError> {
    let is_success = (200..300).contains(&status);
    let envelope = match serde_json::from_str::<ApiEnvelope<Value>>(body) {
        Ok(envelope) => envelope,
        Err(_) if !is_success => {
            return Err(ProvisionError::Api(format!(
                "HTTP {}: {}",
                status,
                body.trim()
            )))
        }
        Err(e) => return Err(ProvisionError::Api(format!("malformed response: {}", e))),
    };

    let result = envelope.into_result()?;
    if !is_success {
        return Err(ProvisionError::Api(format!("HTTP {}", status)));
    }
    match result {
        None | Some(Value::Null) => Ok(None),
        Some(value) => serde_json::from_value(value)
            .map(Some)
            .map_err(|e| ProvisionError::Api(format!("malformed response: {}", e))),
    }
}

#[derive(Debug, Serialize)]
pub struct CreateTunnelRequest<'a> {
    pub name: &'a str,
    pub config_src: &'static str,
}

impl<'a> CreateTunnelRequest<'a> {
    /// Remotely managed tunnel: ingress lives in Cloudflare, not in a local
    /// config file.
    pub fn remotely_managed(name: &'a str) -> Self {
        Self {
            name,
            config_src: "cloudflare",
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct TunnelResult {
    pub id: Option<String>,
    pub token: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CreatedTunnel {
    pub id: String,
    pub token: Secret,
}

impl TunnelResult {
    pub fn into_created(self) -> Result<CreatedTunnel, ProvisionError> {
        match (self.id, self.token) {
            (Some(id), Some(token)) if !id.is_empty() && !token.is_empty() => Ok(CreatedTunnel {
                id,
                token: Secret::new(token),
            }),
            _ => Err(ProvisionError::Api(
                "tunnel created but the response carries no id or token".to_string(),
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DnsRecord {
    pub id: String,
    #[serde(rename = "type", default)]
    pub record_type: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub proxied: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DnsRecordRequest {
    #[serde(rename = "type")]
    pub record_type: String,
    pub name: String,
    pub content: String,
    pub proxied: bool,
    pub ttl: u32,
}

impl DnsRecordRequest {
    /// Proxied CNAME from `full_domain` to the tunnel, automatic TTL.
    pub fn tunnel_cname(full_domain: &str, tunnel_id: &str) -> Self {
        Self {
            record_type: "CNAME".to_string(),
            name: full_domain.to_string(),
            content: format!("{}.{}", tunnel_id, TUNNEL_CNAME_SUFFIX),
            proxied: true,
            ttl: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OriginRequest {
    #[serde(rename = "noTLSVerify")]
    pub no_tls_verify: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngressRule {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    pub service: String,
    #[serde(rename = "originRequest", skip_serializing_if = "Option::is_none")]
    pub origin_request: Option<OriginRequest>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngressConfig {
    pub ingress: Vec<IngressRule>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TunnelConfigurationRequest {
    pub config: IngressConfig,
}

impl TunnelConfigurationRequest {
    /// Routes `full_domain` to the app inside the container; the catch-all
    /// 404 rule must stay last because rules are matched in order.
    pub fn single_hostname(full_domain: &str, container_port: u16) -> Self {
        Self {
            config: IngressConfig {
                ingress: vec![
                    IngressRule {
                        hostname: Some(full_domain.to_string()),
                        service: format!("http://localhost:{}", container_port),
                        origin_request: Some(OriginRequest {
                            no_tls_verify: true,
                        }),
                    },
                    IngressRule {
                        hostname: None,
                        service: CATCH_ALL_SERVICE.to_string(),
                        origin_request: None,
                    },
                ],
            },
        }
    }
}
