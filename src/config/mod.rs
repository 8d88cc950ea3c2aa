mod secret;

pub use secret::Secret;

use crate::error::ProvisionError;
use crate::server::model::{SshAuth, SshConnectConfig};
use log::debug;
use std::path::PathBuf;

pub const DEFAULT_SSH_PORT: u16 = 22;
pub const DEFAULT_CLOUDFLARE_API_BASE: &str = "https://api.cloudflare.com/client/v4";
pub const DEFAULT_APP_NAME: &str = "my-production-nextjs-app";
pub const DEFAULT_APP_IMAGE: &str = "node:lts-bookworm";
pub const DEFAULT_CONTAINER_PORT: u16 = 3000;

#[derive(Clone, Debug)]
pub struct DatastoreConfig {
    pub url: String,
    pub service_key: Secret,
}

impl DatastoreConfig {
    /// Path of the local ledger when the URL selects the SQLite backend.
    pub fn sqlite_path(&self) -> Option<PathBuf> {
        sqlite_path(&self.url)
    }
}

fn sqlite_path(url: &str) -> Option<PathBuf> {
    url.strip_prefix("sqlite://")
        .or_else(|| url.strip_prefix("sqlite:"))
        .map(PathBuf::from)
}

#[derive(Clone, Debug)]
pub struct CloudflareConfig {
    pub api_base: String,
    pub api_token: Secret,
    pub account_id: String,
    pub zone_id: String,
    pub domain_name: String,
}

#[derive(Clone, Debug)]
pub struct AppSettings {
    pub name: String,
    pub image: String,
    pub container_port: u16,
    pub use_sudo: bool,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            name: DEFAULT_APP_NAME.to_string(),
            image: DEFAULT_APP_IMAGE.to_string(),
            container_port: DEFAULT_CONTAINER_PORT,
            use_sudo: false,
        }
    }
}

/// Everything a run needs, resolved and validated before the first
/// connection is attempted.
#[derive(Clone, Debug)]
pub struct ProvisionConfig {
    pub owner_id: String,
    pub host: SshConnectConfig,
    pub datastore: DatastoreConfig,
    pub cloudflare: CloudflareConfig,
    pub app: AppSettings,
}

impl ProvisionConfig {
    pub fn from_env() -> Result<Self, ProvisionError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup. Every missing required key is
    /// reported in a single error.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ProvisionError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut missing = Vec::new();
        let mut require = |key: &str| {
            let value = get(key);
            if value.is_none() {
                missing.push(key.to_string());
            }
            value.unwrap_or_default()
        };

        let ssh_host = require("SSH_HOST");
        let ssh_user = require("SSH_USERNAME");
        let owner_id = require("OWNER_ID");
        let datastore_url = require("DATASTORE_URL");
        let api_token = require("CLOUDFLARE_API_TOKEN");
        let account_id = require("CLOUDFLARE_ACCOUNT_ID");
        let zone_id = require("CLOUDFLARE_ZONE_ID");
        let domain_name = require("CLOUDFLARE_DOMAIN_NAME");

        let service_key = match get("DATASTORE_SERVICE_KEY") {
            Some(key) => key,
            None if sqlite_path(&datastore_url).is_some() => String::new(),
            None => {
                missing.push("DATASTORE_SERVICE_KEY".to_string());
                String::new()
            }
        };

        let auth = match (get("SSH_PASSWORD"), get("SSH_KEY_PATH")) {
            (_, Some(key_path)) => Some(SshAuth::Key(PathBuf::from(key_path))),
            (Some(password), None) => Some(SshAuth::Password(Secret::new(password))),
            (None, None) => {
                missing.push("SSH_PASSWORD or SSH_KEY_PATH".to_string());
                None
            }
        };

        if !missing.is_empty() {
            return Err(ProvisionError::MissingConfig(missing));
        }

        let ssh_port = parse_or(&get, "SSH_PORT", DEFAULT_SSH_PORT)?;
        let container_port = parse_or(&get, "APP_CONTAINER_PORT", DEFAULT_CONTAINER_PORT)?;
        let use_sudo = parse_bool(&get, "SSH_USE_SUDO")?;

        let config = Self {
            owner_id,
            host: SshConnectConfig {
                ssh_host,
                ssh_port,
                ssh_user,
                auth: auth.ok_or_else(|| {
                    ProvisionError::MissingConfig(vec!["SSH_PASSWORD or SSH_KEY_PATH".into()])
                })?,
            },
            datastore: DatastoreConfig {
                url: datastore_url.trim_end_matches('/').to_string(),
                service_key: Secret::new(service_key),
            },
            cloudflare: CloudflareConfig {
                api_base: get("CLOUDFLARE_API_BASE")
                    .unwrap_or_else(|| DEFAULT_CLOUDFLARE_API_BASE.to_string())
                    .trim_end_matches('/')
                    .to_string(),
                api_token: Secret::new(api_token),
                account_id,
                zone_id,
                domain_name: domain_name.trim_matches('.').to_string(),
            },
            app: AppSettings {
                name: get("APP_NAME").unwrap_or_else(|| DEFAULT_APP_NAME.to_string()),
                image: get("APP_IMAGE").unwrap_or_else(|| DEFAULT_APP_IMAGE.to_string()),
                container_port,
                use_sudo,
            },
        };

        debug!(
            "Loaded configuration for {}@{} (owner {})",
            config.host.ssh_user,
            config.host.target(),
            config.owner_id
        );
        Ok(config)
    }
}

fn parse_or<G>(get: &G, key: &str, default: u16) -> Result<u16, ProvisionError>
where
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        None => Ok(default),
        Some(raw) => match raw.parse::<u16>() {
            Ok(port) if port > 0 => Ok(port),
            _ => Err(ProvisionError::InvalidConfig {
                key: key.to_string(),
                value: raw,
            }),
        },
    }
}

fn parse_bool<G>(get: &G, key: &str) -> Result<bool, ProvisionError>
where
    G: Fn(&str) -> Option<String>,
{
    match get(key).as_deref().map(str::to_ascii_lowercase).as_deref() {
        None => Ok(false),
        Some("1" | "true" | "yes" | "on") => Ok(true),
        Some("0" | "false" | "no" | "off") => Ok(false),
        Some(other) => Err(ProvisionError::InvalidConfig {
            key: key.to_string(),
            value: other.to_string(),
        }),
    }
}
