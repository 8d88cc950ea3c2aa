use crate::error::ProvisionError;
use crate::server::model::{CommandOutput, SshAuth, SshConnectConfig};
use crate::server::{Connector, RemoteExecutor};
use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{debug, info};
use russh::client::{self, Handle};
use russh::keys::{load_secret_key, PrivateKeyWithHashAlg, PublicKey};
use russh::{ChannelMsg, Disconnect};
use std::sync::Arc;
use tokio::time::Duration;

pub struct Ssh {
    session: Handle<ClientHandler>,
    target: String,
}

#[derive(Clone, Debug, Copy)]
struct ClientHandler;

impl client::Handler for ClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        // Hosts are freshly created machines with no known_hosts entry yet.
        debug!("Accepting server public key: {:?}", server_public_key);

        Ok(true)
    }
}

impl Ssh {
    pub async fn init(config: &SshConnectConfig) -> Result<Ssh> {
        let ssh_config = client::Config {
            keepalive_interval: Some(Duration::from_secs(30)),
            ..Default::default()
        };
        let ssh_config = Arc::new(ssh_config);

        let handler = ClientHandler;

        let target = config.target();
        info!("Connecting to {}@{}", config.ssh_user, target);
        let ssh_addr = tokio::net::lookup_host(&target)
            .await
            .context("Failed to resolve hostname")?
            .next()
            .ok_or_else(|| anyhow::anyhow!("Hostname resolved but no IP found"))?;

        let mut session = client::connect(ssh_config, ssh_addr, handler)
            .await
            .map_err(|e| ProvisionError::Transport(format!("failed to connect to {target}: {e}")))?;

        let auth_res = match &config.auth {
            SshAuth::Password(password) => session
                .authenticate_password(&config.ssh_user, password.expose())
                .await
                .map_err(|e| ProvisionError::Transport(e.to_string()))?,
            SshAuth::Key(key_path) => {
                let key_pair = load_secret_key(key_path, None).with_context(|| {
                    format!("Failed to load private key {}", key_path.display())
                })?;
                let hash_alg = session
                    .best_supported_rsa_hash()
                    .await
                    .map_err(|e| ProvisionError::Transport(e.to_string()))?
                    .flatten();
                session
                    .authenticate_publickey(
                        &config.ssh_user,
                        PrivateKeyWithHashAlg::new(Arc::new(key_pair), hash_alg),
                    )
                    .await
                    .map_err(|e| ProvisionError::Transport(e.to_string()))?
            }
        };

        if !auth_res.success() {
            return Err(ProvisionError::Authentication {
                user: config.ssh_user.clone(),
                host: target,
            }
            .into());
        }

        info!("SSH connection established");

        Ok(Self { session, target })
    }
}

#[async_trait]
impl RemoteExecutor for Ssh {
    async fn exec(&self, command: &str) -> Result<CommandOutput> {
        let mut channel = self.session.channel_open_session().await.map_err(|e| {
            ProvisionError::Transport(format!("failed to open channel on {}: {e}", self.target))
        })?;
        channel
            .exec(true, command)
            .await
            .map_err(|e| ProvisionError::Transport(format!("failed to start command: {e}")))?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut exit_code = None;
        let mut signal = None;

        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { ref data } => stdout.extend_from_slice(data),
                // ext 1 is SSH_EXTENDED_DATA_STDERR
                ChannelMsg::ExtendedData { ref data, ext: 1 } => stderr.extend_from_slice(data),
                ChannelMsg::ExitStatus { exit_status } => exit_code = Some(exit_status),
                ChannelMsg::ExitSignal { signal_name, .. } => {
                    signal = Some(format!("{:?}", signal_name))
                }
                _ => {}
            }
        }

        let exit_code = match (exit_code, signal) {
            (Some(code), _) => code,
            (None, Some(signal)) => {
                return Err(ProvisionError::Transport(format!(
                    "remote command killed by signal {signal}"
                ))
                .into())
            }
            (None, None) => {
                return Err(ProvisionError::Transport(
                    "channel closed without an exit status".to_string(),
                )
                .into())
            }
        };

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            exit_code,
        })
    }

    async fn close(&self) -> Result<()> {
        debug!("Closing SSH session to {}", self.target);
        self.session
            .disconnect(Disconnect::ByApplication, "", "English")
            .await
            .map_err(|e| ProvisionError::Transport(format!("disconnect failed: {e}")))?;
        info!("SSH connection closed");
        Ok(())
    }
}

/// Connector backed by real SSH sessions.
#[derive(Clone, Debug, Default)]
pub struct SshConnector;

#[async_trait]
impl Connector for SshConnector {
    async fn connect(&self, config: &SshConnectConfig) -> Result<Box<dyn RemoteExecutor>> {
        let ssh = Ssh::init(config).await?;
        Ok(Box::new(ssh))
    }
}
