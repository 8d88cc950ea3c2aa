use crate::cloudflare::{CloudflareClient, TunnelProvider};
use crate::config::ProvisionConfig;
use crate::database::recorder::StateRecorder;
use crate::database::{self, Datastore};
use crate::server::ssh::SshConnector;
use anyhow::Result;
use std::sync::Arc;

/// Collaborators shared by every command of one process run.
pub struct AppState {
    pub config: ProvisionConfig,
    pub connector: SshConnector,
    pub provider: Arc<dyn TunnelProvider>,
    pub store: Arc<dyn Datastore>,
}

impl AppState {
    pub async fn init(config: ProvisionConfig) -> Result<Self> {
        let provider: Arc<dyn TunnelProvider> =
            Arc::new(CloudflareClient::new(&config.cloudflare)?);
        let store = database::open(&config.datastore).await?;
        Ok(Self {
            config,
            connector: SshConnector,
            provider,
            store,
        })
    }

    pub fn recorder(&self) -> StateRecorder {
        StateRecorder::new(self.store.clone(), self.config.owner_id.clone())
    }
}
