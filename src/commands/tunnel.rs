use crate::service::teardown::{Teardown, TeardownReport};
use crate::service::workflow::{ProvisionOutcome, Provisioner};
use crate::state::AppState;
use anyhow::Result;
use log::debug;

pub async fn provision(state: &AppState) -> Result<ProvisionOutcome> {
    debug!("Provisioning {}", state.config.host.target());
    let outcome = Provisioner::new(
        &state.config,
        &state.connector,
        state.provider.as_ref(),
        state.recorder(),
    )
    .run()
    .await?;
    Ok(outcome)
}

pub async fn teardown(state: &AppState, tunnel_record_id: &str) -> Result<TeardownReport> {
    debug!("Tearing down tunnel record {}", tunnel_record_id);
    Teardown::new(
        &state.config,
        &state.connector,
        state.provider.as_ref(),
        state.recorder(),
    )
    .run(tunnel_record_id)
    .await
}
