use thiserror::Error;

/// Failure kinds surfaced by a provisioning or teardown run.
///
/// Services return `anyhow::Result` and attach context as they go; the root
/// cause is always one of these variants so callers (and tests) can
/// `downcast_ref` to tell them apart.
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("authentication failed for {user}@{host}")]
    Authentication { user: String, host: String },

    #[error("ssh transport error: {0}")]
    Transport(String),

    #[error("Cloudflare API error: {0}")]
    Api(String),

    #[error("datastore request failed ({status}): {body}")]
    Datastore { status: u16, body: String },

    #[error("{label} failed (exit {exit_code}): {stderr}")]
    RemoteCommand {
        label: String,
        exit_code: u32,
        stderr: String,
    },

    #[error("unexpected output from {0}")]
    UnexpectedOutput(String),

    #[error("missing required configuration: {}", .0.join(", "))]
    MissingConfig(Vec<String>),

    #[error("invalid value for {key}: {value:?}")]
    InvalidConfig { key: String, value: String },

    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },
}

pub type Result<T> = anyhow::Result<T>;
