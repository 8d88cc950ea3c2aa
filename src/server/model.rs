use crate::config::Secret;
use std::path::PathBuf;

#[derive(Clone, Debug)]
pub enum SshAuth {
    Password(Secret),
    Key(PathBuf),
}

impl SshAuth {
    /// Password to persist on the server record; key-based hosts have none.
    pub fn password(&self) -> Option<&Secret> {
        match self {
            SshAuth::Password(password) => Some(password),
            SshAuth::Key(_) => None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct SshConnectConfig {
    pub ssh_host: String,
    pub ssh_port: u16,
    pub ssh_user: String,
    pub auth: SshAuth,
}

impl SshConnectConfig {
    pub fn target(&self) -> String {
        format!("{}:{}", self.ssh_host, self.ssh_port)
    }
}

/// Captured result of one remote command.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: u32,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Text to report when the command failed: stderr, or the last stdout
    /// line for scripts that write their errors to stdout.
    pub fn failure_detail(&self) -> String {
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            return stderr.to_string();
        }
        self.stdout
            .lines()
            .rev()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .unwrap_or("no output available")
            .to_string()
    }
}
