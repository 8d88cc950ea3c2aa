use crate::config::Secret;
use crate::error::ProvisionError;
use crate::server::scripts::TUNNEL_LOG_PATH;
use crate::server::RemoteExecutor;
use anyhow::{Context, Result};
use base64::prelude::*;
use log::{debug, error, info};
use shell_escape::escape;
use std::borrow::Cow;

pub trait RemoteCommand {
    type Output;

    /// Short human-readable name used in progress logs and errors.
    fn label(&self) -> String;

    fn to_shell_string(&self) -> String;

    fn build_shell_string(&self, use_sudo: bool) -> String {
        let shell_string = self.to_shell_string();
        if use_sudo {
            format!("sudo -n {}", shell_string)
        } else {
            shell_string
        }
    }

    /// The command as it may appear in logs.
    fn display_string(&self, use_sudo: bool) -> String {
        self.build_shell_string(use_sudo)
    }

    fn parse_output(&self, output: &str) -> Option<Self::Output>;
}

/// Pipes a script through base64 so multi-line content survives quoting.
fn encoded_pipeline(script: &str, shell: &str) -> String {
    let encoded = BASE64_STANDARD.encode(script.as_bytes());
    format!("echo {} | base64 -d | {}", encoded, shell)
}

fn first_line(output: &str) -> Option<String> {
    output
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_string)
}

/// A multi-line script executed by the host's shell.
pub struct HostScriptCmd<'a> {
    pub label: &'a str,
    pub script: &'a str,
}

impl RemoteCommand for HostScriptCmd<'_> {
    type Output = String;

    fn label(&self) -> String {
        self.label.to_string()
    }

    fn to_shell_string(&self) -> String {
        encoded_pipeline(self.script, "bash")
    }

    fn build_shell_string(&self, use_sudo: bool) -> String {
        // sudo has to wrap the interpreter, not the echo.
        if use_sudo {
            encoded_pipeline(self.script, "sudo -n bash")
        } else {
            self.to_shell_string()
        }
    }

    fn display_string(&self, use_sudo: bool) -> String {
        format!(
            "<{}: {} byte script{}>",
            self.label,
            self.script.len(),
            if use_sudo { ", via sudo" } else { "" }
        )
    }

    fn parse_output(&self, output: &str) -> Option<Self::Output> {
        Some(output.to_string())
    }
}

pub struct VersionCheckCmd {
    pub command: &'static str,
}

impl RemoteCommand for VersionCheckCmd {
    type Output = String;

    fn label(&self) -> String {
        format!("`{}`", self.command)
    }

    fn to_shell_string(&self) -> String {
        self.command.to_string()
    }

    fn parse_output(&self, output: &str) -> Option<Self::Output> {
        first_line(output)
    }
}

pub struct PullImageCmd {
    pub image: String,
}

impl RemoteCommand for PullImageCmd {
    type Output = ();

    fn label(&self) -> String {
        format!("pull image {}", self.image)
    }

    fn to_shell_string(&self) -> String {
        format!("docker pull {}", escape(Cow::from(&self.image)))
    }

    fn parse_output(&self, _output: &str) -> Option<Self::Output> {
        Some(())
    }
}

/// Starts a detached container kept alive by `tail -f /dev/null`.
pub struct RunContainerCmd {
    pub name: String,
    pub image: String,
    pub host_port: u16,
    pub container_port: u16,
}

impl RemoteCommand for RunContainerCmd {
    type Output = String;

    fn label(&self) -> String {
        format!("create container {}", self.name)
    }

    fn to_shell_string(&self) -> String {
        format!(
            "docker run -d --name {} -p {}:{} --entrypoint tail {} -f /dev/null",
            escape(Cow::from(&self.name)),
            self.host_port,
            self.container_port,
            escape(Cow::from(&self.image)),
        )
    }

    /// `docker run -d` prints the full container id as its last stdout line.
    fn parse_output(&self, output: &str) -> Option<Self::Output> {
        output
            .lines()
            .rev()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(str::to_string)
    }
}

/// A multi-line script executed by bash inside a running container.
pub struct ContainerScriptCmd<'a> {
    pub label: &'a str,
    pub container_id: &'a str,
    pub script: &'a str,
}

impl RemoteCommand for ContainerScriptCmd<'_> {
    type Output = String;

    fn label(&self) -> String {
        self.label.to_string()
    }

    fn to_shell_string(&self) -> String {
        let pipeline = encoded_pipeline(self.script, "bash");
        format!(
            "docker exec {} bash -c {}",
            escape(Cow::from(self.container_id)),
            escape(Cow::from(pipeline.as_str()))
        )
    }

    fn display_string(&self, use_sudo: bool) -> String {
        format!(
            "<{}: {} byte script in container {}{}>",
            self.label,
            self.script.len(),
            short_id(self.container_id),
            if use_sudo { ", via sudo" } else { "" }
        )
    }

    fn parse_output(&self, output: &str) -> Option<Self::Output> {
        Some(output.to_string())
    }
}

/// Launches `cloudflared tunnel run` in the background inside the container.
pub struct StartTunnelClientCmd<'a> {
    pub container_id: &'a str,
    pub tunnel_id: &'a str,
    pub token: &'a Secret,
}

impl StartTunnelClientCmd<'_> {
    fn render(&self, token: &str, use_sudo: bool) -> String {
        let inner = format!(
            "nohup cloudflared tunnel run --token {} {} > {} 2>&1 &",
            escape(Cow::from(token)),
            escape(Cow::from(self.tunnel_id)),
            TUNNEL_LOG_PATH
        );
        let command = format!(
            "docker exec {} bash -c {}",
            escape(Cow::from(self.container_id)),
            escape(Cow::from(inner.as_str()))
        );
        if use_sudo {
            format!("sudo -n {}", command)
        } else {
            command
        }
    }
}

impl RemoteCommand for StartTunnelClientCmd<'_> {
    type Output = ();

    fn label(&self) -> String {
        format!("start tunnel client in container {}", short_id(self.container_id))
    }

    fn to_shell_string(&self) -> String {
        self.render(self.token.expose(), false)
    }

    fn display_string(&self, use_sudo: bool) -> String {
        self.render("***", use_sudo)
    }

    fn parse_output(&self, _output: &str) -> Option<Self::Output> {
        Some(())
    }
}

pub struct RemoveContainerCmd<'a> {
    pub container_id: &'a str,
}

impl RemoteCommand for RemoveContainerCmd<'_> {
    type Output = ();

    fn label(&self) -> String {
        format!("remove container {}", short_id(self.container_id))
    }

    fn to_shell_string(&self) -> String {
        format!("docker rm -f {}", escape(Cow::from(self.container_id)))
    }

    fn parse_output(&self, _output: &str) -> Option<Self::Output> {
        Some(())
    }
}

/// First 12 characters, the way `docker ps` abbreviates ids.
pub fn short_id(id: &str) -> &str {
    match id.char_indices().nth(12) {
        Some((end, _)) => &id[..end],
        None => id,
    }
}

/// Executes `command`, failing on a non-zero exit status or output the
/// command cannot parse.
pub async fn run_remote<C>(
    executor: &dyn RemoteExecutor,
    command: &C,
    use_sudo: bool,
) -> Result<C::Output>
where
    C: RemoteCommand + Sync,
{
    let label = command.label();
    info!("Executing {}", label);
    debug!("$ {}", command.display_string(use_sudo));

    let output = executor
        .exec(&command.build_shell_string(use_sudo))
        .await
        .with_context(|| format!("{label} could not be executed"))?;

    let stdout = output.stdout.trim();
    if !stdout.is_empty() {
        debug!("[{}] stdout:\n{}", label, stdout);
    }
    let stderr = output.stderr.trim();
    if !stderr.is_empty() {
        debug!("[{}] stderr:\n{}", label, stderr);
    }

    if !output.success() {
        error!("{} exited with status {}", label, output.exit_code);
        return Err(ProvisionError::RemoteCommand {
            label,
            exit_code: output.exit_code,
            stderr: output.failure_detail(),
        }
        .into());
    }

    command
        .parse_output(&output.stdout)
        .ok_or_else(|| ProvisionError::UnexpectedOutput(label).into())
}
