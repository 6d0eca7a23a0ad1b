//! Podman sandbox provider
//!
//! Drives the podman CLI for the sandbox lifecycle:
//! - Checking podman availability
//! - Pulling the deploy image
//! - Creating, starting, waiting on, stopping and removing the job container
//!
//! Container output is read from podman's Docker-compatible API socket, which
//! multiplexes stdout and stderr into one frame sequence in emission order.

use async_trait::async_trait;
use bollard::container::{LogOutput, LogsOptions};
use bollard::{API_DEFAULT_VERSION, Docker};
use futures::{StreamExt, future};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info};

use crate::sandbox::{
    LogFrame, LogStream, ProviderError, SandboxHandle, SandboxProvider, SandboxSpec,
};

/// Rootful podman's API socket (`podman system service`)
pub const DEFAULT_SOCKET: &str = "unix:///run/podman/podman.sock";

/// Seconds to wait for the API to answer a request
const API_TIMEOUT_SECS: u64 = 120;

/// Sandbox provider backed by the podman CLI and API socket
#[derive(Debug, Clone)]
pub struct PodmanProvider {
    binary: String,
    api: Docker,
}

impl PodmanProvider {
    /// Connects to the podman API listening on `socket`
    ///
    /// Fails when the socket does not exist.
    pub fn connect(socket: &str) -> Result<Self, ProviderError> {
        let api = Docker::connect_with_unix(socket, API_TIMEOUT_SECS, API_DEFAULT_VERSION)?;
        debug!("Podman API at {}", socket);

        Ok(Self {
            binary: "podman".to_string(),
            api,
        })
    }

    /// Uses a different executable (e.g. `docker`, which accepts the same arguments)
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    /// Checks that the CLI is installed and answering
    ///
    /// Returns the reported version string.
    pub async fn check_available(&self) -> Result<String, ProviderError> {
        let version = self.run(&["--version".to_string()]).await?;
        info!("Podman is available: {}", version);
        Ok(version)
    }

    /// Runs one CLI invocation to completion and returns its trimmed stdout
    async fn run(&self, args: &[String]) -> Result<String, ProviderError> {
        let command = self.describe(args);

        let output = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| ProviderError::Spawn {
                command: command.clone(),
                source,
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

        if !stdout.is_empty() {
            debug!("{} stdout: {}", command, stdout);
        }
        if !stderr.is_empty() {
            debug!("{} stderr: {}", command, stderr);
        }

        if !output.status.success() {
            return Err(ProviderError::Command {
                command,
                code: output.status.code(),
                stderr,
            });
        }

        Ok(stdout)
    }

    /// Short label for logs and errors; arguments may carry deploy parameters
    fn describe(&self, args: &[String]) -> String {
        match args.first() {
            Some(subcommand) => format!("{} {}", self.binary, subcommand),
            None => self.binary.clone(),
        }
    }
}

/// Builds the `create` invocation for a sandbox spec
fn create_args(spec: &SandboxSpec) -> Vec<String> {
    let mut args = vec!["create".to_string(), "--name".to_string(), spec.name.clone()];

    for (key, value) in &spec.env {
        args.push("--env".to_string());
        args.push(format!("{}={}", key, value));
    }

    for mount in &spec.mounts {
        let mut volume = format!("{}:{}", mount.source.display(), mount.target);
        if mount.read_only {
            volume.push_str(":ro");
        }
        args.push("--volume".to_string());
        args.push(volume);
    }

    args.push(spec.image.clone());
    args
}

fn parse_exit_code(command: &str, output: &str) -> Result<i32, ProviderError> {
    // `wait` prints one line per container
    output
        .lines()
        .last()
        .and_then(|line| line.trim().parse::<i32>().ok())
        .ok_or_else(|| ProviderError::Parse {
            command: command.to_string(),
            output: output.to_string(),
        })
}

#[async_trait]
impl SandboxProvider for PodmanProvider {
    async fn pull_image(&self, image: &str) -> Result<(), ProviderError> {
        info!("Pulling image {}", image);
        self.run(&["pull".to_string(), "--quiet".to_string(), image.to_string()])
            .await?;
        Ok(())
    }

    async fn create(&self, spec: &SandboxSpec) -> Result<SandboxHandle, ProviderError> {
        let container_id = self.run(&create_args(spec)).await?;
        info!(
            "Container {} created with ID: {}",
            spec.name, container_id
        );
        Ok(SandboxHandle::new(spec.name.clone()))
    }

    async fn start(&self, handle: &SandboxHandle) -> Result<(), ProviderError> {
        self.run(&["start".to_string(), handle.name().to_string()])
            .await?;
        Ok(())
    }

    async fn wait(&self, handle: &SandboxHandle) -> Result<i32, ProviderError> {
        let args = ["wait".to_string(), handle.name().to_string()];
        let output = self.run(&args).await?;
        parse_exit_code(&self.describe(&args), &output)
    }

    async fn stop(&self, handle: &SandboxHandle) -> Result<(), ProviderError> {
        self.run(&[
            "stop".to_string(),
            "--time".to_string(),
            "0".to_string(),
            handle.name().to_string(),
        ])
        .await?;
        Ok(())
    }

    async fn remove(&self, handle: &SandboxHandle) -> Result<(), ProviderError> {
        self.run(&[
            "rm".to_string(),
            "--force".to_string(),
            "--volumes".to_string(),
            handle.name().to_string(),
        ])
        .await?;
        Ok(())
    }

    async fn logs(&self, handle: &SandboxHandle, follow: bool) -> Result<LogStream, ProviderError> {
        debug!("Reading output of {} (follow={})", handle.name(), follow);

        let options = LogsOptions::<String> {
            follow,
            stdout: true,
            stderr: true,
            tail: "all".to_string(),
            ..Default::default()
        };

        let frames = self
            .api
            .logs(handle.name(), Some(options))
            .filter_map(|output| {
                future::ready(match output {
                    Ok(LogOutput::StdOut { message }) | Ok(LogOutput::Console { message }) => {
                        Some(Ok(LogFrame::stdout(message.to_vec())))
                    }
                    Ok(LogOutput::StdErr { message }) => {
                        Some(Ok(LogFrame::stderr(message.to_vec())))
                    }
                    Ok(LogOutput::StdIn { .. }) => None,
                    Err(e) => Some(Err(ProviderError::from(e))),
                })
            });

        Ok(frames.boxed())
    }
}
