//! Server configuration
//!
//! Everything is read from the environment once at startup. Missing or
//! invalid values abort the process before anything is served.

use deployer_engine::podman::DEFAULT_SOCKET;
use deployer_engine::service::ExecutorConfig;
use std::net::SocketAddr;
use std::path::PathBuf;

pub const DEFAULT_IMAGE: &str = "xotelia/deployer-ansible";
pub const DEFAULT_BIND: &str = "0.0.0.0:4567";

/// Server configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Public base URL of this server, used in links sent to status sinks
    pub host: String,

    /// Private key mounted into every sandbox
    pub ssh_key_path: PathBuf,

    pub database_url: String,

    /// Image every deploy runs in
    pub image: String,

    /// Pull the image before each deploy
    pub pull_image: bool,

    pub bind: SocketAddr,

    /// podman API socket that sandbox output is read from
    pub podman_socket: String,
}

impl Config {
    /// Creates configuration from environment variables
    ///
    /// Expected environment variables:
    /// - DEPLOYER_HOST (required)
    /// - DEPLOYER_SSHKEY_PATH (required)
    /// - DATABASE_URL (required)
    /// - DEPLOYER_IMAGE (optional, default: xotelia/deployer-ansible)
    /// - DEPLOYER_PULL_IMAGE (optional, default: true)
    /// - DEPLOYER_BIND (optional, default: 0.0.0.0:4567)
    /// - DEPLOYER_PODMAN_SOCKET (optional, default: unix:///run/podman/podman.sock)
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`Config::from_env`] with a custom variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let required = |key: &str| {
            lookup(key)
                .filter(|value| !value.is_empty())
                .ok_or_else(|| anyhow::anyhow!("{} environment variable not set", key))
        };

        let host = required("DEPLOYER_HOST")?;
        let ssh_key_path = PathBuf::from(required("DEPLOYER_SSHKEY_PATH")?);
        let database_url = required("DATABASE_URL")?;

        let image = lookup("DEPLOYER_IMAGE")
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| DEFAULT_IMAGE.to_string());

        let pull_image = match lookup("DEPLOYER_PULL_IMAGE") {
            None => true,
            Some(value) => parse_bool(&value).ok_or_else(|| {
                anyhow::anyhow!("DEPLOYER_PULL_IMAGE must be true or false, got '{}'", value)
            })?,
        };

        let bind = lookup("DEPLOYER_BIND")
            .unwrap_or_else(|| DEFAULT_BIND.to_string())
            .parse::<SocketAddr>()
            .map_err(|e| anyhow::anyhow!("DEPLOYER_BIND is not a socket address: {}", e))?;

        let podman_socket = lookup("DEPLOYER_PODMAN_SOCKET")
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| DEFAULT_SOCKET.to_string());

        Ok(Self {
            host,
            ssh_key_path,
            database_url,
            image,
            pull_image,
            bind,
            podman_socket,
        })
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.host.starts_with("http://") && !self.host.starts_with("https://") {
            anyhow::bail!("host must start with http:// or https://");
        }

        if !self.ssh_key_path.is_file() {
            anyhow::bail!(
                "SSH key {} does not exist or is not a file",
                self.ssh_key_path.display()
            );
        }

        if self.image.is_empty() {
            anyhow::bail!("image cannot be empty");
        }

        Ok(())
    }

    pub fn executor(&self) -> ExecutorConfig {
        ExecutorConfig {
            image: self.image.clone(),
            ssh_key_path: self.ssh_key_path.clone(),
            pull_image: self.pull_image,
        }
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
