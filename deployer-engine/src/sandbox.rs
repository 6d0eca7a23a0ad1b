//! Sandbox provider interface
//!
//! A sandbox is the ephemeral container one deploy script runs in. Providers
//! address sandboxes by name, so an operation on a job can be issued from
//! anywhere that knows the job id (cancellation, live log reads).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, warn};

/// Errors raised by a sandbox provider
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The provider command could not be launched at all
    #[error("Failed to execute '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The provider command ran and reported failure
    #[error("'{command}' failed (exit_code={code:?}): {stderr}")]
    Command {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    /// The provider command printed something unexpected
    #[error("Unexpected output from '{command}': {output}")]
    Parse { command: String, output: String },

    /// The provider's API refused or failed a request
    #[error("Provider API request failed: {0}")]
    Api(#[from] bollard::errors::Error),
}

/// A host file bound into the sandbox
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    pub source: PathBuf,
    pub target: String,
    pub read_only: bool,
}

/// Everything a provider needs to create a sandbox
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxSpec {
    pub name: String,
    pub image: String,
    /// Environment handed to the deploy script, in a stable order
    pub env: Vec<(String, String)>,
    pub mounts: Vec<Mount>,
}

/// Reference to a created sandbox
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SandboxHandle {
    name: String,
}

impl SandboxHandle {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Output channel a frame was written to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Stdout,
    Stderr,
}

/// A chunk of sandbox output tagged with the channel it came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFrame {
    pub channel: Channel,
    pub data: Vec<u8>,
}

impl LogFrame {
    pub fn stdout(data: impl Into<Vec<u8>>) -> Self {
        Self {
            channel: Channel::Stdout,
            data: data.into(),
        }
    }

    pub fn stderr(data: impl Into<Vec<u8>>) -> Self {
        Self {
            channel: Channel::Stderr,
            data: data.into(),
        }
    }
}

/// Sandbox output as a stream of tagged frames, in emission order
pub type LogStream = BoxStream<'static, Result<LogFrame, ProviderError>>;

/// Capability interface over an isolated execution environment
#[async_trait]
pub trait SandboxProvider: Send + Sync {
    /// Fetches an image so that `create` does not have to
    async fn pull_image(&self, image: &str) -> Result<(), ProviderError>;

    /// Creates (but does not start) a sandbox
    ///
    /// Creating a second sandbox with a name already in use must fail.
    async fn create(&self, spec: &SandboxSpec) -> Result<SandboxHandle, ProviderError>;

    async fn start(&self, handle: &SandboxHandle) -> Result<(), ProviderError>;

    /// Blocks until the sandbox exits and returns its exit code
    async fn wait(&self, handle: &SandboxHandle) -> Result<i32, ProviderError>;

    /// Stops the sandbox immediately, without a grace period
    async fn stop(&self, handle: &SandboxHandle) -> Result<(), ProviderError>;

    /// Removes the sandbox together with its volumes
    async fn remove(&self, handle: &SandboxHandle) -> Result<(), ProviderError>;

    /// Opens the sandbox's combined stdout/stderr
    ///
    /// With `follow` the stream stays open until the sandbox exits or the
    /// stream is dropped.
    async fn logs(&self, handle: &SandboxHandle, follow: bool) -> Result<LogStream, ProviderError>;
}

/// Owns a created sandbox and tears it down exactly once
///
/// Call [`SandboxGuard::release`] on every normal exit path. If the guard is
/// dropped without being released (the owning future was cancelled), the
/// teardown is spawned onto the current runtime instead.
pub struct SandboxGuard {
    provider: Arc<dyn SandboxProvider>,
    handle: SandboxHandle,
    released: bool,
}

impl SandboxGuard {
    pub fn new(provider: Arc<dyn SandboxProvider>, handle: SandboxHandle) -> Self {
        Self {
            provider,
            handle,
            released: false,
        }
    }

    pub fn handle(&self) -> &SandboxHandle {
        &self.handle
    }

    /// Stops and removes the sandbox
    ///
    /// Returns the time teardown began, which is the job's finish time.
    pub async fn release(mut self) -> DateTime<Utc> {
        let finished_at = Utc::now();
        self.released = true;
        teardown(self.provider.as_ref(), &self.handle).await;
        finished_at
    }
}

impl Drop for SandboxGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        warn!(
            "Sandbox {} dropped without release, tearing down in background",
            self.handle.name()
        );

        let provider = Arc::clone(&self.provider);
        let handle = self.handle.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    teardown(provider.as_ref(), &handle).await;
                });
            }
            Err(_) => error!(
                "No runtime available to tear down sandbox {}",
                self.handle.name()
            ),
        }
    }
}

async fn teardown(provider: &dyn SandboxProvider, handle: &SandboxHandle) {
    debug!("Tearing down sandbox {}", handle.name());

    // Already-exited sandboxes report an error here; removal still proceeds
    if let Err(e) = provider.stop(handle).await {
        debug!("Stopping sandbox {}: {}", handle.name(), e);
    }

    match provider.remove(handle).await {
        Ok(()) => debug!("Sandbox {} removed", handle.name()),
        Err(e) => warn!("Failed to remove sandbox {}: {}", handle.name(), e),
    }
}
