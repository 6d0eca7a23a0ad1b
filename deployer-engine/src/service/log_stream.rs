//! Log stream multiplexer
//!
//! Serves a job's output in one of two modes. Terminal jobs are answered
//! from the captured buffer on the record. Pending jobs are followed live
//! on the sandbox, with each chunk re-framed as an event keyed by its byte
//! offset in the combined output.

use deployer_core::domain::job::{Job, sandbox_name};
use deployer_core::dto::log::LogEvent;
use futures::stream::BoxStream;
use futures::{StreamExt, future};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::error::JobError;
use crate::repository::JobStore;
use crate::sandbox::{LogStream, ProviderError, SandboxHandle, SandboxProvider};

/// Live output of a pending job
///
/// Dropping the stream releases the follow-handle; the job is unaffected.
pub type LogEventStream = BoxStream<'static, Result<LogEvent, ProviderError>>;

pub struct LogMultiplexer {
    store: Arc<dyn JobStore>,
    provider: Arc<dyn SandboxProvider>,
}

impl LogMultiplexer {
    pub fn new(store: Arc<dyn JobStore>, provider: Arc<dyn SandboxProvider>) -> Self {
        Self { store, provider }
    }

    /// Captured output of a job
    ///
    /// Pending jobs have not been captured yet and return an empty buffer.
    pub async fn archived(&self, id: Uuid) -> Result<Vec<u8>, JobError> {
        let job = self.load(id).await?;
        Ok(job.logs)
    }

    /// Follows the output of a pending job
    pub async fn live(&self, id: Uuid) -> Result<LogEventStream, JobError> {
        let job = self.load(id).await?;

        if job.is_terminal() {
            return Err(JobError::AlreadyTerminal {
                id,
                job_id: job.job_id,
                status: job.status,
            });
        }

        let handle = SandboxHandle::new(sandbox_name(job.job_id));
        debug!("Following output of sandbox {}", handle.name());

        let frames = self.provider.logs(&handle, true).await?;
        Ok(reframe(frames))
    }

    async fn load(&self, id: Uuid) -> Result<Job, JobError> {
        self.store.get(id).await?.ok_or(JobError::NotFound(id))
    }
}

/// Turns tagged frames into offset-keyed events in arrival order
pub fn reframe(frames: LogStream) -> LogEventStream {
    frames
        .filter(|frame| future::ready(!matches!(frame, Ok(f) if f.data.is_empty())))
        .scan(0u64, |offset, frame| {
            let event = frame.map(|frame| {
                let event = LogEvent {
                    id: *offset,
                    data: frame.data,
                };
                *offset = event.end();
                event
            });
            future::ready(Some(event))
        })
        .boxed()
}
