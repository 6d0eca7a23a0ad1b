//! Live log DTOs

use serde::{Deserialize, Serialize};

/// One chunk of a live job log
///
/// `id` is the byte offset at which `data` starts in the job's combined
/// output, so a reader can resume or de-duplicate by offset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEvent {
    pub id: u64,
    pub data: Vec<u8>,
}

impl LogEvent {
    /// Offset just past the end of this chunk
    pub fn end(&self) -> u64 {
        self.id + self.data.len() as u64
    }
}
