//! Job listing DTOs

use serde::{Deserialize, Serialize};

/// Offset/limit window over the job list, newest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    #[serde(default)]
    pub offset: usize,
    #[serde(default = "Page::default_limit")]
    pub limit: usize,
}

impl Page {
    pub const MAX_LIMIT: usize = 100;

    fn default_limit() -> usize {
        20
    }

    /// Caps the limit so a single request cannot pull the whole table
    pub fn clamped(self) -> Self {
        Self {
            offset: self.offset,
            limit: self.limit.clamp(1, Self::MAX_LIMIT),
        }
    }
}

impl Default for Page {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: Self::default_limit(),
        }
    }
}
