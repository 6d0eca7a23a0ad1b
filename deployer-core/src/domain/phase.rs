//! Notification phases
//!
//! A phase is what collaborators outside the engine are told about a job.
//! It follows the job status but uses the vocabulary of status APIs
//! (`failure` rather than `Failed`).

use serde::{Deserialize, Serialize};

use crate::domain::job::JobStatus;

/// Lifecycle stage announced to status and notification sinks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Pending,
    Success,
    Failure,
}

/// Message color used by chat notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Color {
    /// Warning hue
    Yellow,
    /// Success hue
    Green,
    /// Danger hue
    Red,
}

impl Phase {
    /// Canonical state string reported to the status sink
    pub fn as_state(self) -> &'static str {
        match self {
            Phase::Pending => "pending",
            Phase::Success => "success",
            Phase::Failure => "failure",
        }
    }

    /// Title-cased phase name for human-readable messages
    pub fn title(self) -> &'static str {
        match self {
            Phase::Pending => "Pending",
            Phase::Success => "Success",
            Phase::Failure => "Failure",
        }
    }

    pub fn color(self) -> Color {
        match self {
            Phase::Pending => Color::Yellow,
            Phase::Success => Color::Green,
            Phase::Failure => Color::Red,
        }
    }
}

impl From<JobStatus> for Phase {
    fn from(status: JobStatus) -> Self {
        match status {
            JobStatus::Pending => Phase::Pending,
            JobStatus::Success => Phase::Success,
            JobStatus::Failed => Phase::Failure,
        }
    }
}

impl Color {
    pub fn as_str(self) -> &'static str {
        match self {
            Color::Yellow => "yellow",
            Color::Green => "green",
            Color::Red => "red",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_state())
    }
}

impl std::fmt::Display for Color {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_follows_status() {
        assert_eq!(Phase::from(JobStatus::Pending), Phase::Pending);
        assert_eq!(Phase::from(JobStatus::Success), Phase::Success);
        assert_eq!(Phase::from(JobStatus::Failed), Phase::Failure);
    }

    #[test]
    fn test_phase_colors() {
        assert_eq!(Phase::Pending.color(), Color::Yellow);
        assert_eq!(Phase::Success.color(), Color::Green);
        assert_eq!(Phase::Failure.color(), Color::Red);
    }

    #[test]
    fn test_phase_strings() {
        assert_eq!(Phase::Failure.as_state(), "failure");
        assert_eq!(Phase::Failure.title(), "Failure");
        assert_eq!(
            serde_json::to_value(Phase::Success).unwrap(),
            serde_json::json!("success")
        );
    }
}
