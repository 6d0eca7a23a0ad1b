//! Service layer
//!
//! Services contain the engine's business logic: running a job in its
//! sandbox, announcing lifecycle phases, and serving job output.
//!
//! Collaborator seams are trait-based to enable testing and dependency injection.

mod execution;
mod log_stream;
mod notifier;

// Re-export traits
pub use execution::ExecutionService;
pub use notifier::{LifecycleObserver, NotificationSink, StatusSink};

// Re-export implementations
pub use execution::SandboxExecutionService;
pub use log_stream::LogMultiplexer;
pub use notifier::{LogNotificationSink, LogStatusSink, Notifier};

// Re-export supporting types
pub use execution::{ExecuteError, ExecutorConfig, Outcome, SSH_KEY_TARGET};
pub use log_stream::{LogEventStream, reframe};
pub use notifier::SinkError;
