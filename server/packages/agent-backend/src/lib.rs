//! Client for the Codex agent CLI: threads, turns and their event streams.

use std::pin::Pin;
use std::sync::Arc;

use futures::Stream;
use thiserror::Error;

mod events;
mod exec;
mod launch;
mod mock;
mod options;
mod thread;

pub use events::{ThreadError, ThreadEvent, ThreadItem, Turn, Usage, UserInput};
pub use exec::ExecBackend;
pub use launch::LaunchSpec;
pub use mock::{MockBackend, MockConfig};
pub use options::{ApprovalPolicy, ReasoningEffort, SandboxMode, ThreadOptions, TurnOptions};
pub use thread::Thread;

pub type EventStream = Pin<Box<dyn Stream<Item = Result<ThreadEvent, BackendError>> + Send>>;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("failed to spawn codex process `{command}`: {error}")]
    Spawn {
        command: String,
        #[source]
        error: std::io::Error,
    },
    #[error("failed to capture codex stdin")]
    MissingStdin,
    #[error("failed to capture codex stdout")]
    MissingStdout,
    #[error("failed to capture codex stderr")]
    MissingStderr,
    #[error("failed to write prompt to codex stdin: {0}")]
    Write(std::io::Error),
    #[error("failed to serialize output schema: {0}")]
    Serialize(serde_json::Error),
    #[error("io error: {0}")]
    Io(std::io::Error),
    #[error("failed to parse codex event `{raw}`: {error}")]
    Parse {
        #[source]
        error: serde_json::Error,
        raw: String,
    },
    #[error("codex exited with code {code:?}: {stderr}")]
    ProcessExited { code: Option<i32>, stderr: String },
    #[error("{message}")]
    TurnFailed { message: String },
    #[error("thread id '{thread_id}' cannot be resumed")]
    InvalidThreadId { thread_id: String },
}

impl BackendError {
    /// The agent ran the turn and reported that it failed, as opposed to the
    /// process or transport failing around it.
    pub fn is_turn_failure(&self) -> bool {
        matches!(self, Self::TurnFailed { .. })
    }
}

#[derive(Debug, Clone)]
pub(crate) enum Driver {
    Exec(Arc<ExecBackend>),
    Mock(Arc<MockBackend>),
}

/// Entry point for creating and resuming threads.
#[derive(Debug, Clone)]
pub struct Agent {
    driver: Driver,
}

impl Agent {
    pub fn exec(launch: LaunchSpec) -> Self {
        Self {
            driver: Driver::Exec(Arc::new(ExecBackend::new(launch))),
        }
    }

    pub fn mock(config: MockConfig) -> Self {
        Self {
            driver: Driver::Mock(Arc::new(MockBackend::new(config))),
        }
    }

    /// The scripted backend, when this agent is a mock.
    pub fn mock_backend(&self) -> Option<&Arc<MockBackend>> {
        match &self.driver {
            Driver::Mock(backend) => Some(backend),
            Driver::Exec(_) => None,
        }
    }

    /// New thread; its id is assigned during the first turn.
    pub fn start_thread(&self, options: ThreadOptions) -> Thread {
        if let Driver::Mock(backend) = &self.driver {
            backend.record_start();
        }
        Thread::new(self.driver.clone(), None, options)
    }

    pub fn resume_thread(&self, thread_id: &str, options: ThreadOptions) -> Result<Thread, BackendError> {
        match &self.driver {
            Driver::Exec(backend) => backend.check_resumable(thread_id)?,
            Driver::Mock(backend) => backend.check_resumable(thread_id)?,
        }
        Ok(Thread::new(
            self.driver.clone(),
            Some(thread_id.trim().to_string()),
            options,
        ))
    }
}
