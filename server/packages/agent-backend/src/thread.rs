use std::sync::{Arc, RwLock};

use futures::StreamExt;
use tokio::sync::Mutex;

use crate::events::{ThreadEvent, ThreadItem, Turn, UserInput};
use crate::options::{ThreadOptions, TurnOptions};
use crate::{BackendError, Driver, EventStream};

/// A conversation on the agent backend.
///
/// Cloning is cheap and every clone refers to the same handle. The backend
/// assigns the id during the first turn of a fresh thread; turns on one handle
/// never overlap.
#[derive(Debug, Clone)]
pub struct Thread {
    inner: Arc<ThreadInner>,
}

#[derive(Debug)]
struct ThreadInner {
    id: RwLock<Option<String>>,
    options: ThreadOptions,
    driver: Driver,
    turn_lock: Arc<Mutex<()>>,
}

impl ThreadInner {
    fn set_id(&self, thread_id: &str) {
        let mut guard = self.id.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        if guard.as_deref() != Some(thread_id) {
            tracing::debug!(thread_id, "backend assigned thread id");
            *guard = Some(thread_id.to_string());
        }
    }
}

impl Thread {
    pub(crate) fn new(driver: Driver, id: Option<String>, options: ThreadOptions) -> Self {
        Self {
            inner: Arc::new(ThreadInner {
                id: RwLock::new(id),
                options,
                driver,
                turn_lock: Arc::new(Mutex::new(())),
            }),
        }
    }

    pub fn id(&self) -> Option<String> {
        self.inner
            .id
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn options(&self) -> &ThreadOptions {
        &self.inner.options
    }

    /// True when both values are clones of one handle.
    pub fn same_handle(&self, other: &Thread) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Starts a turn and yields its events as they arrive.
    ///
    /// The turn lock is held until the returned stream is dropped.
    pub async fn run_streamed(
        &self,
        input: Vec<UserInput>,
        turn: TurnOptions,
    ) -> Result<EventStream, BackendError> {
        let guard = self.inner.turn_lock.clone().lock_owned().await;
        let resume_thread_id = self.id();
        let events = match &self.inner.driver {
            Driver::Exec(backend) => {
                backend
                    .run(&self.inner.options, resume_thread_id.as_deref(), &input, &turn)
                    .await?
            }
            Driver::Mock(backend) => {
                backend.run(&self.inner.options, resume_thread_id.as_deref(), &input, &turn)?
            }
        };

        let inner = self.inner.clone();
        let events = events.map(move |event| {
            let _turn = &guard;
            if let Ok(ThreadEvent::ThreadStarted { thread_id }) = &event {
                inner.set_id(thread_id);
            }
            event
        });
        Ok(Box::pin(events))
    }

    /// Runs a turn to completion and folds its events into a [`Turn`].
    pub async fn run(&self, input: Vec<UserInput>, turn: TurnOptions) -> Result<Turn, BackendError> {
        let mut events = self.run_streamed(input, turn).await?;
        let mut result = Turn::default();

        while let Some(event) = events.next().await {
            match event? {
                ThreadEvent::ItemStarted { item } | ThreadEvent::ItemUpdated { item } => {
                    if let Some(text) = item.agent_message_text() {
                        result.text = Some(text.to_string());
                    }
                }
                ThreadEvent::ItemCompleted { item } => {
                    if let Some(text) = item.agent_message_text() {
                        result.text = Some(text.to_string());
                        result.final_response = Some(text.to_string());
                    }
                    if !matches!(item, ThreadItem::Other) {
                        result.items.push(item);
                    }
                }
                ThreadEvent::TurnCompleted { usage } => {
                    result.usage = usage;
                }
                ThreadEvent::TurnFailed { error } => {
                    return Err(BackendError::TurnFailed {
                        message: error.message,
                    });
                }
                ThreadEvent::Error { message } => {
                    tracing::warn!(message, "codex reported an error event");
                }
                ThreadEvent::ThreadStarted { .. } | ThreadEvent::TurnStarted | ThreadEvent::Unknown => {}
            }
        }

        Ok(result)
    }
}
