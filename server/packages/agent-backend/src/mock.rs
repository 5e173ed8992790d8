use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use futures::{stream, StreamExt};

use crate::events::{ThreadError, ThreadEvent, ThreadItem, Usage, UserInput};
use crate::options::{ThreadOptions, TurnOptions};
use crate::{BackendError, EventStream};

/// Behaviour of the scripted backend.
#[derive(Debug, Clone, Default)]
pub struct MockConfig {
    /// Fixed reply text. When unset the mock echoes the prompt.
    pub reply: Option<String>,
    /// Fail every turn with `turn.failed` carrying this message.
    pub fail_turns_with: Option<String>,
    pub reject_resume: bool,
    /// Accept any resume, but fail the turn the way `codex exec resume` does
    /// for a session it no longer has, unless this mock issued the id.
    pub forget_unknown_threads: bool,
    /// Non-fatal `error` event emitted before the reply.
    pub notice: Option<String>,
    /// Pause between streamed events.
    pub event_delay: Option<Duration>,
}

/// Deterministic stand-in for the codex CLI.
#[derive(Debug, Default)]
pub struct MockBackend {
    config: MockConfig,
    thread_counter: AtomicU64,
    started: AtomicU64,
    resumed: AtomicU64,
    turns: AtomicU64,
    issued: Mutex<HashSet<String>>,
    last_input: Mutex<Option<Vec<UserInput>>>,
    last_options: Mutex<Option<(ThreadOptions, TurnOptions)>>,
}

impl MockBackend {
    pub fn new(config: MockConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn threads_started(&self) -> u64 {
        self.started.load(Ordering::SeqCst)
    }

    pub fn threads_resumed(&self) -> u64 {
        self.resumed.load(Ordering::SeqCst)
    }

    pub fn turns_run(&self) -> u64 {
        self.turns.load(Ordering::SeqCst)
    }

    pub fn last_input(&self) -> Option<Vec<UserInput>> {
        self.last_input
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn last_options(&self) -> Option<(ThreadOptions, TurnOptions)> {
        self.last_options
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Joined text of the last turn's input.
    pub fn last_prompt(&self) -> Option<String> {
        self.last_input().map(|input| {
            input
                .iter()
                .filter_map(|entry| match entry {
                    UserInput::Text { text } => Some(text.as_str()),
                    UserInput::LocalImage { .. } => None,
                })
                .collect::<Vec<_>>()
                .join("\n\n")
        })
    }

    pub(crate) fn record_start(&self) {
        self.started.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn check_resumable(&self, thread_id: &str) -> Result<(), BackendError> {
        if self.config.reject_resume {
            return Err(BackendError::InvalidThreadId {
                thread_id: thread_id.to_string(),
            });
        }
        self.resumed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    pub(crate) fn run(
        &self,
        options: &ThreadOptions,
        resume_thread_id: Option<&str>,
        input: &[UserInput],
        turn: &TurnOptions,
    ) -> Result<EventStream, BackendError> {
        let turn_number = self.turns.fetch_add(1, Ordering::SeqCst) + 1;
        *self
            .last_input
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(input.to_vec());
        *self
            .last_options
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some((options.clone(), turn.clone()));

        let prompt = input
            .iter()
            .filter_map(|entry| match entry {
                UserInput::Text { text } => Some(text.as_str()),
                UserInput::LocalImage { .. } => None,
            })
            .collect::<Vec<_>>()
            .join("\n\n");

        if let Some(thread_id) = resume_thread_id {
            let known = self
                .issued
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .contains(thread_id);
            if self.config.forget_unknown_threads && !known {
                let exited: Result<ThreadEvent, BackendError> = Err(BackendError::ProcessExited {
                    code: Some(1),
                    stderr: "No saved session found".to_string(),
                });
                return Ok(Box::pin(stream::iter(vec![exited])));
            }
        }

        let mut events = Vec::new();
        if resume_thread_id.is_none() {
            let n = self.thread_counter.fetch_add(1, Ordering::SeqCst) + 1;
            let thread_id = format!("mock-thread-{n}");
            self.issued
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .insert(thread_id.clone());
            events.push(ThreadEvent::ThreadStarted { thread_id });
        }
        events.push(ThreadEvent::TurnStarted);
        if let Some(message) = &self.config.notice {
            events.push(ThreadEvent::Error {
                message: message.clone(),
            });
        }

        if let Some(message) = &self.config.fail_turns_with {
            events.push(ThreadEvent::TurnFailed {
                error: ThreadError {
                    message: message.clone(),
                },
            });
        } else {
            let reply = self
                .config
                .reply
                .clone()
                .unwrap_or_else(|| format!("mock reply: {prompt}"));
            let item_id = format!("mock-msg-{turn_number}");
            let mut partial = String::new();
            for (index, word) in reply.split(' ').enumerate() {
                if index > 0 {
                    partial.push(' ');
                }
                partial.push_str(word);
                events.push(ThreadEvent::ItemUpdated {
                    item: ThreadItem::AgentMessage {
                        id: item_id.clone(),
                        text: partial.clone(),
                    },
                });
            }
            events.push(ThreadEvent::ItemCompleted {
                item: ThreadItem::AgentMessage {
                    id: item_id,
                    text: reply.clone(),
                },
            });
            events.push(ThreadEvent::TurnCompleted {
                usage: Some(Usage {
                    input_tokens: prompt.split_whitespace().count() as u64,
                    cached_input_tokens: 0,
                    output_tokens: reply.split_whitespace().count() as u64,
                }),
            });
        }

        let delay = self.config.event_delay;
        let events = stream::iter(events).then(move |event| async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            Ok(event)
        });
        Ok(Box::pin(events))
    }
}
