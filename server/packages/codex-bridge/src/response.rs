use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::http::header;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use codex_bridge_backend::{Thread, ThreadEvent, ThreadItem, Turn, TurnOptions, Usage, UserInput};
use codex_bridge_error::BridgeError;
use futures::StreamExt;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::attachments::CleanupSet;
use crate::thread_registry::ThreadRegistry;

pub fn completion_id(thread_id: Option<String>) -> String {
    let id = thread_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    format!("chatcmpl-{id}")
}

fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UsageSummary {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl From<Usage> for UsageSummary {
    fn from(usage: Usage) -> Self {
        Self {
            prompt_tokens: usage.input_tokens,
            completion_tokens: usage.output_tokens,
            total_tokens: usage.input_tokens.saturating_add(usage.output_tokens),
        }
    }
}

type ContentStrategy = fn(&Turn) -> Option<&str>;

/// Tried in order; the first non-empty text wins.
const CONTENT_STRATEGIES: &[ContentStrategy] = &[final_response, latest_text, latest_agent_message];

fn final_response(turn: &Turn) -> Option<&str> {
    turn.final_response.as_deref()
}

fn latest_text(turn: &Turn) -> Option<&str> {
    turn.text.as_deref()
}

fn latest_agent_message(turn: &Turn) -> Option<&str> {
    turn.items.iter().rev().find_map(|item| match item {
        ThreadItem::AgentMessage { text, .. } if !text.is_empty() => Some(text.as_str()),
        _ => None,
    })
}

pub fn extract_content(turn: &Turn) -> String {
    CONTENT_STRATEGIES
        .iter()
        .find_map(|strategy| strategy(turn).filter(|text| !text.is_empty()))
        .unwrap_or_default()
        .to_string()
}

#[derive(Debug, Serialize)]
pub struct ChatCompletion {
    pub id: String,
    pub object: &'static str,
    pub created: i64,
    pub model: String,
    pub choices: Vec<CompletionChoice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<UsageSummary>,
}

#[derive(Debug, Serialize)]
pub struct CompletionChoice {
    pub index: u32,
    pub message: AssistantMessage,
    pub finish_reason: &'static str,
}

#[derive(Debug, Serialize)]
pub struct AssistantMessage {
    pub role: &'static str,
    pub content: String,
}

pub fn completion(thread_id: Option<String>, model: &str, turn: &Turn) -> ChatCompletion {
    ChatCompletion {
        id: completion_id(thread_id),
        object: "chat.completion",
        created: unix_now(),
        model: model.to_string(),
        choices: vec![CompletionChoice {
            index: 0,
            message: AssistantMessage {
                role: "assistant",
                content: extract_content(turn),
            },
            finish_reason: "stop",
        }],
        usage: turn.usage.map(UsageSummary::from),
    }
}

#[derive(Debug, Default, Serialize)]
struct Delta {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
}

#[derive(Debug, Serialize)]
struct ChunkChoice {
    index: u32,
    delta: Delta,
    finish_reason: Option<&'static str>,
}

#[derive(Debug, Serialize)]
struct ChatCompletionChunk<'a> {
    id: &'a str,
    object: &'static str,
    created: i64,
    model: &'a str,
    choices: [ChunkChoice; 1],
    #[serde(skip_serializing_if = "Option::is_none")]
    usage: Option<UsageSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<Value>,
}

struct ChunkFrame {
    id: String,
    created: i64,
    model: String,
}

impl ChunkFrame {
    fn chunk(&self, delta: Delta, finish_reason: Option<&'static str>) -> ChatCompletionChunk<'_> {
        ChatCompletionChunk {
            id: &self.id,
            object: "chat.completion.chunk",
            created: self.created,
            model: &self.model,
            choices: [ChunkChoice {
                index: 0,
                delta,
                finish_reason,
            }],
            usage: None,
            error: None,
        }
    }
}

/// Converts accumulated agent-message text into deltas.
///
/// The backend resends the whole message text on every update; only the part
/// not yet sent is emitted. Each new message after the first is separated
/// from the previous one by a blank line, so a streamed reply carries every
/// agent message of the turn while [`extract_content`] keeps only the last.
#[derive(Debug, Default)]
pub struct DeltaTracker {
    sent: HashMap<String, usize>,
    emitted_any: bool,
}

impl DeltaTracker {
    pub fn push(&mut self, item_id: &str, text: &str) -> Option<String> {
        let is_new = !self.sent.contains_key(item_id);
        let sent = self.sent.entry(item_id.to_string()).or_insert(0);
        if text.len() <= *sent || !text.is_char_boundary(*sent) {
            return None;
        }
        let suffix = &text[*sent..];
        *sent = text.len();

        let delta = if is_new && self.emitted_any {
            format!("\n\n{suffix}")
        } else {
            suffix.to_string()
        };
        self.emitted_any = true;
        Some(delta)
    }
}

/// A turn to be run and relayed to the client as SSE.
pub struct StreamRequest {
    pub thread: Thread,
    pub input: Vec<UserInput>,
    pub turn: TurnOptions,
    pub model: String,
    /// Registry and session id to record the thread under once the turn
    /// completes. `None` for ephemeral sessions.
    pub persist: Option<(Arc<ThreadRegistry>, String)>,
    /// The thread was resumed from a persisted binding and may be replaced
    /// if the backend refuses it before any output.
    pub can_restart: bool,
    pub cleanups: CleanupSet,
}

type SseStream = ReceiverStream<Result<Event, Infallible>>;

/// Runs the turn in the background and streams it as chat-completion chunks.
///
/// Every agent message of the turn is relayed (see [`DeltaTracker`]).
pub fn stream_completion(request: StreamRequest) -> Response {
    let (tx, rx) = mpsc::channel(64);
    tokio::spawn(pump(request, tx));
    let stream: SseStream = ReceiverStream::new(rx);
    let sse = Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)));
    ([(header::CACHE_CONTROL, "no-cache")], sse).into_response()
}

enum StreamEnd {
    Completed(Option<UsageSummary>),
    Disconnected,
}

struct RelayError {
    message: String,
    /// Nothing reached the client and the backend never reported a failed
    /// turn, so the turn may be run again on another thread.
    restartable: bool,
}

async fn pump(request: StreamRequest, tx: mpsc::Sender<Result<Event, Infallible>>) {
    let StreamRequest {
        mut thread,
        input,
        turn,
        model,
        persist,
        can_restart,
        cleanups,
    } = request;
    let mut frame = ChunkFrame {
        id: completion_id(thread.id()),
        created: unix_now(),
        model,
    };

    let mut result = relay_turn(&thread, input.clone(), turn.clone(), &frame, &tx).await;
    if let Err(err) = &result {
        if let Some((registry, session_id)) = persist.as_ref().filter(|_| can_restart && err.restartable) {
            tracing::warn!(
                session_id = %session_id,
                error = %err.message,
                "resumed thread failed, retrying on a new thread"
            );
            thread = registry.restart(session_id, &thread);
            frame.id = completion_id(thread.id());
            result = relay_turn(&thread, input, turn, &frame, &tx).await;
        }
    }

    match result {
        Ok(StreamEnd::Completed(usage)) => {
            if let Some((registry, session_id)) = &persist {
                registry.persist(session_id, &thread).await;
            }
            let mut last = frame.chunk(Delta::default(), Some("stop"));
            last.usage = usage;
            if send_chunk(&tx, &last).await {
                send_done(&tx).await;
            }
        }
        Ok(StreamEnd::Disconnected) => {
            tracing::debug!(id = %frame.id, "stream client went away");
        }
        Err(RelayError { message, .. }) => {
            tracing::error!(id = %frame.id, error = %message, "codex stream failed");
            let mut failed = frame.chunk(Delta::default(), Some("error"));
            failed.error = Some(BridgeError::CodexStream { message }.to_error_value());
            if send_chunk(&tx, &failed).await {
                send_done(&tx).await;
            }
        }
    }

    cleanups.run_all();
}

async fn relay_turn(
    thread: &Thread,
    input: Vec<UserInput>,
    turn: TurnOptions,
    frame: &ChunkFrame,
    tx: &mpsc::Sender<Result<Event, Infallible>>,
) -> Result<StreamEnd, RelayError> {
    let mut events = thread
        .run_streamed(input, turn)
        .await
        .map_err(|err| RelayError {
            message: err.to_string(),
            restartable: !err.is_turn_failure(),
        })?;

    let mut tracker = DeltaTracker::default();
    let mut role_sent = false;
    let mut usage = None;

    while let Some(event) = events.next().await {
        let event = event.map_err(|err| RelayError {
            message: err.to_string(),
            restartable: !role_sent && !err.is_turn_failure(),
        })?;
        match &event {
            ThreadEvent::TurnCompleted { usage: reported } => {
                usage = reported.map(UsageSummary::from);
            }
            ThreadEvent::TurnFailed { error } => {
                return Err(RelayError {
                    message: error.message.clone(),
                    restartable: false,
                })
            }
            ThreadEvent::Error { message } => {
                tracing::warn!(id = %frame.id, message, "codex reported an error event");
            }
            _ => {
                let Some(content) = event
                    .agent_message()
                    .and_then(|(item_id, text)| tracker.push(item_id, text))
                else {
                    continue;
                };
                if !role_sent {
                    let role = Delta {
                        role: Some("assistant"),
                        content: None,
                    };
                    if !send_chunk(tx, &frame.chunk(role, None)).await {
                        return Ok(StreamEnd::Disconnected);
                    }
                    role_sent = true;
                }
                let delta = Delta {
                    role: None,
                    content: Some(content),
                };
                if !send_chunk(tx, &frame.chunk(delta, None)).await {
                    return Ok(StreamEnd::Disconnected);
                }
            }
        }
    }

    Ok(StreamEnd::Completed(usage))
}

async fn send_chunk(tx: &mpsc::Sender<Result<Event, Infallible>>, chunk: &ChatCompletionChunk<'_>) -> bool {
    let data = match serde_json::to_string(chunk) {
        Ok(data) => data,
        Err(err) => {
            tracing::error!(error = %err, "failed to serialize completion chunk");
            return false;
        }
    };
    tx.send(Ok(Event::default().data(data))).await.is_ok()
}

async fn send_done(tx: &mpsc::Sender<Result<Event, Infallible>>) -> bool {
    tx.send(Ok(Event::default().data("[DONE]"))).await.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(id: &str, text: &str) -> ThreadItem {
        ThreadItem::AgentMessage {
            id: id.to_string(),
            text: text.to_string(),
        }
    }

    #[test]
    fn tracker_emits_only_new_suffix() {
        let mut tracker = DeltaTracker::default();
        assert_eq!(tracker.push("a", "Hi").as_deref(), Some("Hi"));
        assert_eq!(tracker.push("a", "Hi there").as_deref(), Some(" there"));
        assert_eq!(tracker.push("a", "Hi there").as_deref(), None);
        assert_eq!(tracker.push("a", "Hi there!").as_deref(), Some("!"));
        assert_eq!(tracker.push("b", "Next").as_deref(), Some("\n\nNext"));
        assert_eq!(tracker.push("b", "Next one").as_deref(), Some(" one"));
    }

    #[test]
    fn tracker_skips_split_characters() {
        let mut tracker = DeltaTracker::default();
        assert_eq!(tracker.push("a", "é").as_deref(), Some("é"));
        assert_eq!(tracker.push("a", "éa").as_deref(), Some("a"));
        // Shorter rewrites are ignored.
        assert_eq!(tracker.push("a", "x").as_deref(), None);
    }

    #[test]
    fn content_strategies_in_order() {
        let mut turn = Turn {
            items: vec![message("1", "older"), message("2", "newest"), message("3", "")],
            ..Turn::default()
        };
        assert_eq!(extract_content(&turn), "newest");
        turn.text = Some("streamed".to_string());
        assert_eq!(extract_content(&turn), "streamed");
        turn.final_response = Some("final".to_string());
        assert_eq!(extract_content(&turn), "final");
        assert_eq!(extract_content(&Turn::default()), "");
    }

    #[test]
    fn completion_shape() {
        let turn = Turn {
            final_response: Some("4".to_string()),
            usage: Some(Usage {
                input_tokens: 10,
                cached_input_tokens: 2,
                output_tokens: 1,
            }),
            ..Turn::default()
        };
        let body = serde_json::to_value(completion(Some("t-1".to_string()), "gpt-5", &turn)).unwrap();
        assert_eq!(body["id"], "chatcmpl-t-1");
        assert_eq!(body["object"], "chat.completion");
        assert_eq!(body["choices"][0]["message"]["content"], "4");
        assert_eq!(body["choices"][0]["finish_reason"], "stop");
        assert_eq!(body["usage"]["total_tokens"], 11);

        let body = serde_json::to_value(completion(None, "gpt-5", &Turn::default())).unwrap();
        assert!(body["id"].as_str().unwrap().starts_with("chatcmpl-"));
        assert!(body.get("usage").is_none());
    }

    #[test]
    fn empty_delta_serializes_as_object() {
        let frame = ChunkFrame {
            id: "chatcmpl-x".to_string(),
            created: 0,
            model: "gpt-5".to_string(),
        };
        let chunk = serde_json::to_value(frame.chunk(Delta::default(), Some("stop"))).unwrap();
        assert_eq!(chunk["choices"][0]["delta"], serde_json::json!({}));
        assert_eq!(chunk["object"], "chat.completion.chunk");
    }
}
