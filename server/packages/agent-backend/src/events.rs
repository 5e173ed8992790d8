use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// One line of `codex exec --experimental-json` output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ThreadEvent {
    #[serde(rename = "thread.started")]
    ThreadStarted { thread_id: String },
    #[serde(rename = "turn.started")]
    TurnStarted,
    #[serde(rename = "turn.completed")]
    TurnCompleted {
        #[serde(default)]
        usage: Option<Usage>,
    },
    #[serde(rename = "turn.failed")]
    TurnFailed { error: ThreadError },
    #[serde(rename = "item.started")]
    ItemStarted { item: ThreadItem },
    #[serde(rename = "item.updated")]
    ItemUpdated { item: ThreadItem },
    #[serde(rename = "item.completed")]
    ItemCompleted { item: ThreadItem },
    #[serde(rename = "error")]
    Error { message: String },
    /// Event kinds this client does not know about yet.
    #[serde(other)]
    Unknown,
}

impl ThreadEvent {
    /// Text of an agent message carried by an item event.
    pub fn agent_message(&self) -> Option<(&str, &str)> {
        match self {
            Self::ItemStarted { item } | Self::ItemUpdated { item } | Self::ItemCompleted { item } => {
                item.agent_message_text().map(|text| (item.id(), text))
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadError {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ThreadItem {
    AgentMessage {
        #[serde(default)]
        id: String,
        text: String,
    },
    Reasoning {
        #[serde(default)]
        id: String,
        #[serde(default)]
        text: String,
    },
    CommandExecution {
        #[serde(default)]
        id: String,
        command: String,
        #[serde(default)]
        aggregated_output: String,
        #[serde(default)]
        exit_code: Option<i32>,
        #[serde(default)]
        status: Option<String>,
    },
    Error {
        #[serde(default)]
        id: String,
        message: String,
    },
    #[serde(other)]
    Other,
}

impl ThreadItem {
    pub fn id(&self) -> &str {
        match self {
            Self::AgentMessage { id, .. }
            | Self::Reasoning { id, .. }
            | Self::CommandExecution { id, .. }
            | Self::Error { id, .. } => id,
            Self::Other => "",
        }
    }

    pub fn agent_message_text(&self) -> Option<&str> {
        match self {
            Self::AgentMessage { text, .. } => Some(text),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub cached_input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UserInput {
    Text { text: String },
    LocalImage { path: PathBuf },
}

/// Result of a completed (non-streamed) turn.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Turn {
    /// Text of the last completed agent message.
    pub final_response: Option<String>,
    /// Latest agent message text seen in any item event, completed or not.
    pub text: Option<String>,
    pub items: Vec<ThreadItem>,
    pub usage: Option<Usage>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_exec_event_lines() {
        let started: ThreadEvent =
            serde_json::from_str(r#"{"type":"thread.started","thread_id":"0199a213-81c0-7800-8aa1-bbab2a035a53"}"#)
                .unwrap();
        assert_eq!(
            started,
            ThreadEvent::ThreadStarted {
                thread_id: "0199a213-81c0-7800-8aa1-bbab2a035a53".to_string()
            }
        );

        let completed: ThreadEvent = serde_json::from_value(json!({
            "type": "item.completed",
            "item": { "id": "item_3", "type": "agent_message", "text": "Done." }
        }))
        .unwrap();
        assert_eq!(completed.agent_message(), Some(("item_3", "Done.")));

        let usage: ThreadEvent = serde_json::from_value(json!({
            "type": "turn.completed",
            "usage": { "input_tokens": 24763, "cached_input_tokens": 24448, "output_tokens": 122 }
        }))
        .unwrap();
        assert_eq!(
            usage,
            ThreadEvent::TurnCompleted {
                usage: Some(Usage {
                    input_tokens: 24763,
                    cached_input_tokens: 24448,
                    output_tokens: 122
                })
            }
        );
    }

    #[test]
    fn unknown_kinds_are_tolerated() {
        let event: ThreadEvent =
            serde_json::from_value(json!({ "type": "turn.plan.updated", "plan": [] })).unwrap();
        assert_eq!(event, ThreadEvent::Unknown);

        let item: ThreadEvent = serde_json::from_value(json!({
            "type": "item.started",
            "item": { "id": "item_1", "type": "web_search", "query": "rust" }
        }))
        .unwrap();
        assert_eq!(item, ThreadEvent::ItemStarted { item: ThreadItem::Other });
        assert_eq!(item.agent_message(), None);
    }

    #[test]
    fn turn_started_ignores_extra_fields() {
        let event: ThreadEvent =
            serde_json::from_value(json!({ "type": "turn.started", "turn_id": "t1" })).unwrap();
        assert_eq!(event, ThreadEvent::TurnStarted);
    }
}
