use codex_bridge_backend::UserInput;
use codex_bridge_error::BridgeError;

use crate::messages::MessageEntry;

/// How the message list maps onto a backend turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptMode {
    /// The backend thread already holds earlier turns: send system
    /// instructions plus the latest user message.
    Session,
    /// No thread continuity: replay the whole transcript with role labels.
    Stateless,
}

pub fn build_prompt(entries: &[MessageEntry], mode: PromptMode) -> Result<Vec<UserInput>, BridgeError> {
    let inputs = match mode {
        PromptMode::Session => session_inputs(entries),
        PromptMode::Stateless => transcript_inputs(entries),
    };
    if inputs.is_empty() {
        return Err(BridgeError::invalid_request(
            "Messages must include at least one user entry.",
        ));
    }
    Ok(inputs)
}

fn session_inputs(entries: &[MessageEntry]) -> Vec<UserInput> {
    let mut inputs = Vec::new();

    let system_blocks: Vec<String> = entries
        .iter()
        .filter(|entry| entry.has_role("system"))
        .filter_map(|entry| entry.text().map(|text| labelled("system", text)))
        .collect();
    if !system_blocks.is_empty() {
        inputs.push(text_input(system_blocks.join("\n\n")));
    }

    if let Some(latest) = entries.iter().rev().find(|entry| entry.has_role("user")) {
        if let Some(text) = latest.text() {
            inputs.push(text_input(text.to_string()));
        }
        inputs.extend(image_inputs(latest));
    }
    inputs
}

fn transcript_inputs(entries: &[MessageEntry]) -> Vec<UserInput> {
    let mut inputs = Vec::new();
    for entry in entries {
        let Some(role) = entry.role.as_deref() else {
            continue;
        };
        match entry.text() {
            Some(text) => inputs.push(text_input(labelled(role, text))),
            None if !entry.attachments.is_empty() => inputs.push(text_input(label(role))),
            None => {}
        }
        inputs.extend(image_inputs(entry));
    }
    inputs
}

/// Text-only rendering of a prompt, for request logging.
pub fn flatten(inputs: &[UserInput]) -> String {
    inputs
        .iter()
        .map(|input| match input {
            UserInput::Text { text } => text.clone(),
            UserInput::LocalImage { path } => format!("<image {}>", path.display()),
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn label(role: &str) -> String {
    format!("[{}]", role.to_uppercase())
}

fn labelled(role: &str, text: &str) -> String {
    format!("{}\n{}", label(role), text).trim().to_string()
}

fn text_input(text: String) -> UserInput {
    UserInput::Text { text }
}

fn image_inputs(entry: &MessageEntry) -> impl Iterator<Item = UserInput> + '_ {
    entry.attachments.iter().map(|attachment| UserInput::LocalImage {
        path: attachment.path.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attachments::Attachment;
    use std::path::PathBuf;

    fn entry(role: &str, text: Option<&str>) -> MessageEntry {
        MessageEntry {
            role: Some(role.to_string()),
            text: text.map(str::to_string),
            attachments: Vec::new(),
        }
    }

    fn image(path: &str) -> Attachment {
        Attachment {
            path: PathBuf::from(path),
            cleanup: None,
        }
    }

    fn texts(inputs: &[UserInput]) -> Vec<&str> {
        inputs
            .iter()
            .filter_map(|input| match input {
                UserInput::Text { text } => Some(text.as_str()),
                UserInput::LocalImage { .. } => None,
            })
            .collect()
    }

    #[test]
    fn session_mode_sends_system_and_latest_user() {
        let entries = vec![
            entry("system", Some("Be terse.")),
            entry("user", Some("first question")),
            entry("assistant", Some("first answer")),
            entry("system", Some("Answer in French.")),
            entry("user", Some("second question")),
        ];
        let inputs = build_prompt(&entries, PromptMode::Session).unwrap();
        assert_eq!(
            texts(&inputs),
            vec![
                "[SYSTEM]\nBe terse.\n\n[SYSTEM]\nAnswer in French.",
                "second question"
            ]
        );
    }

    #[test]
    fn stateless_mode_labels_every_entry() {
        let mut with_image = entry("user", None);
        with_image.attachments.push(image("/tmp/cat.png"));
        let entries = vec![
            entry("system", Some("Be terse.")),
            entry("assistant", Some("  hello  ")),
            with_image,
            MessageEntry::default(),
        ];
        let inputs = build_prompt(&entries, PromptMode::Stateless).unwrap();
        assert_eq!(
            inputs,
            vec![
                UserInput::Text {
                    text: "[SYSTEM]\nBe terse.".to_string()
                },
                UserInput::Text {
                    text: "[ASSISTANT]\n  hello".to_string()
                },
                UserInput::Text {
                    text: "[USER]".to_string()
                },
                UserInput::LocalImage {
                    path: PathBuf::from("/tmp/cat.png")
                },
            ]
        );
    }

    #[test]
    fn empty_prompt_is_rejected() {
        let entries = vec![entry("assistant", Some("only me")), entry("user", Some(""))];
        let err = build_prompt(&entries, PromptMode::Session).unwrap_err();
        assert_eq!(err.to_string(), "Messages must include at least one user entry.");

        assert!(build_prompt(&[MessageEntry::default()], PromptMode::Stateless).is_err());
    }

    #[test]
    fn flatten_marks_images() {
        let inputs = vec![
            UserInput::Text {
                text: "look".to_string(),
            },
            UserInput::LocalImage {
                path: PathBuf::from("/tmp/a.png"),
            },
        ];
        assert_eq!(flatten(&inputs), "look\n\n<image /tmp/a.png>");
    }
}
