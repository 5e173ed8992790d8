use codex_bridge_error::BridgeError;
use serde_json::Value;

use crate::attachments::{Attachment, AttachmentResolver, CleanupSet};

/// A chat message reduced to what the prompt builder needs.
#[derive(Debug, Default)]
pub struct MessageEntry {
    pub role: Option<String>,
    pub text: Option<String>,
    pub attachments: Vec<Attachment>,
}

impl MessageEntry {
    pub fn has_role(&self, role: &str) -> bool {
        self.role.as_deref() == Some(role)
    }

    /// Text, when present and non-empty.
    pub fn text(&self) -> Option<&str> {
        self.text.as_deref().filter(|text| !text.is_empty())
    }
}

/// Normalizes the request's `messages` array, one entry per input element.
///
/// On error every attachment already resolved is dropped, which removes its
/// temporary files.
pub async fn normalize_messages(
    messages: &[Value],
    resolver: &AttachmentResolver,
) -> Result<Vec<MessageEntry>, BridgeError> {
    let mut normalized = Vec::with_capacity(messages.len());
    for (index, message) in messages.iter().enumerate() {
        normalized.push(normalize_entry(message, index, resolver).await?);
    }
    Ok(normalized)
}

async fn normalize_entry(
    message: &Value,
    index: usize,
    resolver: &AttachmentResolver,
) -> Result<MessageEntry, BridgeError> {
    let Some(object) = message.as_object() else {
        return Ok(MessageEntry::default());
    };

    let role = object
        .get("role")
        .and_then(Value::as_str)
        .map(|role| role.trim().to_ascii_lowercase());

    let content = object.get("content");
    let text = match content {
        Some(Value::String(text)) => Some(text.clone()),
        Some(Value::Array(blocks)) => {
            let parts: Vec<&str> = blocks
                .iter()
                .filter(|block| block.get("type").and_then(Value::as_str) == Some("text"))
                .filter_map(|block| block.get("text").and_then(Value::as_str))
                .filter(|text| !text.is_empty())
                .collect();
            (!parts.is_empty()).then(|| parts.join("\n"))
        }
        _ => None,
    };

    let mut attachments = Vec::new();
    if let Some(Value::Array(blocks)) = content {
        for block in blocks {
            if let Some(attachment) = resolve_block(block, index, resolver).await? {
                attachments.push(attachment);
            }
        }
    }

    Ok(MessageEntry {
        role,
        text,
        attachments,
    })
}

async fn resolve_block(
    block: &Value,
    index: usize,
    resolver: &AttachmentResolver,
) -> Result<Option<Attachment>, BridgeError> {
    let string_field = |key: &str| block.get(key).and_then(Value::as_str);

    match string_field("type") {
        Some("local_image") => {
            let path = string_field("path")
                .or_else(|| string_field("image_path"))
                .ok_or_else(|| {
                    BridgeError::invalid_request(format!(
                        "Message {} local_image block is missing path.",
                        index + 1
                    ))
                })?;
            resolver
                .resolve_path(path)
                .map(Some)
                .map_err(|err| with_message_index(err, index))
        }
        Some("image_url") | Some("input_image") => {
            let url = block
                .get("image_url")
                .and_then(|image| image.get("url"))
                .and_then(Value::as_str)
                .or_else(|| string_field("url"))
                .ok_or_else(|| {
                    BridgeError::invalid_request(format!(
                        "Message {} image_url block is missing url.",
                        index + 1
                    ))
                })?;
            resolver
                .resolve_url(url)
                .await
                .map(Some)
                .map_err(|err| with_message_index(err, index))
        }
        _ => Ok(None),
    }
}

/// Prefixes input errors with the 1-based message number.
fn with_message_index(err: BridgeError, index: usize) -> BridgeError {
    match err {
        BridgeError::InvalidRequest { message } => {
            BridgeError::invalid_request(format!("Message {}: {message}", index + 1))
        }
        other => other,
    }
}

/// Takes every pending cleanup out of the entries.
pub fn collect_cleanups(entries: &mut [MessageEntry]) -> CleanupSet {
    let mut cleanups = CleanupSet::default();
    for attachment in entries.iter_mut().flat_map(|entry| entry.attachments.iter_mut()) {
        if let Some(cleanup) = attachment.cleanup.take() {
            cleanups.push(cleanup);
        }
    }
    cleanups
}
