use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// MQTT message types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embed {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Snapshot of the watched status message, republished on every edit.
#[derive(Debug, Clone, Deserialize)]
pub struct StatusMsg {
    #[serde(default)]
    pub embeds: Vec<Embed>,
}

impl StatusMsg {
    /// Description of the first embed. `None` when there are no embeds at
    /// all; an embed without description reads as empty text.
    pub fn description(&self) -> Option<&str> {
        self.embeds
            .first()
            .map(|e| e.description.as_deref().unwrap_or(""))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleCommand {
    Add,
    Remove,
}

impl RoleCommand {
    pub fn as_payload(&self) -> &'static [u8] {
        match self {
            RoleCommand::Add => b"ADD",
            RoleCommand::Remove => b"REMOVE",
        }
    }
}

// ---------------------------------------------------------------------------
// Topic helpers
// ---------------------------------------------------------------------------

pub const STATUS_SUBSCRIPTION: &str = "tree/+/status";

/// Extract message_id from "tree/<message_id>/status".
pub fn extract_message_id(topic: &str) -> Option<&str> {
    let parts: Vec<&str> = topic.split('/').collect();
    if parts.len() == 3 && parts[0] == "tree" && parts[2] == "status" && !parts[1].is_empty() {
        Some(parts[1])
    } else {
        None
    }
}

/// "chat/<channel_id>/send"
pub fn announce_topic(channel_id: &str) -> String {
    format!("chat/{channel_id}/send")
}

/// "chat/role/<role_id>/<user_id>"
pub fn role_topic(role_id: &str, user_id: &str) -> String {
    format!("chat/role/{role_id}/{user_id}")
}

// ===========================================================================
// Tests
// ===========================================================================
