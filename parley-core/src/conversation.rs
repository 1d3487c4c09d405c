//! Conversation types produced by compilation

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Free-form configuration copied from config blocks and step tags.
pub type Config = serde_json::Map<String, serde_json::Value>;

// ============================================================================
// ROLES
// ============================================================================

/// The author of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

impl MessageRole {
    pub const ALL: &'static [MessageRole] = &[
        Self::System,
        Self::User,
        Self::Assistant,
        Self::Tool,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }

    /// Roles whose content collapses to a plain string when it is all text.
    pub fn prefers_text_content(&self) -> bool {
        matches!(self, Self::System | Self::Assistant)
    }
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error parsing a [`MessageRole`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRoleParseError(pub String);

impl fmt::Display for MessageRoleParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid message role: {}", self.0)
    }
}

impl std::error::Error for MessageRoleParseError {}

impl FromStr for MessageRole {
    type Err = MessageRoleParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "system" => Ok(Self::System),
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            "tool" => Ok(Self::Tool),
            _ => Err(MessageRoleParseError(s.to_string())),
        }
    }
}

// ============================================================================
// CONTENT
// ============================================================================

/// One typed unit of message content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum MessageContent {
    Text {
        text: String,
    },
    Image {
        image: String,
    },
    #[serde(rename_all = "camelCase")]
    ToolCall {
        tool_call_id: String,
        tool_name: String,
        args: serde_json::Value,
    },
    #[serde(rename_all = "camelCase")]
    ToolResult {
        tool_call_id: String,
        tool_name: String,
        result: serde_json::Value,
        #[serde(default)]
        is_error: bool,
    },
}

impl MessageContent {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn image(image: impl Into<String>) -> Self {
        Self::Image {
            image: image.into(),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            _ => None,
        }
    }
}

/// Message content: the string shorthand or an ordered list of parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Content {
    Text(String),
    Parts(Vec<MessageContent>),
}

impl Content {
    /// Concatenated text of every text part.
    pub fn text(&self) -> String {
        match self {
            Content::Text(text) => text.clone(),
            Content::Parts(parts) => parts
                .iter()
                .filter_map(MessageContent::as_text)
                .collect::<Vec<_>>()
                .join(""),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Content::Text(text) => text.is_empty(),
            Content::Parts(parts) => parts.is_empty(),
        }
    }
}

// ============================================================================
// MESSAGES
// ============================================================================

/// A role-tagged message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: Content,
    #[serde(rename = "toolId", default, skip_serializing_if = "Option::is_none")]
    pub tool_id: Option<String>,
}

impl Message {
    /// Build a message from its parts, applying the per-role content shape:
    /// system and assistant messages whose parts are all text collapse into a
    /// single string, user and tool messages always keep the part list.
    pub fn from_parts(role: MessageRole, parts: Vec<MessageContent>) -> Self {
        let all_text = parts.iter().all(|part| part.as_text().is_some());
        let content = if role.prefers_text_content() && all_text {
            Content::Text(
                parts
                    .iter()
                    .filter_map(MessageContent::as_text)
                    .collect::<Vec<_>>()
                    .join("\n"),
            )
        } else {
            Content::Parts(parts)
        };

        Self {
            role,
            content,
            tool_id: None,
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: Content::Text(text.into()),
            tool_id: None,
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: Content::Text(text.into()),
            tool_id: None,
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::from_parts(MessageRole::User, vec![MessageContent::text(text)])
    }

    pub fn with_tool_id(mut self, tool_id: impl Into<String>) -> Self {
        self.tool_id = Some(tool_id.into());
        self
    }
}

// ============================================================================
// CONVERSATION & STEPS
// ============================================================================

/// The compiled output: configuration plus ordered messages.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub config: Config,
    pub messages: Vec<Message>,
}

/// Snapshot returned by every chain step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainStep {
    pub conversation: Conversation,
    pub completed: bool,
}

/// An immutable template document, identified by path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Document {
    pub path: String,
    pub content: String,
}

impl Document {
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_role_round_trip() {
        for role in MessageRole::ALL {
            assert_eq!(role.as_str().parse::<MessageRole>().unwrap(), *role);
        }
        assert!("foo".parse::<MessageRole>().is_err());
    }

    #[test]
    fn test_system_text_parts_collapse_to_string() {
        let msg = Message::from_parts(MessageRole::System, vec![MessageContent::text("hi")]);
        assert_eq!(msg.content, Content::Text("hi".to_string()));
    }

    #[test]
    fn test_user_parts_stay_as_list() {
        let msg = Message::from_parts(MessageRole::User, vec![MessageContent::text("hi")]);
        assert_eq!(msg.content, Content::Parts(vec![MessageContent::text("hi")]));
    }

    #[test]
    fn test_mixed_assistant_parts_stay_as_list() {
        let parts = vec![MessageContent::text("a"), MessageContent::image("img")];
        let msg = Message::from_parts(MessageRole::Assistant, parts.clone());
        assert_eq!(msg.content, Content::Parts(parts));
    }

    #[test]
    fn test_message_serializes_provider_shape() {
        let msg = Message::from_parts(MessageRole::Tool, vec![MessageContent::text("ok")])
            .with_tool_id("call-1");
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            value,
            json!({
                "role": "tool",
                "content": [{"type": "text", "text": "ok"}],
                "toolId": "call-1"
            })
        );

        let system = serde_json::to_value(Message::system("be brief")).unwrap();
        assert_eq!(system, json!({"role": "system", "content": "be brief"}));
    }

    #[test]
    fn test_tool_result_uses_camel_case_fields() {
        let content = MessageContent::ToolResult {
            tool_call_id: "1".into(),
            tool_name: "search".into(),
            result: json!({"hits": 2}),
            is_error: false,
        };
        let value = serde_json::to_value(&content).unwrap();
        assert_eq!(value["type"], "tool-result");
        assert_eq!(value["toolCallId"], "1");
        assert_eq!(value["isError"], false);
        let back: MessageContent = serde_json::from_value(value).unwrap();
        assert_eq!(back, content);
    }
}
