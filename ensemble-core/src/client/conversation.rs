//! Conversation state: typed response fragments and message assembly.
//!
//! A conversation is an ordered list of messages. Messages are treated as
//! values: updating the tail while it streams replaces the slot rather than
//! mutating shared state, so snapshots handed to subscribers stay stable.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Author of a conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// Backend-reported processing status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendStatus {
    Ready,
    Processing,
    Thinking,
    Responding,
    Completed,
    Error,
    Unknown,
}

impl BackendStatus {
    pub fn parse(tag: &str) -> Self {
        match tag {
            "ready" => BackendStatus::Ready,
            "processing" => BackendStatus::Processing,
            "thinking" => BackendStatus::Thinking,
            "responding" => BackendStatus::Responding,
            "completed" => BackendStatus::Completed,
            "error" => BackendStatus::Error,
            _ => BackendStatus::Unknown,
        }
    }
}

/// Token counts reported by a completion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// One typed fragment of a backend response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ResponseFragment {
    Text {
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        role: Option<Role>,
        #[serde(default)]
        is_partial: bool,
    },
    ToolUse {
        tool_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tool_use_id: Option<String>,
        parameters: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(default)]
        is_error: bool,
    },
    Status {
        status: BackendStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    Meta {
        data: Value,
    },
    Completion {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stop_reason: Option<String>,
        #[serde(default)]
        usage: TokenUsage,
    },
    Error {
        message: String,
    },
    Unknown {
        raw: Value,
    },
}

/// A message plus the fragments it was assembled from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationMessage {
    pub id: String,
    pub role: Role,
    pub timestamp: DateTime<Utc>,
    /// For assistant messages this is the concatenation of the text
    /// fragments in `responses`, in order.
    pub content: String,
    #[serde(default)]
    pub responses: Vec<ResponseFragment>,
    #[serde(default)]
    pub is_streaming: bool,
    #[serde(default)]
    pub is_complete: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_usage: Option<TokenUsage>,
}

impl ConversationMessage {
    /// A completed user message.
    pub fn user(content: impl Into<String>) -> Self {
        let content = content.into();
        Self {
            id: Uuid::new_v4().to_string(),
            role: Role::User,
            timestamp: Utc::now(),
            responses: vec![ResponseFragment::Text {
                content: content.clone(),
                role: Some(Role::User),
                is_partial: false,
            }],
            content,
            is_streaming: false,
            is_complete: true,
            token_usage: None,
        }
    }

    /// A user message wrapping a tool result fragment. The textual content
    /// stays empty; the fragment carries the payload.
    pub fn tool_result(tool_use_id: String, content: String, is_error: bool) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role: Role::User,
            timestamp: Utc::now(),
            content: String::new(),
            responses: vec![ResponseFragment::ToolResult {
                tool_use_id,
                content,
                is_error,
            }],
            is_streaming: false,
            is_complete: true,
            token_usage: None,
        }
    }

    /// An assistant message that starts out streaming.
    pub fn assistant_streaming() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role: Role::Assistant,
            timestamp: Utc::now(),
            content: String::new(),
            responses: Vec::new(),
            is_streaming: true,
            is_complete: false,
            token_usage: None,
        }
    }

    /// Append a fragment, keeping derived fields in sync.
    pub fn push_fragment(&mut self, fragment: ResponseFragment) {
        match &fragment {
            ResponseFragment::Text { content, .. } => self.content.push_str(content),
            ResponseFragment::Completion { usage, .. } => {
                if self.token_usage.is_none() {
                    self.token_usage = Some(*usage);
                }
            }
            _ => {}
        }
        self.responses.push(fragment);
    }

    /// Mark the message finished.
    pub fn complete(&mut self) {
        self.is_streaming = false;
        self.is_complete = true;
    }

    /// Tool use fragments in declaration order.
    pub fn tool_uses(&self) -> impl Iterator<Item = (&str, Option<&str>, &Value)> {
        self.responses.iter().filter_map(|f| match f {
            ResponseFragment::ToolUse {
                tool_name,
                tool_use_id,
                parameters,
            } => Some((tool_name.as_str(), tool_use_id.as_deref(), parameters)),
            _ => None,
        })
    }
}

/// High-level conversation state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConversationState {
    #[default]
    Idle,
    SendingMessage,
    ReceivingResponse,
    Processing,
    Error,
}

/// A tool invocation paired with its result, if any has arrived.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolInvocation {
    pub tool_name: String,
    pub tool_use_id: Option<String>,
    pub parameters: Value,
    pub result: Option<ToolOutcome>,
}

/// Outcome of a completed tool invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutcome {
    pub content: String,
    pub is_error: bool,
}

impl ToolInvocation {
    pub fn has_result(&self) -> bool {
        self.result.is_some()
    }
}

/// The conversation: messages, state, and cumulative token accounting.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub messages: Vec<ConversationMessage>,
    #[serde(default)]
    pub state: ConversationState,
    #[serde(default)]
    pub total_input_tokens: u64,
    #[serde(default)]
    pub total_output_tokens: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_error: Option<String>,
}

impl Conversation {
    pub fn last_message(&self) -> Option<&ConversationMessage> {
        self.messages.last()
    }

    /// Content length of the last message, in characters.
    pub fn last_content_len(&self) -> usize {
        self.messages
            .last()
            .map(|m| m.content.chars().count())
            .unwrap_or(0)
    }

    /// Pair tool use fragments with their results by id, in declaration
    /// order across the whole conversation. Uses without a matching result
    /// yield an invocation with no outcome.
    pub fn tool_invocations(&self) -> Vec<ToolInvocation> {
        let mut invocations: Vec<ToolInvocation> = Vec::new();
        for message in &self.messages {
            for fragment in &message.responses {
                match fragment {
                    ResponseFragment::ToolUse {
                        tool_name,
                        tool_use_id,
                        parameters,
                    } => invocations.push(ToolInvocation {
                        tool_name: tool_name.clone(),
                        tool_use_id: tool_use_id.clone(),
                        parameters: parameters.clone(),
                        result: None,
                    }),
                    ResponseFragment::ToolResult {
                        tool_use_id,
                        content,
                        is_error,
                    } => {
                        if let Some(invocation) = invocations.iter_mut().find(|inv| {
                            inv.result.is_none() && inv.tool_use_id.as_deref() == Some(tool_use_id)
                        }) {
                            invocation.result = Some(ToolOutcome {
                                content: content.clone(),
                                is_error: *is_error,
                            });
                        }
                    }
                    _ => {}
                }
            }
        }
        invocations
    }

    /// Fold a completed message's usage into the running totals.
    pub fn account(&mut self, usage: TokenUsage) {
        self.total_input_tokens += usage.input_tokens;
        self.total_output_tokens += usage.output_tokens;
    }
}
