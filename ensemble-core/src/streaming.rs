//! Delta streaming: converting conversation snapshots into ordered,
//! duplicate-free events.
//!
//! Subscribers (the terminal UI, WebSocket clients) do not want repeated
//! snapshots; they want the new message, the appended characters, the tool
//! call that just happened. Each subscriber owns a [`StreamCursor`] holding
//! the little state needed to compute those deltas. Cursor state is updated
//! *before* events are handed out, so a fast successor snapshot can never
//! observe stale counters and double-emit content.
//!
//! The invariant: for any message, the `Message` event's content plus all
//! subsequent `MessageDelta` payloads concatenate to the final content
//! exactly once. Snapshots may be coalesced arbitrarily; the cursor flushes
//! the pending tail of the previous message before reporting newer ones.

use std::collections::HashMap;

use serde_json::{json, Value};

use crate::client::conversation::{Conversation, ConversationMessage, ResponseFragment, Role};

/// An outward-facing event for one agent's subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentStreamEvent {
    /// Subscriber bookkeeping (initial "connected" notification).
    Status { status: String },
    /// A new message with its full content so far.
    Message { role: Role, content: String },
    /// Characters appended to the last assistant message.
    MessageDelta { delta: String },
    /// A tool invocation surfaced by the backend.
    ToolUse {
        tool_name: String,
        tool_use_id: Option<String>,
        parameters: Value,
    },
    /// The paired result; `tool_name` recovered from the matching use.
    ToolResult {
        tool_name: String,
        tool_use_id: String,
        result: String,
        is_error: bool,
    },
    Error { message: String },
    /// Turn complete. At most one per turn.
    Done,
}

impl AgentStreamEvent {
    /// Wire tag for the WebSocket envelope.
    pub fn event_type(&self) -> &'static str {
        match self {
            AgentStreamEvent::Status { .. } => "status",
            AgentStreamEvent::Message { .. } => "message",
            AgentStreamEvent::MessageDelta { .. } => "message_delta",
            AgentStreamEvent::ToolUse { .. } => "tool_use",
            AgentStreamEvent::ToolResult { .. } => "tool_result",
            AgentStreamEvent::Error { .. } => "error",
            AgentStreamEvent::Done => "done",
        }
    }

    /// Type-specific payload for the WebSocket envelope.
    pub fn data(&self) -> Value {
        match self {
            AgentStreamEvent::Status { status } => json!({ "status": status }),
            AgentStreamEvent::Message { role, content } => {
                json!({ "role": role.to_string(), "content": content })
            }
            AgentStreamEvent::MessageDelta { delta } => {
                json!({ "role": "assistant", "delta": delta })
            }
            AgentStreamEvent::ToolUse {
                tool_name,
                parameters,
                ..
            } => json!({ "toolName": tool_name, "toolInput": parameters }),
            AgentStreamEvent::ToolResult {
                tool_name,
                result,
                is_error,
                ..
            } => json!({ "toolName": tool_name, "result": result, "isError": is_error }),
            AgentStreamEvent::Error { message } => json!({ "message": message }),
            AgentStreamEvent::Done => json!({}),
        }
    }
}

/// Per-subscriber delta state.
#[derive(Debug, Default)]
pub struct StreamCursor {
    last_message_count: usize,
    /// Char count of the last message's content as of the last emission.
    last_content_length: usize,
    tool_names_by_use_id: HashMap<String, String>,
    last_error: Option<String>,
}

impl StreamCursor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Full-state replay for a late subscriber: one `Message` per existing
    /// message, then every tool event in order, then any current error.
    /// Leaves the cursor aligned with the snapshot's tail.
    pub fn catch_up(&mut self, convo: &Conversation) -> Vec<AgentStreamEvent> {
        self.last_message_count = convo.messages.len();
        self.last_content_length = convo.last_content_len();

        let mut events = Vec::new();
        for message in &convo.messages {
            events.push(AgentStreamEvent::Message {
                role: message.role,
                content: message.content.clone(),
            });
        }
        for message in &convo.messages {
            events.extend(self.tool_events(message));
        }
        events.extend(self.error_event(convo));
        events
    }

    /// Compute the events a new snapshot implies.
    pub fn advance(&mut self, convo: &Conversation) -> Vec<AgentStreamEvent> {
        let mut events = Vec::new();
        let count = convo.messages.len();

        if count > self.last_message_count {
            let first_new = self.last_message_count;

            // The previously-last message may have grown in the same
            // coalesced snapshot; flush its tail before reporting newer
            // messages so no content is lost.
            if first_new > 0 {
                if let Some(delta) =
                    pending_delta(&convo.messages[first_new - 1], self.last_content_length)
                {
                    events.push(AgentStreamEvent::MessageDelta { delta });
                }
            }

            self.last_message_count = count;
            self.last_content_length = convo.last_content_len();

            for message in &convo.messages[first_new..] {
                events.push(AgentStreamEvent::Message {
                    role: message.role,
                    content: message.content.clone(),
                });
                events.extend(self.tool_events(message));
            }
        } else if count > 0 {
            let current_length = convo.last_content_len();
            if current_length > self.last_content_length {
                let previous = self.last_content_length;
                self.last_content_length = current_length;
                if let Some(delta) =
                    pending_delta(&convo.messages[count - 1], previous)
                {
                    events.push(AgentStreamEvent::MessageDelta { delta });
                }
            }
        }

        events.extend(self.error_event(convo));
        events
    }

    /// Tool events for one message, recording use-id → name mappings.
    fn tool_events(&mut self, message: &ConversationMessage) -> Vec<AgentStreamEvent> {
        let mut events = Vec::new();
        for fragment in &message.responses {
            match fragment {
                ResponseFragment::ToolUse {
                    tool_name,
                    tool_use_id,
                    parameters,
                } => {
                    if let Some(id) = tool_use_id {
                        self.tool_names_by_use_id
                            .insert(id.clone(), tool_name.clone());
                    }
                    events.push(AgentStreamEvent::ToolUse {
                        tool_name: tool_name.clone(),
                        tool_use_id: tool_use_id.clone(),
                        parameters: parameters.clone(),
                    });
                }
                ResponseFragment::ToolResult {
                    tool_use_id,
                    content,
                    is_error,
                } => {
                    let tool_name = self
                        .tool_names_by_use_id
                        .get(tool_use_id)
                        .cloned()
                        .unwrap_or_else(|| "unknown".to_string());
                    events.push(AgentStreamEvent::ToolResult {
                        tool_name,
                        tool_use_id: tool_use_id.clone(),
                        result: content.clone(),
                        is_error: *is_error,
                    });
                }
                _ => {}
            }
        }
        events
    }

    /// Emit the conversation error once per distinct message.
    fn error_event(&mut self, convo: &Conversation) -> Option<AgentStreamEvent> {
        match &convo.current_error {
            Some(message) if self.last_error.as_deref() != Some(message.as_str()) => {
                self.last_error = Some(message.clone());
                Some(AgentStreamEvent::Error {
                    message: message.clone(),
                })
            }
            Some(_) => None,
            None => {
                self.last_error = None;
                None
            }
        }
    }
}

/// Characters of `message.content` past `already_sent` chars, if any.
fn pending_delta(message: &ConversationMessage, already_sent: usize) -> Option<String> {
    let total = message.content.chars().count();
    if total <= already_sent {
        return None;
    }
    Some(message.content.chars().skip(already_sent).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::conversation::ConversationMessage;
    use serde_json::json;

    fn convo_with_assistant(content: &str, streaming: bool) -> Conversation {
        let mut convo = Conversation::default();
        let mut message = ConversationMessage::assistant_streaming();
        message.push_fragment(ResponseFragment::Text {
            content: content.to_string(),
            role: Some(Role::Assistant),
            is_partial: true,
        });
        if !streaming {
            message.complete();
        }
        convo.messages.push(message);
        convo
    }

    fn grow_last(convo: &mut Conversation, extra: &str) {
        convo
            .messages
            .last_mut()
            .unwrap()
            .push_fragment(ResponseFragment::Text {
                content: extra.to_string(),
                role: Some(Role::Assistant),
                is_partial: true,
            });
    }

    /// Assemble message content the way a subscriber would: full content on
    /// `Message`, appended deltas afterwards.
    fn assemble(events: &[AgentStreamEvent]) -> String {
        let mut text = String::new();
        for event in events {
            match event {
                AgentStreamEvent::Message { content, .. } => text = content.clone(),
                AgentStreamEvent::MessageDelta { delta } => text.push_str(delta),
                _ => {}
            }
        }
        text
    }

    #[test]
    fn test_new_message_emits_full_content() {
        let mut cursor = StreamCursor::new();
        let convo = convo_with_assistant("hello", true);
        let events = cursor.advance(&convo);
        assert_eq!(
            events,
            vec![AgentStreamEvent::Message {
                role: Role::Assistant,
                content: "hello".to_string()
            }]
        );
    }

    #[test]
    fn test_deltas_never_overlap() {
        let mut cursor = StreamCursor::new();
        let mut convo = convo_with_assistant("ab", true);
        let mut all = cursor.advance(&convo);

        grow_last(&mut convo, "cd");
        all.extend(cursor.advance(&convo));
        grow_last(&mut convo, "e");
        all.extend(cursor.advance(&convo));

        assert_eq!(assemble(&all), "abcde");
        // The delta events carry exactly the appended suffixes.
        let deltas: Vec<_> = all
            .iter()
            .filter_map(|e| match e {
                AgentStreamEvent::MessageDelta { delta } => Some(delta.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(deltas, vec!["cd".to_string(), "e".to_string()]);
    }

    #[test]
    fn test_unchanged_snapshot_emits_nothing() {
        let mut cursor = StreamCursor::new();
        let convo = convo_with_assistant("hello", true);
        cursor.advance(&convo);
        assert!(cursor.advance(&convo).is_empty());
    }

    #[test]
    fn test_coalesced_growth_and_new_message_flushes_tail() {
        let mut cursor = StreamCursor::new();
        let mut convo = convo_with_assistant("par", true);
        let mut all = cursor.advance(&convo);

        // Both mutations land in one observed snapshot.
        grow_last(&mut convo, "tial");
        convo.messages.push(ConversationMessage::user("next"));
        all.extend(cursor.advance(&convo));

        assert_eq!(
            all,
            vec![
                AgentStreamEvent::Message {
                    role: Role::Assistant,
                    content: "par".to_string()
                },
                AgentStreamEvent::MessageDelta {
                    delta: "tial".to_string()
                },
                AgentStreamEvent::Message {
                    role: Role::User,
                    content: "next".to_string()
                },
            ]
        );
    }

    #[test]
    fn test_multibyte_delta_boundaries() {
        let mut cursor = StreamCursor::new();
        let mut convo = convo_with_assistant("caf\u{e9}", true);
        let mut all = cursor.advance(&convo);
        grow_last(&mut convo, " \u{2713} done");
        all.extend(cursor.advance(&convo));
        assert_eq!(assemble(&all), "caf\u{e9} \u{2713} done");
    }

    #[test]
    fn test_tool_use_then_result_with_name_recovery() {
        let mut cursor = StreamCursor::new();
        let mut convo = Conversation::default();

        let mut use_msg = ConversationMessage::assistant_streaming();
        use_msg.push_fragment(ResponseFragment::ToolUse {
            tool_name: "Bash".to_string(),
            tool_use_id: Some("tu_1".to_string()),
            parameters: json!({"command": "ls"}),
        });
        convo.messages.push(use_msg);
        let events = cursor.advance(&convo);
        assert!(matches!(
            events[1],
            AgentStreamEvent::ToolUse { ref tool_name, .. } if tool_name == "Bash"
        ));

        convo.messages.push(ConversationMessage::tool_result(
            "tu_1".to_string(),
            "a.txt".to_string(),
            false,
        ));
        let events = cursor.advance(&convo);
        let result = events
            .iter()
            .find_map(|e| match e {
                AgentStreamEvent::ToolResult {
                    tool_name,
                    tool_use_id,
                    ..
                } => Some((tool_name.clone(), tool_use_id.clone())),
                _ => None,
            })
            .unwrap();
        assert_eq!(result, ("Bash".to_string(), "tu_1".to_string()));
    }

    #[test]
    fn test_unknown_tool_result_name_falls_back() {
        let mut cursor = StreamCursor::new();
        let mut convo = Conversation::default();
        convo.messages.push(ConversationMessage::tool_result(
            "never_seen".to_string(),
            "out".to_string(),
            false,
        ));
        let events = cursor.advance(&convo);
        assert!(events.iter().any(|e| matches!(
            e,
            AgentStreamEvent::ToolResult { tool_name, .. } if tool_name == "unknown"
        )));
    }

    #[test]
    fn test_catch_up_replays_messages_then_tools() {
        let mut convo = Conversation::default();
        convo.messages.push(ConversationMessage::user("list files"));
        let mut use_msg = ConversationMessage::assistant_streaming();
        use_msg.push_fragment(ResponseFragment::ToolUse {
            tool_name: "Bash".to_string(),
            tool_use_id: Some("tu_1".to_string()),
            parameters: json!({"command": "ls"}),
        });
        use_msg.complete();
        convo.messages.push(use_msg);
        convo.messages.push(ConversationMessage::tool_result(
            "tu_1".to_string(),
            "a.txt".to_string(),
            false,
        ));

        let mut cursor = StreamCursor::new();
        let events = cursor.catch_up(&convo);

        let types: Vec<_> = events.iter().map(|e| e.event_type()).collect();
        assert_eq!(
            types,
            vec!["message", "message", "message", "tool_use", "tool_result"]
        );

        // After catch-up the cursor is aligned: no duplicate emissions.
        assert!(cursor.advance(&convo).is_empty());
    }

    #[test]
    fn test_error_emitted_once_per_distinct_error() {
        let mut cursor = StreamCursor::new();
        let mut convo = convo_with_assistant("x", true);
        convo.current_error = Some("boom".to_string());

        let first = cursor.advance(&convo);
        assert!(first
            .iter()
            .any(|e| matches!(e, AgentStreamEvent::Error { .. })));
        assert!(cursor.advance(&convo).is_empty());

        convo.current_error = None;
        assert!(cursor.advance(&convo).is_empty());
        convo.current_error = Some("boom".to_string());
        assert_eq!(cursor.advance(&convo).len(), 1);
    }

    #[test]
    fn test_content_monotonicity_over_scripted_interleavings() {
        // Drive a conversation through uneven snapshot batches and check
        // that observed content is always a prefix of the next observation.
        let chunks = ["The ", "quick ", "brown ", "fox ", "jumps"];
        let batch_patterns: [&[usize]; 4] = [&[1, 1, 1, 1, 1], &[2, 3], &[5], &[3, 1, 1]];

        for pattern in batch_patterns {
            let mut cursor = StreamCursor::new();
            let mut convo = Conversation::default();
            convo.messages.push(ConversationMessage::user("go"));
            convo
                .messages
                .push(ConversationMessage::assistant_streaming());

            let mut all = cursor.advance(&convo);
            let mut observed = assemble(&all);
            let mut fed = 0;
            for &batch in pattern {
                for _ in 0..batch {
                    grow_last(&mut convo, chunks[fed]);
                    fed += 1;
                }
                all.extend(cursor.advance(&convo));
                let next = assemble(&all);
                assert!(
                    next.starts_with(&observed),
                    "content regressed: {observed:?} -> {next:?}"
                );
                observed = next;
            }
            assert_eq!(observed, "The quick brown fox jumps");
        }
    }
}
