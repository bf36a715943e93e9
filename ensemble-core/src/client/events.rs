//! Parsing of the backend's newline-delimited JSON event stream.
//!
//! Each line is one JSON object tagged by `type`. Unrecognized types and
//! unparseable lines become [`ResponseFragment::Unknown`]; a bad line never
//! aborts the stream. String payloads are HTML-entity decoded in a single
//! pass (`&amp;lt;` stays `&lt;`).

use serde_json::Value;

use super::conversation::{BackendStatus, ResponseFragment, Role, TokenUsage};

/// Outcome of parsing one stream line.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedLine {
    pub fragments: Vec<ResponseFragment>,
    /// True for `result` lines, which end the current turn.
    pub turn_complete: bool,
}

/// Decode the five core HTML entities in one left-to-right pass.
pub fn decode_entities(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let bytes = input.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'&' {
            let rest = &input[i..];
            let replacement = [
                ("&lt;", '<'),
                ("&gt;", '>'),
                ("&amp;", '&'),
                ("&quot;", '"'),
                ("&apos;", '\''),
            ]
            .iter()
            .find(|(entity, _)| rest.starts_with(entity));
            if let Some((entity, ch)) = replacement {
                out.push(*ch);
                i += entity.len();
                continue;
            }
        }
        let ch = input[i..].chars().next().expect("in-bounds char");
        out.push(ch);
        i += ch.len_utf8();
    }
    out
}

/// Parse one stream line into response fragments.
///
/// Most lines produce exactly one fragment; a `user` line carrying several
/// tool results produces one per result.
pub fn parse_event_line(line: &str) -> ParsedLine {
    let value: Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(_) => {
            return ParsedLine {
                fragments: vec![ResponseFragment::Unknown {
                    raw: Value::String(line.to_string()),
                }],
                turn_complete: false,
            }
        }
    };

    let Some(event_type) = value.get("type").and_then(Value::as_str).map(str::to_string) else {
        return ParsedLine {
            fragments: vec![ResponseFragment::Unknown { raw: value }],
            turn_complete: false,
        };
    };

    let fragments = match event_type.as_str() {
        "text" | "message" => vec![text_fragment(&value, event_type == "text")],
        "assistant" => vec![assistant_fragment(&value)],
        "tool_use" => vec![tool_use_fragment(&value)],
        "user" => tool_result_fragments(&value),
        "error" => vec![error_fragment(&value)],
        "status" => vec![status_fragment(&value)],
        "system" => vec![system_fragment(&value)],
        "result" | "completion" => vec![completion_fragment(&value)],
        "meta" => vec![ResponseFragment::Meta { data: value }],
        _ => vec![ResponseFragment::Unknown { raw: value }],
    };

    ParsedLine {
        fragments,
        turn_complete: event_type == "result",
    }
}

fn str_field<'a>(value: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|k| value.get(*k).and_then(Value::as_str))
}

fn text_fragment(value: &Value, is_partial: bool) -> ResponseFragment {
    let content = str_field(value, &["content", "text"]).unwrap_or_default();
    ResponseFragment::Text {
        content: decode_entities(content),
        role: Some(Role::Assistant),
        is_partial,
    }
}

fn assistant_fragment(value: &Value) -> ResponseFragment {
    let content = value
        .pointer("/message/content")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    // A tool_use item takes precedence over any text in the same event.
    if let Some(item) = content
        .iter()
        .find(|item| item.get("type").and_then(Value::as_str) == Some("tool_use"))
    {
        return ResponseFragment::ToolUse {
            tool_name: str_field(item, &["name", "toolName"]).unwrap_or("unknown").to_string(),
            tool_use_id: str_field(item, &["id", "toolUseId"]).map(str::to_string),
            parameters: item
                .get("input")
                .or_else(|| item.get("parameters"))
                .cloned()
                .unwrap_or(Value::Null),
        };
    }

    let text: String = content
        .iter()
        .filter(|item| item.get("type").and_then(Value::as_str) == Some("text"))
        .filter_map(|item| item.get("text").and_then(Value::as_str))
        .collect();
    ResponseFragment::Text {
        content: decode_entities(&text),
        role: Some(Role::Assistant),
        is_partial: false,
    }
}

fn tool_use_fragment(value: &Value) -> ResponseFragment {
    ResponseFragment::ToolUse {
        tool_name: str_field(value, &["toolName", "name"]).unwrap_or("unknown").to_string(),
        tool_use_id: str_field(value, &["toolUseId", "id"]).map(str::to_string),
        parameters: value
            .get("parameters")
            .or_else(|| value.get("input"))
            .cloned()
            .unwrap_or(Value::Null),
    }
}

fn tool_result_fragments(value: &Value) -> Vec<ResponseFragment> {
    let items = value
        .pointer("/message/content")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let fragments: Vec<ResponseFragment> = items
        .iter()
        .filter(|item| item.get("type").and_then(Value::as_str) == Some("tool_result"))
        .map(|item| ResponseFragment::ToolResult {
            tool_use_id: str_field(item, &["tool_use_id", "toolUseId"])
                .unwrap_or_default()
                .to_string(),
            content: decode_entities(&result_content(item)),
            is_error: item
                .get("is_error")
                .and_then(Value::as_bool)
                .unwrap_or(false),
        })
        .collect();

    if fragments.is_empty() {
        vec![ResponseFragment::Unknown { raw: value.clone() }]
    } else {
        fragments
    }
}

/// Tool result content may be a bare string or a list of text items.
fn result_content(item: &Value) -> String {
    match item.get("content") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(parts)) => parts
            .iter()
            .filter_map(|p| p.get("text").and_then(Value::as_str))
            .collect(),
        _ => String::new(),
    }
}

fn error_fragment(value: &Value) -> ResponseFragment {
    let message = str_field(value, &["message", "error"]).unwrap_or("unknown error");
    ResponseFragment::Error {
        message: decode_entities(message),
    }
}

fn status_fragment(value: &Value) -> ResponseFragment {
    ResponseFragment::Status {
        status: str_field(value, &["status"])
            .map(BackendStatus::parse)
            .unwrap_or(BackendStatus::Unknown),
        message: str_field(value, &["message"]).map(|m| decode_entities(m)),
    }
}

fn system_fragment(value: &Value) -> ResponseFragment {
    match str_field(value, &["subtype"]) {
        Some("init") => ResponseFragment::Meta { data: value.clone() },
        subtype => ResponseFragment::Status {
            status: BackendStatus::Unknown,
            message: subtype.map(str::to_string),
        },
    }
}

fn completion_fragment(value: &Value) -> ResponseFragment {
    let usage = value.get("usage").unwrap_or(value);
    let count = |key: &str| {
        usage
            .get(key)
            .and_then(Value::as_u64)
            .or_else(|| value.get(key).and_then(Value::as_u64))
            .unwrap_or(0)
    };
    ResponseFragment::Completion {
        stop_reason: str_field(value, &["stop_reason", "subtype"]).map(str::to_string),
        usage: TokenUsage {
            input_tokens: count("input_tokens"),
            output_tokens: count("output_tokens"),
        },
    }
}
