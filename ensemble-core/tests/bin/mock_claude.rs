//! Scripted stand-in for the `claude` binary used by integration tests.
//!
//! Speaks the stream-json protocol on stdio: reads user messages as NDJSON
//! lines and replies with a scripted event sequence per turn. Triggers in
//! the message text select behaviors:
//!
//! - `use-tool`: emit a tool_use / tool_result cycle before the reply
//! - `die-now`: exit mid-turn without a result event
//! - anything else: reply with `echo: <text>`; a question about a
//!   favorite color answers from earlier turns, exercising session memory

use serde_json::{json, Value};
use std::io::{BufRead, Write};

fn emit(value: Value) {
    let stdout = std::io::stdout();
    let mut lock = stdout.lock();
    writeln!(lock, "{value}").expect("stdout closed");
    lock.flush().expect("stdout flush");
}

fn assistant_text(text: &str) -> Value {
    json!({
        "type": "assistant",
        "message": {"content": [{"type": "text", "text": text}]}
    })
}

fn result_event(turn: usize) -> Value {
    json!({
        "type": "result",
        "subtype": "success",
        "usage": {"input_tokens": 10 + turn as u64, "output_tokens": 5 + turn as u64}
    })
}

fn extract_text(line: &str) -> Option<String> {
    let value: Value = serde_json::from_str(line).ok()?;
    if value.get("type")?.as_str()? != "user" {
        return None;
    }
    let content = value.pointer("/message/content")?.as_array()?;
    let text: String = content
        .iter()
        .filter_map(|item| item.get("text").and_then(Value::as_str))
        .collect();
    Some(text)
}

fn main() {
    let deltas = std::env::args().any(|a| a == "--include-partial-messages");

    emit(json!({
        "type": "system",
        "subtype": "init",
        "session_id": std::env::args()
            .skip_while(|a| a != "--session-id")
            .nth(1)
            .unwrap_or_default(),
    }));

    let stdin = std::io::stdin();
    let mut history: Vec<String> = Vec::new();
    let mut turn = 0;

    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        let Some(text) = extract_text(&line) else { continue };
        turn += 1;

        if text.contains("die-now") {
            emit(assistant_text("about to go"));
            std::process::exit(1);
        }

        if text.contains("use-tool") {
            emit(json!({
                "type": "assistant",
                "message": {"content": [
                    {"type": "tool_use", "id": format!("tu_{turn}"), "name": "Bash",
                     "input": {"command": "ls"}}
                ]}
            }));
            emit(json!({
                "type": "user",
                "message": {"content": [
                    {"type": "tool_result", "tool_use_id": format!("tu_{turn}"),
                     "content": "pubspec.yaml\nlib\ntest"}
                ]}
            }));
        }

        let reply = if text.to_lowercase().contains("favorite color") {
            if history.iter().any(|h| h.to_lowercase().contains("blue")) {
                "Your favorite color is blue.".to_string()
            } else {
                "I don't know your favorite color.".to_string()
            }
        } else {
            format!("echo: {text}")
        };
        history.push(text);

        if deltas {
            let chars: Vec<char> = reply.chars().collect();
            for chunk in chars.chunks(4) {
                emit(json!({
                    "type": "text",
                    "content": chunk.iter().collect::<String>()
                }));
            }
        } else {
            emit(assistant_text(&reply));
        }
        emit(result_event(turn));
    }
}
