//! The backend adapter: one LLM child process per agent.
//!
//! A [`ClaudeClient`] owns everything one agent needs to talk to the model:
//! the `claude` child process, the agent's MCP server fleet, the reader
//! task that turns the child's NDJSON output into conversation snapshots,
//! and the writer task that feeds queued user messages to the child's
//! stdin.
//!
//! Construction comes in two flavors. [`ClaudeClient::create`] awaits full
//! readiness (fleet started, child spawned). [`ClaudeClient::create_nonblocking`]
//! returns immediately and finishes initialization in the background;
//! messages sent in the meantime are queued and flushed in order once the
//! child is up, which lets a UI attach to a brand-new agent without
//! waiting.

pub mod conversation;
pub mod events;

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{broadcast, mpsc, watch};

use crate::mcp::{McpError, McpFleet};
use crate::types::AgentId;
use conversation::{
    Conversation, ConversationMessage, ConversationState, ResponseFragment, Role, TokenUsage,
};
use events::{parse_event_line, ParsedLine};

/// Errors from backend adapter construction.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("failed to start backend process {binary:?}: {source}")]
    Spawn {
        binary: String,
        source: std::io::Error,
    },

    #[error(transparent)]
    Mcp(#[from] McpError),

    #[error("backend process is missing stdio pipes")]
    MissingPipes,
}

/// Per-agent permission posture passed to the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionMode {
    /// Read-only planning; no edits applied.
    Plan,
    /// Edits are applied without per-edit confirmation.
    AcceptEdits,
}

impl PermissionMode {
    pub fn as_arg(&self) -> &'static str {
        match self {
            PermissionMode::Plan => "plan",
            PermissionMode::AcceptEdits => "acceptEdits",
        }
    }
}

/// Configuration for one backend child process.
#[derive(Debug, Clone)]
pub struct ClaudeConfig {
    /// Executable name, resolved from PATH.
    pub binary: String,
    /// Working directory for the child; the network's worktree when set.
    pub working_dir: PathBuf,
    pub permission_mode: PermissionMode,
    /// When true the child emits incremental text deltas; otherwise whole
    /// messages.
    pub streaming_deltas: bool,
    /// Optional stdio-transport kernel server appended to the MCP config.
    pub kernel_server: Option<(String, Value)>,
    pub extra_args: Vec<String>,
}

impl ClaudeConfig {
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            binary: "claude".to_string(),
            working_dir: working_dir.into(),
            permission_mode: PermissionMode::AcceptEdits,
            streaming_deltas: false,
            kernel_server: None,
            extra_args: Vec::new(),
        }
    }

    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    pub fn with_permission_mode(mut self, mode: PermissionMode) -> Self {
        self.permission_mode = mode;
        self
    }

    pub fn with_streaming_deltas(mut self, enabled: bool) -> Self {
        self.streaming_deltas = enabled;
        self
    }
}

/// Attachment on an outbound user message.
#[derive(Debug, Clone)]
pub enum Attachment {
    FilePath(PathBuf),
    Base64Image { media_type: String, data: String },
    InlineDocument { title: String, content: String },
}

impl Attachment {
    /// Build an image attachment from raw bytes.
    pub fn image_from_bytes(media_type: impl Into<String>, bytes: &[u8]) -> Self {
        use base64::Engine as _;
        Attachment::Base64Image {
            media_type: media_type.into(),
            data: base64::engine::general_purpose::STANDARD.encode(bytes),
        }
    }
}

/// A user message queued for the backend.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub text: String,
    pub attachments: Vec<Attachment>,
}

impl OutboundMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            attachments: Vec::new(),
        }
    }

    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    /// The stream-json line handed to the child's stdin.
    fn wire_json(&self) -> Value {
        let mut content = vec![json!({"type": "text", "text": self.text})];
        for attachment in &self.attachments {
            content.push(match attachment {
                Attachment::FilePath(path) => {
                    json!({"type": "text", "text": format!("[attached file: {}]", path.display())})
                }
                Attachment::Base64Image { media_type, data } => json!({
                    "type": "image",
                    "source": {"type": "base64", "media_type": media_type, "data": data},
                }),
                Attachment::InlineDocument { title, content } => json!({
                    "type": "document",
                    "title": title,
                    "source": {"type": "text", "media_type": "text/plain", "data": content},
                }),
            });
        }
        json!({"type": "user", "message": {"role": "user", "content": content}})
    }
}

/// Signal on the turn channel.
#[derive(Debug, Clone)]
pub enum TurnSignal {
    /// The backend emitted its `result` event; one per turn.
    Completed(TurnCompletion),
    /// The stream is closed for good. Terminal. `cancelled` is true only
    /// for a deliberate [`ClaudeClient::abort`]; an errored close (startup
    /// failure, child death) carries false so subscribers do not treat it
    /// as a completed turn.
    Closed { cancelled: bool },
}

/// Payload of a completed turn.
#[derive(Debug, Clone, Default)]
pub struct TurnCompletion {
    pub stop_reason: Option<String>,
    pub usage: TokenUsage,
}

struct ClientInner {
    agent_id: AgentId,
    streaming_deltas: bool,
    convo: Mutex<Conversation>,
    convo_tx: watch::Sender<Conversation>,
    turn_tx: broadcast::Sender<TurnSignal>,
    child: Mutex<Option<Child>>,
    aborted: AtomicBool,
    fleet: McpFleet,
}

/// Per-agent handle on the backend process and its conversation stream.
pub struct ClaudeClient {
    inner: Arc<ClientInner>,
    outbound_tx: mpsc::UnboundedSender<OutboundMessage>,
}

impl ClaudeClient {
    /// Construct and await full readiness.
    pub async fn create(
        agent_id: AgentId,
        config: ClaudeConfig,
        fleet: McpFleet,
    ) -> Result<Arc<Self>, ClientError> {
        let (client, outbound_rx) = Self::construct(agent_id, config.streaming_deltas, fleet);
        initialize(client.inner.clone(), config, outbound_rx).await?;
        Ok(client)
    }

    /// Construct synchronously; initialization continues in the background.
    ///
    /// Messages sent before the child is ready are queued and flushed in
    /// send order. Startup failure surfaces as an error conversation and a
    /// terminal [`TurnSignal::Closed`].
    pub fn create_nonblocking(
        agent_id: AgentId,
        config: ClaudeConfig,
        fleet: McpFleet,
    ) -> Arc<Self> {
        let (client, outbound_rx) = Self::construct(agent_id, config.streaming_deltas, fleet);
        let inner = client.inner.clone();
        tokio::spawn(async move {
            if let Err(e) = initialize(inner.clone(), config, outbound_rx).await {
                tracing::error!(agent = %inner.agent_id, "backend startup failed: {e}");
                inner.fail(format!("backend startup failed: {e}"));
                let _ = inner.turn_tx.send(TurnSignal::Closed { cancelled: false });
            }
        });
        client
    }

    fn construct(
        agent_id: AgentId,
        streaming_deltas: bool,
        fleet: McpFleet,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<OutboundMessage>) {
        let (convo_tx, _) = watch::channel(Conversation::default());
        let (turn_tx, _) = broadcast::channel(64);
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(ClientInner {
            agent_id,
            streaming_deltas,
            convo: Mutex::new(Conversation::default()),
            convo_tx,
            turn_tx,
            child: Mutex::new(None),
            aborted: AtomicBool::new(false),
            fleet,
        });
        (
            Arc::new(Self { inner, outbound_tx }),
            outbound_rx,
        )
    }

    pub fn agent_id(&self) -> &str {
        &self.inner.agent_id
    }

    /// Enqueue a user message. Non-blocking; ordering is preserved across
    /// the initialization window.
    pub fn send_message(&self, message: OutboundMessage) {
        if self.inner.aborted.load(Ordering::SeqCst) {
            tracing::warn!(agent = %self.inner.agent_id, "send_message after abort, dropping");
            return;
        }
        self.inner.begin_send(&message.text);
        if self.outbound_tx.send(message).is_err() {
            tracing::warn!(agent = %self.inner.agent_id, "outbound queue closed, message dropped");
        }
    }

    /// Live, replay-on-subscribe stream of conversation snapshots. The
    /// receiver always starts with the current snapshot.
    pub fn subscribe(&self) -> watch::Receiver<Conversation> {
        self.inner.convo_tx.subscribe()
    }

    /// The conversation as an async stream of snapshots, for combinator
    /// style consumers.
    pub fn conversation_stream(&self) -> tokio_stream::wrappers::WatchStream<Conversation> {
        tokio_stream::wrappers::WatchStream::new(self.subscribe())
    }

    /// Turn-completion signals. Fires [`TurnSignal::Completed`] exactly
    /// once per turn, and [`TurnSignal::Closed`] when the stream ends.
    pub fn on_turn_complete(&self) -> broadcast::Receiver<TurnSignal> {
        self.inner.turn_tx.subscribe()
    }

    /// Synchronous snapshot accessor.
    pub fn current_conversation(&self) -> Conversation {
        self.inner.convo.lock().clone()
    }

    /// Kill the child, stop the MCP fleet, close the stream. Idempotent.
    pub async fn abort(&self) {
        if self.inner.aborted.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(mut child) = self.inner.child.lock().take() {
            if let Err(e) = child.start_kill() {
                tracing::debug!(agent = %self.inner.agent_id, "kill on abort: {e}");
            }
        }
        self.inner.fleet.shutdown().await;
        let _ = self.inner.turn_tx.send(TurnSignal::Closed { cancelled: true });
        tracing::info!(agent = %self.inner.agent_id, "backend adapter aborted");
    }
}

async fn initialize(
    inner: Arc<ClientInner>,
    config: ClaudeConfig,
    outbound_rx: mpsc::UnboundedReceiver<OutboundMessage>,
) -> Result<(), ClientError> {
    if inner.aborted.load(Ordering::SeqCst) {
        return Ok(());
    }
    inner.fleet.start_all().await?;
    if inner.aborted.load(Ordering::SeqCst) {
        inner.fleet.shutdown().await;
        return Ok(());
    }
    let mcp_config = inner
        .fleet
        .config_json(
            config
                .kernel_server
                .as_ref()
                .map(|(name, entry)| (name.as_str(), entry.clone())),
        )
        .await?;

    let mut command = Command::new(&config.binary);
    command
        .arg("--print")
        .arg("--input-format")
        .arg("stream-json")
        .arg("--output-format")
        .arg("stream-json")
        .arg("--verbose")
        .arg("--session-id")
        .arg(&inner.agent_id)
        .arg("--permission-mode")
        .arg(config.permission_mode.as_arg())
        .arg("--mcp-config")
        .arg(&mcp_config)
        .args(&config.extra_args)
        .current_dir(&config.working_dir)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true);
    if config.streaming_deltas {
        command.arg("--include-partial-messages");
    }

    let mut child = command.spawn().map_err(|source| ClientError::Spawn {
        binary: config.binary.clone(),
        source,
    })?;

    let stdin = child.stdin.take().ok_or(ClientError::MissingPipes)?;
    let stdout = child.stdout.take().ok_or(ClientError::MissingPipes)?;
    if inner.aborted.load(Ordering::SeqCst) {
        // Abort raced with startup: tear down what just came up.
        let _ = child.start_kill();
        inner.fleet.shutdown().await;
        return Ok(());
    }
    *inner.child.lock() = Some(child);

    tokio::spawn(writer_task(stdin, outbound_rx, inner.agent_id.clone()));
    tokio::spawn(reader_task(stdout, inner.clone()));
    tracing::info!(agent = %inner.agent_id, binary = %config.binary, "backend process started");
    Ok(())
}

async fn writer_task(
    mut stdin: ChildStdin,
    mut outbound_rx: mpsc::UnboundedReceiver<OutboundMessage>,
    agent_id: AgentId,
) {
    while let Some(message) = outbound_rx.recv().await {
        let mut line = message.wire_json().to_string();
        line.push('\n');
        if stdin.write_all(line.as_bytes()).await.is_err() {
            tracing::warn!(agent = %agent_id, "backend stdin closed, dropping queued messages");
            break;
        }
        let _ = stdin.flush().await;
    }
}

async fn reader_task(stdout: tokio::process::ChildStdout, inner: Arc<ClientInner>) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                inner.apply_line(line);
            }
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(agent = %inner.agent_id, "backend stdout read error: {e}");
                break;
            }
        }
    }

    if !inner.aborted.load(Ordering::SeqCst) {
        let mid_turn = {
            let convo = inner.convo.lock();
            matches!(
                convo.state,
                ConversationState::SendingMessage
                    | ConversationState::ReceivingResponse
                    | ConversationState::Processing
            )
        };
        if mid_turn {
            tracing::error!(agent = %inner.agent_id, "backend process exited mid-turn");
            inner.fail("backend process exited unexpectedly".to_string());
        }
        inner.fleet.shutdown().await;
        let _ = inner.turn_tx.send(TurnSignal::Closed { cancelled: false });
    }
}

impl ClientInner {
    /// Record an outbound user message and move to sendingMessage.
    ///
    /// A fresh send clears any prior error: the conversation is usable
    /// again once the user continues.
    fn begin_send(&self, text: &str) {
        let mut convo = self.convo.lock();
        convo.current_error = None;
        convo.state = ConversationState::SendingMessage;
        convo.messages.push(ConversationMessage::user(text));
        self.publish(&convo);
    }

    /// Fold one backend line into the conversation.
    fn apply_line(&self, line: &str) {
        let parsed = parse_event_line(line);
        self.apply_parsed(parsed);
    }

    fn apply_parsed(&self, parsed: ParsedLine) {
        let mut completion: Option<TurnCompletion> = None;
        {
            let mut convo = self.convo.lock();
            if convo.state == ConversationState::SendingMessage {
                convo.state = ConversationState::ReceivingResponse;
            }

            for fragment in parsed.fragments {
                self.apply_fragment(&mut convo, fragment);
            }

            if parsed.turn_complete {
                completion = Some(self.finish_turn(&mut convo));
            }
            self.publish(&convo);
        }

        if let Some(completion) = completion {
            let _ = self.turn_tx.send(TurnSignal::Completed(completion));
        }
    }

    fn apply_fragment(&self, convo: &mut Conversation, fragment: ResponseFragment) {
        match fragment {
            ResponseFragment::Text {
                ref content,
                is_partial,
                ..
            } => {
                let extend = is_partial
                    && self.streaming_deltas
                    && matches!(
                        convo.last_message(),
                        Some(m) if m.role == Role::Assistant && m.is_streaming
                    );
                if extend {
                    let last = convo.messages.last_mut().expect("checked above");
                    last.push_fragment(fragment);
                } else if !content.is_empty() {
                    let mut message = ConversationMessage::assistant_streaming();
                    message.push_fragment(fragment);
                    convo.messages.push(message);
                }
            }
            ResponseFragment::ToolUse { .. } => {
                let mut message = ConversationMessage::assistant_streaming();
                message.push_fragment(fragment);
                convo.messages.push(message);
                convo.state = ConversationState::Processing;
            }
            ResponseFragment::ToolResult {
                tool_use_id,
                content,
                is_error,
            } => {
                convo
                    .messages
                    .push(ConversationMessage::tool_result(tool_use_id, content, is_error));
            }
            ResponseFragment::Error { ref message } => {
                convo.current_error = Some(message.clone());
                convo.state = ConversationState::Error;
                self.push_to_streaming_tail(convo, fragment);
            }
            ResponseFragment::Completion { .. } => {
                self.push_completion(convo, fragment);
            }
            ResponseFragment::Status { .. }
            | ResponseFragment::Meta { .. }
            | ResponseFragment::Unknown { .. } => {
                self.push_to_streaming_tail(convo, fragment);
            }
        }
    }

    /// Append to the streaming assistant tail, creating one if needed.
    fn push_to_streaming_tail(&self, convo: &mut Conversation, fragment: ResponseFragment) {
        let has_tail = matches!(
            convo.last_message(),
            Some(m) if m.role == Role::Assistant && m.is_streaming
        );
        if !has_tail {
            convo.messages.push(ConversationMessage::assistant_streaming());
        }
        convo
            .messages
            .last_mut()
            .expect("tail ensured")
            .push_fragment(fragment);
    }

    /// Attach a completion to the current turn's streaming assistant
    /// message, never to a message from an earlier, already-closed turn.
    fn push_completion(&self, convo: &mut Conversation, fragment: ResponseFragment) {
        if let Some(message) = convo
            .messages
            .iter_mut()
            .rev()
            .find(|m| m.role == Role::Assistant && m.is_streaming)
        {
            message.push_fragment(fragment);
        } else {
            self.push_to_streaming_tail(convo, fragment);
        }
    }

    fn finish_turn(&self, convo: &mut Conversation) -> TurnCompletion {
        let mut completion = TurnCompletion::default();

        // Usage comes from this turn only: a message still streaming is by
        // construction part of the turn being closed.
        let closing = convo
            .messages
            .iter()
            .rev()
            .filter(|m| m.role == Role::Assistant && m.is_streaming)
            .find_map(|m| {
                m.token_usage.map(|usage| {
                    let stop_reason = m.responses.iter().find_map(|f| match f {
                        ResponseFragment::Completion { stop_reason, .. } => stop_reason.clone(),
                        _ => None,
                    });
                    (usage, stop_reason)
                })
            });
        if let Some((usage, stop_reason)) = closing {
            completion.usage = usage;
            completion.stop_reason = stop_reason;
            convo.account(usage);
        }

        for message in convo.messages.iter_mut() {
            if message.is_streaming {
                message.complete();
            }
        }
        if convo.state != ConversationState::Error {
            convo.state = ConversationState::Idle;
        }
        completion
    }

    fn fail(&self, message: String) {
        let mut convo = self.convo.lock();
        convo.current_error = Some(message.clone());
        convo.state = ConversationState::Error;
        self.push_to_streaming_tail(&mut convo, ResponseFragment::Error { message });
        self.publish(&convo);
    }

    fn publish(&self, convo: &Conversation) {
        self.convo_tx.send_replace(convo.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_inner(streaming_deltas: bool) -> Arc<ClientInner> {
        let (convo_tx, _) = watch::channel(Conversation::default());
        let (turn_tx, _) = broadcast::channel(16);
        Arc::new(ClientInner {
            agent_id: "agent-1".to_string(),
            streaming_deltas,
            convo: Mutex::new(Conversation::default()),
            convo_tx,
            turn_tx,
            child: Mutex::new(None),
            aborted: AtomicBool::new(false),
            fleet: McpFleet::empty(),
        })
    }

    fn assistant_text_line(text: &str) -> String {
        json!({
            "type": "assistant",
            "message": {"content": [{"type": "text", "text": text}]}
        })
        .to_string()
    }

    #[test]
    fn test_state_machine_single_turn() {
        let inner = test_inner(false);
        inner.begin_send("hello");
        assert_eq!(
            inner.convo.lock().state,
            ConversationState::SendingMessage
        );

        inner.apply_line(&assistant_text_line("hi there"));
        assert_eq!(
            inner.convo.lock().state,
            ConversationState::ReceivingResponse
        );

        inner.apply_line(r#"{"type":"result","subtype":"success","usage":{"input_tokens":3,"output_tokens":4}}"#);
        let convo = inner.convo.lock();
        assert_eq!(convo.state, ConversationState::Idle);
        assert_eq!(convo.total_input_tokens, 3);
        assert_eq!(convo.total_output_tokens, 4);
        let last = convo.last_message().unwrap();
        assert!(last.is_complete && !last.is_streaming);
    }

    #[test]
    fn test_turn_complete_fires_once_per_result() {
        let inner = test_inner(false);
        let mut turn_rx = inner.turn_tx.subscribe();

        inner.begin_send("hello");
        inner.apply_line(&assistant_text_line("hi"));
        inner.apply_line(r#"{"type":"result","usage":{"input_tokens":1,"output_tokens":1}}"#);

        assert!(matches!(
            turn_rx.try_recv().unwrap(),
            TurnSignal::Completed(_)
        ));
        assert!(turn_rx.try_recv().is_err());
    }

    #[test]
    fn test_tool_cycle_states_and_messages() {
        let inner = test_inner(false);
        inner.begin_send("list files");

        inner.apply_line(
            &json!({
                "type": "assistant",
                "message": {"content": [
                    {"type": "tool_use", "id": "tu_1", "name": "Bash", "input": {"command": "ls"}}
                ]}
            })
            .to_string(),
        );
        assert_eq!(inner.convo.lock().state, ConversationState::Processing);

        inner.apply_line(
            &json!({
                "type": "user",
                "message": {"content": [
                    {"type": "tool_result", "tool_use_id": "tu_1", "content": "a.txt"}
                ]}
            })
            .to_string(),
        );
        inner.apply_line(&assistant_text_line("one file"));
        inner.apply_line(r#"{"type":"result","usage":{"input_tokens":1,"output_tokens":1}}"#);

        let convo = inner.convo.lock();
        // user prompt, tool_use, tool_result, text
        assert_eq!(convo.messages.len(), 4);
        let invocations = convo.tool_invocations();
        assert_eq!(invocations.len(), 1);
        assert!(invocations[0].has_result());
        assert_eq!(convo.state, ConversationState::Idle);
    }

    #[test]
    fn test_streaming_deltas_grow_last_message() {
        let inner = test_inner(true);
        inner.begin_send("count");

        inner.apply_line(r#"{"type":"text","content":"1"}"#);
        inner.apply_line(r#"{"type":"text","content":"2"}"#);
        inner.apply_line(r#"{"type":"text","content":"3"}"#);

        let convo = inner.convo.lock();
        // One user message plus a single growing assistant message.
        assert_eq!(convo.messages.len(), 2);
        assert_eq!(convo.last_message().unwrap().content, "123");
        assert!(convo.last_message().unwrap().is_streaming);
    }

    #[test]
    fn test_whole_message_mode_appends_messages() {
        let inner = test_inner(false);
        inner.begin_send("hi");
        inner.apply_line(&assistant_text_line("first"));
        inner.apply_line(&assistant_text_line("second"));

        let convo = inner.convo.lock();
        assert_eq!(convo.messages.len(), 3);
        assert_eq!(convo.messages[1].content, "first");
        assert_eq!(convo.messages[2].content, "second");
    }

    #[test]
    fn test_error_event_sets_error_state() {
        let inner = test_inner(false);
        inner.begin_send("hi");
        inner.apply_line(r#"{"type":"error","message":"model unavailable"}"#);

        let convo = inner.convo.lock();
        assert_eq!(convo.state, ConversationState::Error);
        assert_eq!(convo.current_error.as_deref(), Some("model unavailable"));
    }

    #[test]
    fn test_new_send_clears_prior_error() {
        let inner = test_inner(false);
        inner.begin_send("hi");
        inner.apply_line(r#"{"type":"error","message":"boom"}"#);
        assert!(inner.convo.lock().current_error.is_some());

        inner.begin_send("try again");
        let convo = inner.convo.lock();
        assert!(convo.current_error.is_none());
        assert_eq!(convo.state, ConversationState::SendingMessage);
    }

    #[test]
    fn test_parse_error_line_keeps_stream_alive() {
        let inner = test_inner(false);
        inner.begin_send("hi");
        inner.apply_line("}{ definitely not json");
        inner.apply_line(&assistant_text_line("still here"));
        inner.apply_line(r#"{"type":"result","usage":{"input_tokens":1,"output_tokens":1}}"#);

        let convo = inner.convo.lock();
        assert_eq!(convo.state, ConversationState::Idle);
        assert!(convo
            .messages
            .iter()
            .flat_map(|m| m.responses.iter())
            .any(|f| matches!(f, ResponseFragment::Unknown { .. })));
    }

    #[test]
    fn test_queued_sends_preserve_order() {
        let inner = test_inner(false);
        inner.begin_send("first");
        inner.begin_send("second");
        inner.begin_send("third");

        let convo = inner.convo.lock();
        let contents: Vec<_> = convo.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, ["first", "second", "third"]);
    }

    #[test]
    fn test_wire_json_shape() {
        let msg = OutboundMessage::text("hello").with_attachment(Attachment::Base64Image {
            media_type: "image/png".to_string(),
            data: "aGk=".to_string(),
        });
        let wire = msg.wire_json();
        assert_eq!(wire["type"], "user");
        assert_eq!(wire["message"]["content"][0]["text"], "hello");
        assert_eq!(wire["message"]["content"][1]["type"], "image");
        assert_eq!(
            wire["message"]["content"][1]["source"]["media_type"],
            "image/png"
        );
    }

    #[test]
    fn test_permission_mode_args() {
        assert_eq!(PermissionMode::Plan.as_arg(), "plan");
        assert_eq!(PermissionMode::AcceptEdits.as_arg(), "acceptEdits");
    }

    #[test]
    fn test_image_from_bytes_encodes_base64() {
        let attachment = Attachment::image_from_bytes("image/png", b"hi");
        match attachment {
            Attachment::Base64Image { media_type, data } => {
                assert_eq!(media_type, "image/png");
                assert_eq!(data, "aGk=");
            }
            other => panic!("unexpected attachment: {other:?}"),
        }
    }
}
