//! Work producer backed by the `claude` CLI in stream-json mode.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdout, Command};

use super::{GenerateRequest, OutputStream, ProducerOutput, WorkProducer};
use crate::errors::ProducerError;
use crate::signals::SignalParser;
use crate::stream::{ContentBlock, StreamEvent, describe_tool_use, parse_line};

#[derive(Debug, Clone)]
pub struct ClaudeSettings {
    pub claude_cmd: String,
    pub skip_permissions: bool,
    pub extra_flags: Vec<String>,
    pub working_dir: Option<PathBuf>,
}

impl Default for ClaudeSettings {
    fn default() -> Self {
        Self {
            claude_cmd: "claude".to_string(),
            skip_permissions: true,
            extra_flags: Vec::new(),
            working_dir: None,
        }
    }
}

impl ClaudeSettings {
    pub fn flags(&self) -> Vec<String> {
        let mut flags = vec![
            "--print".to_string(),
            "--output-format".to_string(),
            "stream-json".to_string(),
            "--verbose".to_string(),
        ];
        if self.skip_permissions {
            flags.push("--dangerously-skip-permissions".to_string());
        }
        flags.extend(self.extra_flags.iter().cloned());
        flags
    }
}

pub struct ClaudeProducer {
    settings: ClaudeSettings,
}

impl ClaudeProducer {
    pub fn new(settings: ClaudeSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl WorkProducer for ClaudeProducer {
    async fn generate(&self, request: GenerateRequest) -> Result<OutputStream, ProducerError> {
        let mut cmd = Command::new(&self.settings.claude_cmd);
        cmd.args(self.settings.flags())
            .arg("--append-system-prompt")
            .arg(&request.system)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        if let Some(dir) = &self.settings.working_dir {
            cmd.current_dir(dir);
        }

        tracing::debug!(
            cmd = %self.settings.claude_cmd,
            phase = %request.phase,
            prompt_chars = request.prompt.len(),
            "spawning producer"
        );
        let mut child = cmd.spawn().map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
                ProducerError::Permanent(format!(
                    "cannot run {}: {}",
                    self.settings.claude_cmd, e
                ))
            }
            _ => ProducerError::Transient(format!("failed to spawn producer: {}", e)),
        })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(request.prompt.as_bytes())
                .await
                .map_err(|e| ProducerError::Transient(format!("failed to write prompt: {}", e)))?;
            stdin
                .shutdown()
                .await
                .map_err(|e| ProducerError::Transient(format!("failed to close stdin: {}", e)))?;
        }

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ProducerError::Transient("producer stdout unavailable".to_string()))?;

        let state = ClaudeStream {
            lines: BufReader::new(stdout).lines(),
            child,
            queue: VecDeque::new(),
            parser: SignalParser::new(true),
            failed: false,
            done: false,
        };

        let stream = futures::stream::unfold(state, |mut st| async move {
            loop {
                if let Some(item) = st.queue.pop_front() {
                    return Some((item, st));
                }
                if st.done {
                    return None;
                }
                match st.lines.next_line().await {
                    Ok(Some(line)) => st.ingest(&line),
                    Ok(None) => st.finish().await,
                    Err(e) => {
                        st.done = true;
                        st.queue.push_back(Err(ProducerError::Transient(format!(
                            "failed to read producer output: {}",
                            e
                        ))));
                    }
                }
            }
        });
        Ok(Box::pin(stream))
    }

    fn name(&self) -> &str {
        "claude"
    }
}

struct ClaudeStream {
    lines: Lines<BufReader<ChildStdout>>,
    child: Child,
    queue: VecDeque<Result<ProducerOutput, ProducerError>>,
    parser: SignalParser,
    failed: bool,
    done: bool,
}

impl ClaudeStream {
    fn ingest(&mut self, line: &str) {
        let items = decode_line(&self.parser, line);
        if items.iter().any(Result::is_err) {
            self.failed = true;
            self.done = true;
        }
        self.queue.extend(items);
    }

    async fn finish(&mut self) {
        self.done = true;
        if self.failed {
            return;
        }
        match self.child.wait().await {
            Ok(status) if status.success() => {}
            Ok(status) => self.queue.push_back(Err(ProducerError::Transient(format!(
                "producer exited with code {}",
                status.code().unwrap_or(-1)
            )))),
            Err(e) => self.queue.push_back(Err(ProducerError::Transient(format!(
                "failed to wait for producer: {}",
                e
            )))),
        }
    }
}

/// Converts one stream-json line into producer outputs. An error result
/// from the CLI becomes a transient failure.
fn decode_line(parser: &SignalParser, line: &str) -> Vec<Result<ProducerOutput, ProducerError>> {
    let mut out = Vec::new();
    let Some(event) = parse_line(line) else {
        return out;
    };
    match event {
        StreamEvent::Assistant { message, .. } => {
            for block in message.content {
                match block {
                    ContentBlock::Text { text } => {
                        let signals = parser.parse(&text);
                        if !signals.narrative.is_empty() {
                            out.push(Ok(ProducerOutput::Progress(signals.narrative)));
                        }
                        out.extend(
                            signals
                                .artifacts
                                .into_iter()
                                .map(|a| Ok(ProducerOutput::Artifact(a))),
                        );
                        out.extend(
                            signals
                                .milestones
                                .into_iter()
                                .map(|m| Ok(ProducerOutput::Milestone(m))),
                        );
                        out.extend(
                            signals
                                .flags
                                .into_iter()
                                .map(|f| Ok(ProducerOutput::Flag(f))),
                        );
                    }
                    ContentBlock::ToolUse { name, input, .. } => {
                        out.push(Ok(ProducerOutput::Progress(describe_tool_use(
                            &name, &input,
                        ))));
                    }
                    ContentBlock::Other => {}
                }
            }
        }
        StreamEvent::Result {
            is_error: true,
            result,
            subtype,
        } => out.push(Err(ProducerError::Transient(result.unwrap_or(subtype)))),
        StreamEvent::Result { .. } | StreamEvent::User {} | StreamEvent::System { .. } => {}
    }
    out
}
