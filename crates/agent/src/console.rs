//! Line-oriented console shared by the chat prompt and the approval prompt.

use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use plugboard_core::{
    display_argument_value, ApprovalDecision, CapabilityDescriptor, InvocationArguments,
};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, Stdin, Stdout};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::approval::ApprovalService;

pub const APPROVAL_TOKEN: &str = "yes";

/// A single reader and writer pair. Everything that talks to the person at
/// the terminal goes through one instance so buffered input is never split
/// between two readers.
pub struct Console<R, W> {
    reader: Mutex<R>,
    writer: Mutex<W>,
}

pub type StdConsole = Console<BufReader<Stdin>, Stdout>;

impl StdConsole {
    pub fn stdio() -> Self {
        Self::new(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
    }
}

impl<R, W> Console<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self { reader: Mutex::new(reader), writer: Mutex::new(writer) }
    }

    /// Reads one line without its terminator. `None` on end of input.
    pub async fn read_line(&self) -> io::Result<Option<String>> {
        let mut reader = self.reader.lock().await;
        let mut line = String::new();
        if reader.read_line(&mut line).await? == 0 {
            return Ok(None);
        }

        let trimmed_len = line.trim_end_matches(['\n', '\r']).len();
        line.truncate(trimmed_len);
        Ok(Some(line))
    }

    pub async fn write_line(&self, line: &str) -> io::Result<()> {
        self.write_lines(&[line]).await
    }

    /// Writes several lines under one lock so they are never interleaved.
    pub async fn write_lines<S: AsRef<str>>(&self, lines: &[S]) -> io::Result<()> {
        let mut writer = self.writer.lock().await;
        for line in lines {
            writer.write_all(line.as_ref().as_bytes()).await?;
            writer.write_all(b"\n").await?;
        }
        writer.flush().await
    }

    pub async fn into_writer(self) -> W {
        self.writer.into_inner()
    }
}

/// Only the literal token `yes` (trimmed, any case) approves.
pub fn is_approval(input: Option<&str>) -> bool {
    input.map(|line| line.trim().eq_ignore_ascii_case(APPROVAL_TOKEN)).unwrap_or(false)
}

pub fn render_approval_prompt(
    descriptor: &CapabilityDescriptor,
    arguments: &InvocationArguments,
) -> Vec<String> {
    let mut lines = vec![
        "====================".to_string(),
        format!("Function name: {}", descriptor.name),
        format!("Plugin name: {}", descriptor.plugin.as_deref().unwrap_or("N/A")),
    ];

    if arguments.is_empty() {
        lines.push("\nArguments: N/A".to_string());
    } else {
        lines.push("\nArguments:".to_string());
        lines.extend(
            arguments
                .iter()
                .map(|(key, value)| format!("{key}: {}", display_argument_value(value))),
        );
    }

    lines.push("\nApprove invocation? (yes/no)".to_string());
    lines
}

/// Asks the person at the console, once per invocation.
pub struct ConsoleApproval<R, W> {
    console: Arc<Console<R, W>>,
}

impl<R, W> ConsoleApproval<R, W> {
    pub fn new(console: Arc<Console<R, W>>) -> Self {
        Self { console }
    }
}

#[async_trait]
impl<R, W> ApprovalService for ConsoleApproval<R, W>
where
    R: AsyncBufRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    async fn decide(
        &self,
        descriptor: &CapabilityDescriptor,
        arguments: &InvocationArguments,
    ) -> ApprovalDecision {
        let capability = descriptor.qualified_name();
        if let Err(error) =
            self.console.write_lines(&render_approval_prompt(descriptor, arguments)).await
        {
            warn!(
                event_name = "agent.approval.prompt_failed",
                capability = capability.as_str(),
                error = %error,
                "could not render approval prompt; denying invocation"
            );
            return ApprovalDecision::Deny;
        }

        let answer = match self.console.read_line().await {
            Ok(answer) => answer,
            Err(error) => {
                warn!(
                    event_name = "agent.approval.read_failed",
                    capability = capability.as_str(),
                    error = %error,
                    "could not read approval answer; denying invocation"
                );
                None
            }
        };

        let decision = ApprovalDecision::from(is_approval(answer.as_deref()));
        info!(
            event_name = "agent.approval.decided",
            capability = capability.as_str(),
            decision = %decision,
            "approval decided at console"
        );
        decision
    }
}
