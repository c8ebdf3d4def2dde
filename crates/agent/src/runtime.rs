use std::io;
use std::sync::Arc;

use plugboard_core::{CapabilityError, InvocationArguments, InvocationOutcome};
use serde_json::Value;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncWrite};
use tracing::{info, info_span, warn, Instrument};

use crate::console::Console;
use crate::conversation::{ChatMessage, Conversation, ToolCall};
use crate::interceptor::InvocationPipeline;
use crate::llm::{ChatRequest, ChatResponse, LlmClient, LlmError, ToolDefinition};

/// Upper bound on model round trips in one turn. A model that keeps proposing
/// calls past this point has its turn ended.
pub const MAX_ROUNDS_PER_TURN: usize = 128;

pub const CLEARED_MESSAGE: &str = "Conversation context has been cleared.";

pub const ROUND_LIMIT_NOTICE: &str =
    "Turn ended: the assistant kept requesting function calls without replying.";

#[derive(Debug, Error)]
pub enum TurnError {
    #[error(transparent)]
    Llm(#[from] LlmError),
    #[error("console i/o failed: {0}")]
    Console(#[from] io::Error),
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TurnSummary {
    pub rounds: usize,
    pub executed: usize,
    pub rejected: usize,
    pub failed: usize,
    pub reply: Option<String>,
}

pub struct AgentRuntime {
    name: String,
    llm: Arc<dyn LlmClient>,
    pipeline: Arc<InvocationPipeline>,
    tools: Vec<ToolDefinition>,
    temperature: Option<f32>,
}

impl AgentRuntime {
    pub fn new(
        name: impl Into<String>,
        llm: Arc<dyn LlmClient>,
        pipeline: Arc<InvocationPipeline>,
    ) -> Self {
        let tools = pipeline
            .registry()
            .descriptors()
            .map(|descriptor| ToolDefinition::from_descriptor(descriptor))
            .collect();
        Self { name: name.into(), llm, pipeline, tools, temperature: None }
    }

    pub fn with_temperature(mut self, temperature: Option<f32>) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tools(&self) -> &[ToolDefinition] {
        &self.tools
    }

    /// Runs one user turn to completion. On failure the conversation is
    /// restored to where it was before `input` was added.
    pub async fn run_turn<R, W>(
        &self,
        conversation: &mut Conversation,
        input: &str,
        console: &Console<R, W>,
    ) -> Result<TurnSummary, TurnError>
    where
        R: AsyncBufRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send,
    {
        let span = info_span!("agent.turn", correlation_id = %conversation.id());
        let checkpoint = conversation.checkpoint();

        let result = self.drive_turn(conversation, input, console).instrument(span.clone()).await;
        span.in_scope(|| match &result {
            Ok(summary) => info!(
                event_name = "agent.turn.completed",
                rounds = summary.rounds,
                executed = summary.executed,
                rejected = summary.rejected,
                failed = summary.failed,
                "turn completed"
            ),
            Err(error) => warn!(
                event_name = "agent.turn.failed",
                error = %error,
                "turn abandoned; history rolled back"
            ),
        });

        if result.is_err() {
            conversation.rollback(checkpoint);
        }
        result
    }

    async fn drive_turn<R, W>(
        &self,
        conversation: &mut Conversation,
        input: &str,
        console: &Console<R, W>,
    ) -> Result<TurnSummary, TurnError>
    where
        R: AsyncBufRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send,
    {
        conversation.push_user(input);
        info!(event_name = "agent.turn.started", tools = self.tools.len(), "turn started");

        let mut summary = TurnSummary::default();
        while summary.rounds < MAX_ROUNDS_PER_TURN {
            let request = ChatRequest {
                messages: conversation.request_messages(),
                tools: self.tools.clone(),
                temperature: self.temperature,
            };
            let response = self.llm.complete(request).await?;
            summary.rounds += 1;

            console.write_lines(&render_response(&self.name, &response)).await?;

            let message = response.message;
            if !message.has_tool_calls() {
                summary.reply = message.content.clone();
                conversation.push_assistant(message);
                return Ok(summary);
            }

            let calls = message.tool_calls.clone();
            conversation.push_assistant(message);
            for call in &calls {
                let result = self.dispatch(call).await;
                match &result {
                    Ok(InvocationOutcome::Executed(_)) => summary.executed += 1,
                    Ok(InvocationOutcome::Rejected(_)) => summary.rejected += 1,
                    Err(_) => summary.failed += 1,
                }

                let text = match result {
                    Ok(outcome) => outcome.to_result_text(),
                    Err(error) => error.to_result_text(),
                };
                console
                    .write_line(&format!(
                        " Function result content: [FunctionResult] {} - {text}",
                        call.id
                    ))
                    .await?;
                conversation.push_tool_result(call.id.clone(), text);
            }
        }

        warn!(
            event_name = "agent.turn.round_limit",
            rounds = summary.rounds,
            "model kept proposing calls; ending turn"
        );
        console.write_line(ROUND_LIMIT_NOTICE).await?;
        Ok(summary)
    }

    async fn dispatch(&self, call: &ToolCall) -> Result<InvocationOutcome, CapabilityError> {
        let arguments = parse_arguments(call)?;
        self.pipeline.invoke_qualified(&call.name, arguments, Some(&call.id)).await
    }
}

/// The model sends arguments as JSON text. Empty text means no arguments.
pub fn parse_arguments(call: &ToolCall) -> Result<InvocationArguments, CapabilityError> {
    let raw = call.arguments.trim();
    if raw.is_empty() {
        return Ok(InvocationArguments::new());
    }

    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(arguments)) => Ok(arguments),
        Ok(Value::Null) => Ok(InvocationArguments::new()),
        Ok(_) => Err(CapabilityError::InvalidArguments {
            name: call.name.clone(),
            reason: "arguments must be a JSON object".to_string(),
        }),
        Err(error) => Err(CapabilityError::InvalidArguments {
            name: call.name.clone(),
            reason: format!("arguments are not valid JSON: {error}"),
        }),
    }
}

pub fn render_response(agent_name: &str, response: &ChatResponse) -> Vec<String> {
    let message: &ChatMessage = &response.message;
    let content = message.content.as_deref().filter(|text| !text.trim().is_empty()).unwrap_or("");

    let mut lines = vec![format!("\n# {} - {agent_name}: {content}", message.role.as_str())];
    lines.extend(
        message
            .tool_calls
            .iter()
            .map(|call| format!(" Function call content: [FunctionCall] {} {}", call.id, call.name)),
    );
    if let Some(usage) = response.usage {
        lines.push(format!(
            "  [Usage] Tokens: {}, Input: {}, Output: {}",
            usage.total_tokens, usage.prompt_tokens, usage.completion_tokens
        ));
    }
    lines.push(format!("Function calls: {}", message.has_tool_calls()));
    lines
}

/// Console line for a turn the model endpoint could not complete.
pub fn render_llm_error(error: &LlmError) -> String {
    format!("Error invoking chat completion: {} ({error})", error.user_message())
}

pub fn is_reset_command(input: &str, reset_command: &str) -> bool {
    input.trim().eq_ignore_ascii_case(reset_command.trim())
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SessionSummary {
    pub turns: usize,
    pub failed_turns: usize,
    pub resets: usize,
}

/// The interactive loop: one line in, one turn out, until end of input.
pub struct AgentSession<R, W> {
    runtime: AgentRuntime,
    console: Arc<Console<R, W>>,
    conversation: Conversation,
    reset_command: String,
}

impl<R, W> AgentSession<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(
        runtime: AgentRuntime,
        console: Arc<Console<R, W>>,
        instructions: impl Into<String>,
        reset_command: impl Into<String>,
    ) -> Self {
        Self {
            runtime,
            console,
            conversation: Conversation::new(instructions),
            reset_command: reset_command.into(),
        }
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub async fn run(&mut self) -> io::Result<SessionSummary> {
        let mut summary = SessionSummary::default();
        info!(
            event_name = "agent.session.started",
            correlation_id = %self.conversation.id(),
            agent = self.runtime.name(),
            "chat session started"
        );

        loop {
            self.console.write_line("User input:").await?;
            let Some(line) = self.console.read_line().await? else {
                break;
            };

            if is_reset_command(&line, &self.reset_command) {
                let previous = self.conversation.id();
                self.conversation.reset();
                summary.resets += 1;
                info!(
                    event_name = "agent.session.reset",
                    previous_correlation_id = %previous,
                    correlation_id = %self.conversation.id(),
                    "conversation context cleared"
                );
                self.console.write_line(CLEARED_MESSAGE).await?;
                continue;
            }

            if line.trim().is_empty() {
                continue;
            }

            match self.runtime.run_turn(&mut self.conversation, &line, &self.console).await {
                Ok(_) => summary.turns += 1,
                Err(TurnError::Llm(error)) => {
                    summary.failed_turns += 1;
                    self.console
                        .write_line(&render_llm_error(&error))
                        .await?;
                }
                Err(TurnError::Console(error)) => return Err(error),
            }
        }

        info!(
            event_name = "agent.session.ended",
            correlation_id = %self.conversation.id(),
            turns = summary.turns,
            failed_turns = summary.failed_turns,
            "end of input; chat session ended"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use plugboard_core::{
        CapabilityDescriptor, InvocationArguments, ParameterKind, ParameterSpec, UpstreamError,
    };
    use serde_json::{json, Value};

    use super::{
        is_reset_command, parse_arguments, render_llm_error, render_response, AgentRuntime, AgentSession,
        TurnError, MAX_ROUNDS_PER_TURN, ROUND_LIMIT_NOTICE,
    };
    use crate::approval::StaticApproval;
    use crate::console::{Console, ConsoleApproval};
    use crate::conversation::{ChatMessage, Conversation, Role, ToolCall};
    use crate::interceptor::{ApprovalFilter, InvocationPipeline, TracingFilter};
    use crate::llm::{ChatRequest, ChatResponse, LlmClient, LlmError, TokenUsage};
    use crate::tools::CapabilityRegistry;

    type TestConsole = Console<Cursor<Vec<u8>>, Vec<u8>>;

    /// Replays canned responses and records every request it receives.
    struct ScriptedLlm {
        responses: Mutex<VecDeque<Result<ChatResponse, LlmError>>>,
        requests: Mutex<Vec<ChatRequest>>,
    }

    impl ScriptedLlm {
        fn new(responses: Vec<Result<ChatResponse, LlmError>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn requests(&self) -> Vec<ChatRequest> {
            self.requests.lock().map(|requests| requests.clone()).unwrap_or_default()
        }
    }

    #[async_trait]
    impl LlmClient for ScriptedLlm {
        async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, LlmError> {
            if let Ok(mut requests) = self.requests.lock() {
                requests.push(request);
            }
            self.responses
                .lock()
                .ok()
                .and_then(|mut responses| responses.pop_front())
                .unwrap_or_else(|| Ok(reply("script exhausted")))
        }
    }

    fn reply(content: &str) -> ChatResponse {
        ChatResponse { message: ChatMessage::assistant(content), usage: None }
    }

    fn calls(calls: &[(&str, &str, &str)]) -> ChatResponse {
        ChatResponse {
            message: ChatMessage::assistant_with_calls(
                None,
                calls
                    .iter()
                    .map(|(id, name, arguments)| ToolCall {
                        id: id.to_string(),
                        name: name.to_string(),
                        arguments: arguments.to_string(),
                    })
                    .collect(),
            ),
            usage: Some(TokenUsage { prompt_tokens: 40, completion_tokens: 10, total_tokens: 50 }),
        }
    }

    fn upstream_failure() -> LlmError {
        UpstreamError::Status {
            service: "llm".to_string(),
            status: 503,
            message: "model overloaded".to_string(),
        }
    }

    fn console(input: &str) -> Arc<TestConsole> {
        Arc::new(Console::new(Cursor::new(input.as_bytes().to_vec()), Vec::new()))
    }

    async fn output(console: Arc<TestConsole>) -> String {
        match Arc::try_unwrap(console) {
            Ok(console) => String::from_utf8_lossy(&console.into_writer().await).into_owned(),
            Err(_) => String::new(),
        }
    }

    fn math_registry(counter: Arc<AtomicUsize>) -> CapabilityRegistry {
        let mut registry = CapabilityRegistry::new();
        let descriptor = CapabilityDescriptor::new("add", "Adds two integers")
            .in_plugin("math")
            .with_parameter(ParameterSpec::required("a", ParameterKind::Integer))
            .with_parameter(ParameterSpec::required("b", ParameterKind::Integer));
        let registered = registry.register(descriptor, move |arguments: InvocationArguments| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                let a = arguments.get("a").and_then(Value::as_i64).unwrap_or_default();
                let b = arguments.get("b").and_then(Value::as_i64).unwrap_or_default();
                anyhow::Ok(json!(a + b))
            }
        });
        assert!(registered.is_ok());
        registry
    }

    fn runtime_with(
        llm: Arc<ScriptedLlm>,
        registry: CapabilityRegistry,
        approval: ApprovalFilter,
    ) -> AgentRuntime {
        let pipeline = InvocationPipeline::builder(registry).filter(TracingFilter).filter(approval).build();
        AgentRuntime::new("Main-Assistant", llm, Arc::new(pipeline))
    }

    #[tokio::test]
    async fn approved_call_feeds_result_back_to_the_model() {
        let counter = Arc::new(AtomicUsize::new(0));
        let llm = ScriptedLlm::new(vec![
            Ok(calls(&[("call_1", "math-add", r#"{"a":2,"b":3}"#)])),
            Ok(reply("2 + 3 = 5")),
        ]);
        let runtime = runtime_with(
            llm.clone(),
            math_registry(counter.clone()),
            ApprovalFilter::new(Arc::new(StaticApproval::always_allow())),
        );
        let console = console("");
        let mut conversation = Conversation::new("be brief");

        let summary = runtime.run_turn(&mut conversation, "add 2 and 3", &console).await;
        assert!(summary.is_ok());
        let Ok(summary) = summary else { return };
        assert_eq!(summary.rounds, 2);
        assert_eq!(summary.executed, 1);
        assert_eq!(summary.reply.as_deref(), Some("2 + 3 = 5"));
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        let requests = llm.requests();
        assert_eq!(requests[0].tools.len(), 1);
        assert_eq!(requests[0].tools[0].name, "math-add");
        let tool_message = requests[1].messages.last().cloned();
        assert_eq!(tool_message, Some(ChatMessage::tool_result("call_1", "5")));
        assert_eq!(conversation.len(), 4);

        assert_eq!(
            output(console).await,
            "\n# assistant - Main-Assistant: \n\
             \x20Function call content: [FunctionCall] call_1 math-add\n\
             \x20 [Usage] Tokens: 50, Input: 40, Output: 10\n\
             Function calls: true\n\
             \x20Function result content: [FunctionResult] call_1 - 5\n\
             \n# assistant - Main-Assistant: 2 + 3 = 5\n\
             Function calls: false\n"
        );
    }

    #[tokio::test]
    async fn denied_call_reports_rejection_and_never_executes() {
        let counter = Arc::new(AtomicUsize::new(0));
        let llm = ScriptedLlm::new(vec![
            Ok(calls(&[("call_1", "math-add", r#"{"a":2,"b":3}"#)])),
            Ok(reply("The operation was rejected.")),
        ]);
        let console = console("n\n");
        let runtime = runtime_with(
            llm.clone(),
            math_registry(counter.clone()),
            ApprovalFilter::new(Arc::new(ConsoleApproval::new(console.clone()))),
        );
        let mut conversation = Conversation::new("be brief");

        let summary = runtime.run_turn(&mut conversation, "add 2 and 3", &console).await;
        assert_eq!(summary.ok().map(|summary| summary.rejected), Some(1));
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        let requests = llm.requests();
        assert_eq!(
            requests[1].messages.last().cloned(),
            Some(ChatMessage::tool_result("call_1", "Operation was rejected."))
        );

        drop(runtime);
        let written = output(console).await;
        assert!(written.contains("Approve invocation? (yes/no)\n"));
        assert!(written.contains("[FunctionResult] call_1 - Operation was rejected.\n"));
    }

    #[tokio::test]
    async fn calls_in_one_response_run_sequentially_in_order() {
        let counter = Arc::new(AtomicUsize::new(0));
        let llm = ScriptedLlm::new(vec![
            Ok(calls(&[
                ("call_1", "math-add", r#"{"a":1,"b":1}"#),
                ("call_2", "math-subtract", r#"{"a":5,"b":3}"#),
                ("call_3", "math-add", r#"{"a":"x","b":1}"#),
                ("call_4", "math-add", "not json"),
            ])),
            Ok(reply("done")),
        ]);
        let runtime = runtime_with(
            llm.clone(),
            math_registry(counter.clone()),
            ApprovalFilter::new(Arc::new(StaticApproval::always_allow())),
        );
        let console = console("");
        let mut conversation = Conversation::new("be brief");

        let summary = runtime.run_turn(&mut conversation, "go", &console).await;
        assert_eq!(summary.as_ref().ok().map(|summary| (summary.executed, summary.failed)), Some((1, 3)));
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        let requests = llm.requests();
        let results = requests[1]
            .messages
            .iter()
            .filter(|message| message.role == Role::Tool)
            .map(|message| {
                (message.tool_call_id.clone().unwrap_or_default(), message.content.clone().unwrap_or_default())
            })
            .collect::<Vec<_>>();
        assert_eq!(results[0], ("call_1".to_string(), "2".to_string()));
        assert_eq!(
            results[1],
            ("call_2".to_string(), "Error: unknown capability `math-subtract`".to_string())
        );
        assert_eq!(results[2].0, "call_3");
        assert!(results[2].1.starts_with("Error: invalid arguments for `math-add`"));
        assert_eq!(results[3].0, "call_4");
        assert!(results[3].1.contains("not valid JSON"));
    }

    #[tokio::test]
    async fn upstream_failure_rolls_back_the_turn() {
        let llm = ScriptedLlm::new(vec![
            Ok(calls(&[("call_1", "math-add", r#"{"a":2,"b":3}"#)])),
            Err(upstream_failure()),
        ]);
        let runtime = runtime_with(
            llm,
            math_registry(Arc::new(AtomicUsize::new(0))),
            ApprovalFilter::new(Arc::new(StaticApproval::always_allow())),
        );
        let console = console("");
        let mut conversation = Conversation::new("be brief");
        conversation.push_user("earlier");
        conversation.push_assistant(ChatMessage::assistant("earlier reply"));

        let result = runtime.run_turn(&mut conversation, "add", &console).await;
        assert!(matches!(result, Err(TurnError::Llm(_))));
        assert_eq!(conversation.len(), 2);
    }

    #[tokio::test]
    async fn endless_calls_end_the_turn_at_the_round_limit() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut script = (0..MAX_ROUNDS_PER_TURN)
            .map(|round| Ok(calls(&[(format!("call_{round}").as_str(), "math-add", r#"{"a":1,"b":1}"#)])))
            .collect::<Vec<_>>();
        script.push(Ok(reply("never requested")));
        let llm = ScriptedLlm::new(script);
        let runtime = runtime_with(
            llm.clone(),
            math_registry(counter.clone()),
            ApprovalFilter::new(Arc::new(StaticApproval::always_allow())),
        );
        let console = console("");
        let mut conversation = Conversation::new("be brief");

        let summary = runtime.run_turn(&mut conversation, "loop forever", &console).await;
        assert!(summary.is_ok());
        let Ok(summary) = summary else { return };
        assert_eq!(summary.rounds, MAX_ROUNDS_PER_TURN);
        assert_eq!(summary.executed, MAX_ROUNDS_PER_TURN);
        assert_eq!(summary.reply, None);
        assert_eq!(counter.load(Ordering::SeqCst), MAX_ROUNDS_PER_TURN);
        assert_eq!(llm.requests().len(), MAX_ROUNDS_PER_TURN);

        // user message, then one assistant call and one tool result per round
        assert_eq!(conversation.len(), 1 + 2 * MAX_ROUNDS_PER_TURN);
        let messages = conversation.messages();
        assert_eq!(messages.last().map(|message| message.role), Some(Role::Tool));
        assert!(messages.windows(2).all(|pair| {
            !pair[0].has_tool_calls()
                || pair[1].tool_call_id.as_deref() == pair[0].tool_calls.first().map(|call| call.id.as_str())
        }));

        drop(runtime);
        let written = output(console).await;
        assert!(written.ends_with(&format!("{ROUND_LIMIT_NOTICE}\n")));
    }

    #[tokio::test]
    async fn session_handles_reset_errors_and_end_of_input() {
        let llm = ScriptedLlm::new(vec![Err(upstream_failure()), Ok(reply("Hello!"))]);
        let runtime = runtime_with(
            llm.clone(),
            CapabilityRegistry::new(),
            ApprovalFilter::new(Arc::new(StaticApproval::always_deny())),
        );
        let console = console("first\n  CLEAR-CONTEXT \n\nhello\n");
        let mut session = AgentSession::new(runtime, console.clone(), "be brief", "clear-context");
        let first_id = session.conversation().id();

        let summary = session.run().await;
        assert!(summary.is_ok());
        let Ok(summary) = summary else { return };
        assert_eq!(summary.turns, 1);
        assert_eq!(summary.failed_turns, 1);
        assert_eq!(summary.resets, 1);
        assert_ne!(session.conversation().id(), first_id);
        assert_eq!(session.conversation().len(), 2);

        let requests = llm.requests();
        assert_eq!(requests.len(), 2);
        assert!(requests
            .iter()
            .all(|request| request.messages.iter().all(|message| message.content.as_deref() != Some("clear-context"))));

        drop(session);
        let written = output(console).await;
        assert!(written.starts_with("User input:\n"));
        assert!(written.contains(
            "Error invoking chat completion: The service rejected the request. \
             (`llm` responded with HTTP 503: model overloaded)\n"
        ));
        assert!(written.contains("Conversation context has been cleared.\n"));
        assert!(written.contains("# assistant - Main-Assistant: Hello!\n"));
        assert!(written.ends_with("Function calls: false\nUser input:\n"));
    }

    #[test]
    fn reset_command_is_trimmed_and_case_insensitive() {
        assert!(is_reset_command("clear-context", "clear-context"));
        assert!(is_reset_command(" Clear-Context\t", "clear-context"));
        assert!(!is_reset_command("clear context", "clear-context"));
    }

    #[test]
    fn empty_or_null_arguments_mean_no_arguments() {
        let call = |arguments: &str| ToolCall {
            id: "call_1".to_string(),
            name: "lights-get_lights".to_string(),
            arguments: arguments.to_string(),
        };
        assert_eq!(parse_arguments(&call("")).ok(), Some(InvocationArguments::new()));
        assert_eq!(parse_arguments(&call("null")).ok(), Some(InvocationArguments::new()));
        assert!(parse_arguments(&call("[1,2]")).is_err());
    }

    #[test]
    fn render_omits_usage_when_not_reported() {
        let lines = render_response("Main-Assistant", &reply("   "));
        assert_eq!(lines, vec!["\n# assistant - Main-Assistant: ".to_string(), "Function calls: false".to_string()]);
    }

    #[test]
    fn llm_errors_lead_with_the_user_facing_message() {
        let error = UpstreamError::MissingCredentials { service: "llm".to_string() };
        assert_eq!(
            render_llm_error(&error),
            "Error invoking chat completion: The service is not configured with credentials. \
             (service `llm` requires credentials that were not configured)"
        );
    }
}
