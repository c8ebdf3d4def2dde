use std::sync::Arc;

use anyhow::{Context, Result};
use plugboard_agent::approval;
use plugboard_agent::openai::OpenAiClient;
use plugboard_agent::{
    AgentRuntime, AgentSession, ApprovalFilter, CapabilityRegistry, ConsoleApproval,
    InvocationPipeline, StdConsole, TracingFilter,
};
use plugboard_core::config::AppConfig;
use plugboard_plugins::registry_from_config;
use tracing::info;

use crate::commands::{async_runtime, bootstrap, CommandResult};
use crate::ChatArgs;

const COMMAND: &str = "chat";

pub fn run(args: &ChatArgs) -> CommandResult {
    let config = match bootstrap(COMMAND, args.load_options(), &[]) {
        Ok(config) => config,
        Err(result) => return result,
    };
    let runtime = match async_runtime(COMMAND) {
        Ok(runtime) => runtime,
        Err(result) => return result,
    };

    match runtime.block_on(chat(config)) {
        Ok(()) => CommandResult::quiet(),
        Err(error) => CommandResult::failure(COMMAND, "startup", format!("{error:#}"), 4),
    }
}

async fn chat(config: AppConfig) -> Result<()> {
    let registry =
        registry_from_config(&config.plugins).context("failed to register plugins")?;
    let console = Arc::new(StdConsole::stdio());
    let agent = assemble_agent(&config, registry, console.clone())?;

    let mut session = AgentSession::new(
        agent,
        console,
        config.agent.instructions.clone(),
        config.agent.reset_command.clone(),
    );
    let summary = session.run().await.context("console closed unexpectedly")?;

    info!(
        event_name = "system.session.finished",
        turns = summary.turns,
        failed_turns = summary.failed_turns,
        resets = summary.resets,
        "chat finished"
    );
    Ok(())
}

/// Wires the registry, approval service, and LLM client into one agent. The
/// console serves both the session prompt and the approval prompt.
pub(crate) fn assemble_agent(
    config: &AppConfig,
    registry: CapabilityRegistry,
    console: Arc<StdConsole>,
) -> Result<AgentRuntime> {
    let approvals =
        approval::from_config(&config.approval, Arc::new(ConsoleApproval::new(console)));
    let pipeline = InvocationPipeline::builder(registry)
        .filter(TracingFilter)
        .filter(ApprovalFilter::new(approvals))
        .build();

    let llm = OpenAiClient::from_config(&config.llm).context("failed to build llm client")?;
    info!(
        event_name = "system.bootstrap.agent_ready",
        agent = config.agent.name.as_str(),
        capabilities = pipeline.registry().len(),
        endpoint = llm.endpoint(),
        "agent assembled"
    );

    Ok(AgentRuntime::new(config.agent.name.clone(), Arc::new(llm), Arc::new(pipeline))
        .with_temperature(config.llm.temperature))
}
