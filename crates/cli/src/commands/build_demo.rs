use std::sync::Arc;

use anyhow::{Context, Result};
use plugboard_agent::conversation::Conversation;
use plugboard_agent::runtime::render_llm_error;
use plugboard_agent::{StdConsole, TurnError};
use plugboard_core::config::AppConfig;
use plugboard_plugins::software_builder_registry;
use tracing::info;

use crate::commands::chat::assemble_agent;
use crate::commands::{async_runtime, bootstrap, CommandResult};
use crate::ConfigArgs;

const COMMAND: &str = "build-demo";

pub const DEMO_PROMPT: &str = "I want to build a software. Let's start from the first step. \
Continue until all steps were executed or one of the steps are rejected.";

/// Stage progress is logged at `info`; the demo shows it whatever the level.
pub const STAGE_LOG_DIRECTIVE: &str = "plugboard_plugins::software_builder=info";

pub fn run(args: &ConfigArgs) -> CommandResult {
    let config = match bootstrap(COMMAND, args.load_options(), &[STAGE_LOG_DIRECTIVE]) {
        Ok(config) => config,
        Err(result) => return result,
    };
    let runtime = match async_runtime(COMMAND) {
        Ok(runtime) => runtime,
        Err(result) => return result,
    };

    match runtime.block_on(build_demo(config)) {
        Ok(()) => CommandResult::quiet(),
        Err(error) => CommandResult::failure(COMMAND, "startup", format!("{error:#}"), 4),
    }
}

async fn build_demo(config: AppConfig) -> Result<()> {
    let registry = software_builder_registry().context("failed to register software builder")?;
    let console = Arc::new(StdConsole::stdio());
    let agent = assemble_agent(&config, registry, console.clone())?.with_temperature(Some(0.0));

    let mut conversation = Conversation::new(config.agent.instructions.clone());
    match agent.run_turn(&mut conversation, DEMO_PROMPT, &console).await {
        Ok(summary) => {
            info!(
                event_name = "system.build_demo.finished",
                correlation_id = %conversation.id(),
                executed = summary.executed,
                rejected = summary.rejected,
                failed = summary.failed,
                "build demo finished"
            );
            Ok(())
        }
        Err(TurnError::Llm(error)) => {
            console.write_line(&render_llm_error(&error)).await?;
            Ok(())
        }
        Err(TurnError::Console(error)) => Err(error).context("console closed unexpectedly"),
    }
}
