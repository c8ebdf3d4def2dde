pub mod commands;
pub mod logging;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use plugboard_core::config::{ApprovalMode, ConfigOverrides, LoadOptions};

#[derive(Debug, Parser)]
#[command(
    name = "plugboard",
    about = "Plugboard chat agent CLI",
    long_about = "Chat with an LLM agent whose plugin capabilities run only after console approval.",
    after_help = "Examples:\n  plugboard\n  plugboard chat --approval allow_all\n  plugboard build-demo\n  plugboard config"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    #[command(about = "Start the interactive chat session with every enabled plugin (default)")]
    Chat(ChatArgs),
    #[command(
        about = "Ask the agent to run every software builder stage, approving or rejecting each one",
        long_about = "Ask the agent to run every software builder stage, approving or rejecting each one.\n\
                      Stage progress lines are logged to stderr at info level for this command."
    )]
    BuildDemo(ConfigArgs),
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config(ConfigArgs),
}

#[derive(Debug, Default, Args)]
pub struct ConfigArgs {
    #[arg(long, value_name = "PATH", help = "Config file to load instead of plugboard.toml")]
    pub config: Option<PathBuf>,
}

#[derive(Debug, Default, Args)]
pub struct ChatArgs {
    #[command(flatten)]
    pub config: ConfigArgs,
    #[arg(long, value_name = "MODEL", help = "Override llm.model")]
    pub model: Option<String>,
    #[arg(
        long,
        value_name = "MODE",
        help = "Override approval.mode (interactive, allow_all, deny_all, rules)"
    )]
    pub approval: Option<ApprovalMode>,
}

impl ConfigArgs {
    /// An explicit `--config` must exist; otherwise the default locations are optional.
    pub fn load_options(&self) -> LoadOptions {
        LoadOptions {
            config_path: self.config.clone(),
            require_file: self.config.is_some(),
            overrides: ConfigOverrides::default(),
        }
    }
}

impl ChatArgs {
    pub fn load_options(&self) -> LoadOptions {
        let mut options = self.config.load_options();
        options.overrides.llm_model = self.model.clone();
        options.overrides.approval_mode = self.approval;
        options
    }
}

impl Cli {
    /// The subcommand to run; a bare `plugboard` starts a chat.
    pub fn into_command(self) -> Command {
        self.command.unwrap_or_else(|| Command::Chat(ChatArgs::default()))
    }
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.into_command() {
        Command::Chat(args) => commands::chat::run(&args),
        Command::BuildDemo(args) => commands::build_demo::run(&args),
        Command::Config(args) => commands::config::run(&args),
    };

    if !result.output.is_empty() {
        if result.exit_code == 0 {
            println!("{}", result.output);
        } else {
            eprintln!("{}", result.output);
        }
    }
    ExitCode::from(result.exit_code)
}
