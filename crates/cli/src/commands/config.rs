use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use plugboard_core::config::{resolve_config_path, AppConfig};
use plugboard_core::RuleEffect;
use secrecy::{ExposeSecret, SecretString};
use toml::Value;

use crate::commands::CommandResult;
use crate::ConfigArgs;

const REVEALED_SECRET_CHARS: usize = 3;

pub fn run(args: &ConfigArgs) -> CommandResult {
    let config = match AppConfig::load(args.load_options()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "config",
                "config_validation",
                format!("config validation failed: {error}"),
                2,
            )
        }
    };

    let config_file_path = resolve_config_path(args.config.as_deref());
    CommandResult { exit_code: 0, output: render(&config, config_file_path.as_deref()) }
}

/// Effective values, one per line, with where each one came from.
pub fn render(config: &AppConfig, config_file_path: Option<&Path>) -> String {
    let config_file_doc = load_config_file_doc(config_file_path);
    let source = |key: &str, env_keys: &[&str]| {
        field_source(key, env_keys, config_file_doc.as_ref(), config_file_path)
    };

    let llm = &config.llm;
    let temperature = llm.temperature.map(|value| value.to_string());
    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];

    lines.push(render_line(
        "llm.provider",
        llm.provider.as_str(),
        source("llm.provider", &["PLUGBOARD_LLM_PROVIDER"]),
    ));
    lines.push(render_line("llm.model", &llm.model, source("llm.model", &["PLUGBOARD_LLM_MODEL"])));
    lines.push(render_line(
        "llm.base_url",
        llm.base_url.as_deref().unwrap_or("<unset>"),
        source("llm.base_url", &["PLUGBOARD_LLM_BASE_URL", "OPENAI_API_Endpoint"]),
    ));
    lines.push(render_line(
        "llm.deployment",
        llm.deployment.as_deref().unwrap_or("<unset>"),
        source("llm.deployment", &["PLUGBOARD_LLM_DEPLOYMENT"]),
    ));
    lines.push(render_line(
        "llm.api_version",
        &llm.api_version,
        source("llm.api_version", &["PLUGBOARD_LLM_API_VERSION"]),
    ));
    lines.push(render_line(
        "llm.api_key",
        &redact_secret(llm.api_key.as_ref()),
        source("llm.api_key", &["PLUGBOARD_LLM_API_KEY", "OPENAI_API_KEY", "OPENAI_API_ApiKey"]),
    ));
    lines.push(render_line(
        "llm.temperature",
        temperature.as_deref().unwrap_or("<unset>"),
        source("llm.temperature", &["PLUGBOARD_LLM_TEMPERATURE"]),
    ));
    lines.push(render_line(
        "llm.timeout_secs",
        &llm.timeout_secs.to_string(),
        source("llm.timeout_secs", &["PLUGBOARD_LLM_TIMEOUT_SECS"]),
    ));

    let agent = &config.agent;
    lines.push(render_line(
        "agent.name",
        &agent.name,
        source("agent.name", &["PLUGBOARD_AGENT_NAME"]),
    ));
    lines.push(render_line(
        "agent.instructions",
        &agent.instructions,
        source("agent.instructions", &["PLUGBOARD_AGENT_INSTRUCTIONS"]),
    ));
    lines.push(render_line(
        "agent.reset_command",
        &agent.reset_command,
        source("agent.reset_command", &["PLUGBOARD_AGENT_RESET_COMMAND"]),
    ));

    let approval = &config.approval;
    lines.push(render_line(
        "approval.mode",
        approval.mode.as_str(),
        source("approval.mode", &["PLUGBOARD_APPROVAL_MODE"]),
    ));
    lines.push(render_line(
        "approval.timeout_secs",
        &approval.timeout_secs.to_string(),
        source("approval.timeout_secs", &["PLUGBOARD_APPROVAL_TIMEOUT_SECS"]),
    ));
    let default_effect = match approval.default_effect {
        RuleEffect::Allow => "allow",
        RuleEffect::Deny => "deny",
    };
    lines.push(render_line("approval.default", default_effect, source("approval.default", &[])));
    lines.push(render_line(
        "approval.rules",
        &format!("{} rule(s)", approval.rules.len()),
        source("approval.rules", &[]),
    ));

    let plugins = &config.plugins;
    lines.push(render_line(
        "plugins.lights.enabled",
        &plugins.lights.enabled.to_string(),
        source("plugins.lights.enabled", &["PLUGBOARD_LIGHTS_ENABLED"]),
    ));
    lines.push(render_line(
        "plugins.software_builder.enabled",
        &plugins.software_builder.enabled.to_string(),
        source("plugins.software_builder.enabled", &["PLUGBOARD_SOFTWARE_BUILDER_ENABLED"]),
    ));
    for (name, service, env_prefix, token_fallback) in [
        ("fitness", &plugins.fitness, "PLUGBOARD_FITNESS", Some("FITNESS_API_TOKEN")),
        ("notes", &plugins.notes, "PLUGBOARD_NOTES", None),
    ] {
        let enabled_env = format!("{env_prefix}_ENABLED");
        let token_env = format!("{env_prefix}_TOKEN");
        let base_url_env = format!("{env_prefix}_BASE_URL");
        let mut token_envs = vec![token_env.as_str()];
        token_envs.extend(token_fallback);

        let key = format!("plugins.{name}.enabled");
        let enabled = service.enabled.to_string();
        lines.push(render_line(&key, &enabled, source(&key, &[enabled_env.as_str()])));
        let key = format!("plugins.{name}.token");
        let token = redact_secret(service.token.as_ref());
        lines.push(render_line(&key, &token, source(&key, &token_envs)));
        let key = format!("plugins.{name}.base_url");
        lines.push(render_line(&key, &service.base_url, source(&key, &[base_url_env.as_str()])));
    }

    lines.push(render_line(
        "logging.level",
        &config.logging.level,
        source("logging.level", &["PLUGBOARD_LOGGING_LEVEL", "PLUGBOARD_LOG_LEVEL"]),
    ));
    lines.push(render_line(
        "logging.format",
        config.logging.format.as_str(),
        source("logging.format", &["PLUGBOARD_LOGGING_FORMAT", "PLUGBOARD_LOG_FORMAT"]),
    ));

    lines.join("\n")
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("config file"));
            return format!("file ({})", file_path.display());
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

fn redact_secret(secret: Option<&SecretString>) -> String {
    match secret {
        Some(secret) => redact_token(secret.expose_secret()),
        None => "<unset>".to_string(),
    }
}

/// Secrets longer than `REVEALED_SECRET_CHARS * 3` keep their first few
/// characters so keys can be told apart; shorter ones are hidden entirely.
fn redact_token(token: &str) -> String {
    let trimmed = token.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    if trimmed.chars().count() <= REVEALED_SECRET_CHARS * 3 {
        return "<redacted>".to_string();
    }

    let prefix = trimmed.chars().take(REVEALED_SECRET_CHARS).collect::<String>();
    format!("{prefix}***")
}
