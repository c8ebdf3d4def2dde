use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::policy::{ApprovalRule, RuleEffect};

pub const DEFAULT_CONFIG_FILE: &str = "plugboard.toml";
pub const NESTED_CONFIG_FILE: &str = "config/plugboard.toml";

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub llm: LlmConfig,
    pub agent: AgentConfig,
    pub approval: ApprovalConfig,
    pub plugins: PluginsConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub api_key: Option<SecretString>,
    pub base_url: Option<String>,
    pub deployment: Option<String>,
    pub api_version: String,
    pub model: String,
    pub temperature: Option<f32>,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct AgentConfig {
    pub name: String,
    pub instructions: String,
    pub reset_command: String,
}

#[derive(Clone, Debug)]
pub struct ApprovalConfig {
    pub mode: ApprovalMode,
    /// Zero waits forever; any other value denies once it elapses.
    pub timeout_secs: u64,
    pub default_effect: RuleEffect,
    pub rules: Vec<ApprovalRule>,
}

#[derive(Clone, Debug)]
pub struct PluginsConfig {
    pub lights: PluginToggle,
    pub software_builder: PluginToggle,
    pub fitness: ServicePluginConfig,
    pub notes: ServicePluginConfig,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PluginToggle {
    pub enabled: bool,
}

#[derive(Clone, Debug)]
pub struct ServicePluginConfig {
    pub enabled: bool,
    pub token: Option<SecretString>,
    pub base_url: String,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    #[serde(rename = "openai", alias = "open_ai")]
    OpenAi,
    #[serde(rename = "azure_openai", alias = "azure")]
    AzureOpenAi,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalMode {
    Interactive,
    AllowAll,
    DenyAll,
    Rules,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub llm_provider: Option<LlmProvider>,
    pub llm_model: Option<String>,
    pub llm_temperature: Option<f32>,
    pub approval_mode: Option<ApprovalMode>,
    pub log_level: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            llm: LlmConfig {
                provider: LlmProvider::OpenAi,
                api_key: None,
                base_url: Some("https://api.openai.com".to_string()),
                deployment: None,
                api_version: "2024-10-21".to_string(),
                model: "gpt-4o".to_string(),
                temperature: None,
                timeout_secs: 60,
            },
            agent: AgentConfig {
                name: "Main-Assistant".to_string(),
                instructions: "Respond to user questions as an assistant".to_string(),
                reset_command: "clear-context".to_string(),
            },
            approval: ApprovalConfig {
                mode: ApprovalMode::Interactive,
                timeout_secs: 0,
                default_effect: RuleEffect::Deny,
                rules: Vec::new(),
            },
            plugins: PluginsConfig {
                lights: PluginToggle { enabled: true },
                software_builder: PluginToggle { enabled: true },
                fitness: ServicePluginConfig {
                    enabled: false,
                    token: None,
                    base_url: "https://www.googleapis.com/fitness/v1".to_string(),
                },
                notes: ServicePluginConfig {
                    enabled: false,
                    token: None,
                    base_url: "https://keep.googleapis.com/v1".to_string(),
                },
            },
            logging: LoggingConfig { level: "warn".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl LlmProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::AzureOpenAi => "azure_openai",
        }
    }
}

impl ApprovalMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Interactive => "interactive",
            Self::AllowAll => "allow_all",
            Self::DenyAll => "deny_all",
            Self::Rules => "rules",
        }
    }
}

impl LogFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Compact => "compact",
            Self::Pretty => "pretty",
            Self::Json => "json",
        }
    }
}

impl std::str::FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "openai" | "open_ai" => Ok(Self::OpenAi),
            "azure" | "azure_openai" | "azure_open_ai" => Ok(Self::AzureOpenAi),
            other => Err(ConfigError::Validation(format!(
                "unsupported llm provider `{other}` (expected openai|azure_openai)"
            ))),
        }
    }
}

impl std::str::FromStr for ApprovalMode {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "interactive" => Ok(Self::Interactive),
            "allow_all" => Ok(Self::AllowAll),
            "deny_all" => Ok(Self::DenyAll),
            "rules" => Ok(Self::Rules),
            other => Err(ConfigError::Validation(format!(
                "unsupported approval mode `{other}` (expected interactive|allow_all|deny_all|rules)"
            ))),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected =
                options.config_path.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(llm) = patch.llm {
            if let Some(provider) = llm.provider {
                self.llm.provider = provider;
            }
            if let Some(llm_api_key_value) = llm.api_key {
                self.llm.api_key = Some(secret_value(llm_api_key_value));
            }
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = Some(base_url);
            }
            if let Some(deployment) = llm.deployment {
                self.llm.deployment = Some(deployment);
            }
            if let Some(api_version) = llm.api_version {
                self.llm.api_version = api_version;
            }
            if let Some(model) = llm.model {
                self.llm.model = model;
            }
            if let Some(temperature) = llm.temperature {
                self.llm.temperature = Some(temperature);
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                self.llm.timeout_secs = timeout_secs;
            }
        }

        if let Some(agent) = patch.agent {
            if let Some(name) = agent.name {
                self.agent.name = name;
            }
            if let Some(instructions) = agent.instructions {
                self.agent.instructions = instructions;
            }
            if let Some(reset_command) = agent.reset_command {
                self.agent.reset_command = reset_command;
            }
        }

        if let Some(approval) = patch.approval {
            if let Some(mode) = approval.mode {
                self.approval.mode = mode;
            }
            if let Some(timeout_secs) = approval.timeout_secs {
                self.approval.timeout_secs = timeout_secs;
            }
            if let Some(default_effect) = approval.default {
                self.approval.default_effect = default_effect;
            }
            if let Some(rules) = approval.rules {
                self.approval.rules = rules;
            }
        }

        if let Some(plugins) = patch.plugins {
            if let Some(lights) = plugins.lights.and_then(|lights| lights.enabled) {
                self.plugins.lights.enabled = lights;
            }
            if let Some(builder) = plugins.software_builder.and_then(|builder| builder.enabled) {
                self.plugins.software_builder.enabled = builder;
            }
            if let Some(fitness) = plugins.fitness {
                fitness.apply_to(&mut self.plugins.fitness);
            }
            if let Some(notes) = plugins.notes {
                notes.apply_to(&mut self.plugins.notes);
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("PLUGBOARD_LLM_PROVIDER") {
            self.llm.provider = value.parse()?;
        }
        let api_key = read_env("PLUGBOARD_LLM_API_KEY")
            .or_else(|| read_env("OPENAI_API_KEY"))
            .or_else(|| read_env("OPENAI_API_ApiKey"));
        if let Some(value) = api_key {
            self.llm.api_key = Some(secret_value(value));
        }
        let base_url =
            read_env("PLUGBOARD_LLM_BASE_URL").or_else(|| read_env("OPENAI_API_Endpoint"));
        if let Some(value) = base_url {
            self.llm.base_url = Some(value);
        }
        if let Some(value) = read_env("PLUGBOARD_LLM_DEPLOYMENT") {
            self.llm.deployment = Some(value);
        }
        if let Some(value) = read_env("PLUGBOARD_LLM_API_VERSION") {
            self.llm.api_version = value;
        }
        if let Some(value) = read_env("PLUGBOARD_LLM_MODEL") {
            self.llm.model = value;
        }
        if let Some(value) = read_env("PLUGBOARD_LLM_TEMPERATURE") {
            self.llm.temperature = Some(parse_f32("PLUGBOARD_LLM_TEMPERATURE", &value)?);
        }
        if let Some(value) = read_env("PLUGBOARD_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_u64("PLUGBOARD_LLM_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("PLUGBOARD_AGENT_NAME") {
            self.agent.name = value;
        }
        if let Some(value) = read_env("PLUGBOARD_AGENT_INSTRUCTIONS") {
            self.agent.instructions = value;
        }
        if let Some(value) = read_env("PLUGBOARD_AGENT_RESET_COMMAND") {
            self.agent.reset_command = value;
        }

        if let Some(value) = read_env("PLUGBOARD_APPROVAL_MODE") {
            self.approval.mode = value.parse()?;
        }
        if let Some(value) = read_env("PLUGBOARD_APPROVAL_TIMEOUT_SECS") {
            self.approval.timeout_secs = parse_u64("PLUGBOARD_APPROVAL_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("PLUGBOARD_LIGHTS_ENABLED") {
            self.plugins.lights.enabled = parse_bool("PLUGBOARD_LIGHTS_ENABLED", &value)?;
        }
        if let Some(value) = read_env("PLUGBOARD_SOFTWARE_BUILDER_ENABLED") {
            self.plugins.software_builder.enabled =
                parse_bool("PLUGBOARD_SOFTWARE_BUILDER_ENABLED", &value)?;
        }

        if let Some(value) = read_env("PLUGBOARD_FITNESS_ENABLED") {
            self.plugins.fitness.enabled = parse_bool("PLUGBOARD_FITNESS_ENABLED", &value)?;
        }
        let fitness_token =
            read_env("PLUGBOARD_FITNESS_TOKEN").or_else(|| read_env("FITNESS_API_TOKEN"));
        if let Some(value) = fitness_token {
            self.plugins.fitness.token = Some(secret_value(value));
        }
        if let Some(value) = read_env("PLUGBOARD_FITNESS_BASE_URL") {
            self.plugins.fitness.base_url = value;
        }

        if let Some(value) = read_env("PLUGBOARD_NOTES_ENABLED") {
            self.plugins.notes.enabled = parse_bool("PLUGBOARD_NOTES_ENABLED", &value)?;
        }
        if let Some(value) = read_env("PLUGBOARD_NOTES_TOKEN") {
            self.plugins.notes.token = Some(secret_value(value));
        }
        if let Some(value) = read_env("PLUGBOARD_NOTES_BASE_URL") {
            self.plugins.notes.base_url = value;
        }

        let log_level =
            read_env("PLUGBOARD_LOGGING_LEVEL").or_else(|| read_env("PLUGBOARD_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("PLUGBOARD_LOGGING_FORMAT").or_else(|| read_env("PLUGBOARD_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(provider) = overrides.llm_provider {
            self.llm.provider = provider;
        }
        if let Some(model) = overrides.llm_model {
            self.llm.model = model;
        }
        if let Some(temperature) = overrides.llm_temperature {
            self.llm.temperature = Some(temperature);
        }
        if let Some(mode) = overrides.approval_mode {
            self.approval.mode = mode;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_llm(&self.llm)?;
        validate_agent(&self.agent)?;
        validate_approval(&self.approval)?;
        validate_plugins(&self.plugins)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

pub fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from(DEFAULT_CONFIG_FILE), PathBuf::from(NESTED_CONFIG_FILE)]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn secret_missing(secret: Option<&SecretString>) -> bool {
    secret.map(|value| value.expose_secret().trim().is_empty()).unwrap_or(true)
}

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    if secret_missing(llm.api_key.as_ref()) {
        return Err(ConfigError::Validation(
            "llm.api_key is required (set PLUGBOARD_LLM_API_KEY or [llm] api_key)".to_string(),
        ));
    }

    if llm.timeout_secs == 0 || llm.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "llm.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    if let Some(temperature) = llm.temperature {
        if !(0.0..=2.0).contains(&temperature) {
            return Err(ConfigError::Validation(
                "llm.temperature must be in range 0.0..=2.0".to_string(),
            ));
        }
    }

    let base_url = llm.base_url.as_deref().map(str::trim).unwrap_or_default();
    if !base_url.is_empty() && !base_url.starts_with("http://") && !base_url.starts_with("https://")
    {
        return Err(ConfigError::Validation(
            "llm.base_url must start with http:// or https://".to_string(),
        ));
    }

    match llm.provider {
        LlmProvider::OpenAi => {
            if base_url.is_empty() {
                return Err(ConfigError::Validation(
                    "llm.base_url is required for the openai provider".to_string(),
                ));
            }
            if llm.model.trim().is_empty() {
                return Err(ConfigError::Validation(
                    "llm.model is required for the openai provider".to_string(),
                ));
            }
        }
        LlmProvider::AzureOpenAi => {
            if base_url.is_empty() {
                return Err(ConfigError::Validation(
                    "llm.base_url (the Azure OpenAI endpoint) is required for azure_openai"
                        .to_string(),
                ));
            }
            let deployment_missing =
                llm.deployment.as_ref().map(|value| value.trim().is_empty()).unwrap_or(true);
            if deployment_missing {
                return Err(ConfigError::Validation(
                    "llm.deployment is required for azure_openai".to_string(),
                ));
            }
            if llm.api_version.trim().is_empty() {
                return Err(ConfigError::Validation(
                    "llm.api_version is required for azure_openai".to_string(),
                ));
            }
        }
    }

    Ok(())
}

fn validate_agent(agent: &AgentConfig) -> Result<(), ConfigError> {
    if agent.reset_command.trim().is_empty() {
        return Err(ConfigError::Validation("agent.reset_command must not be empty".to_string()));
    }
    if agent.name.trim().is_empty() {
        return Err(ConfigError::Validation("agent.name must not be empty".to_string()));
    }
    Ok(())
}

fn validate_approval(approval: &ApprovalConfig) -> Result<(), ConfigError> {
    if approval.mode == ApprovalMode::Rules && approval.rules.is_empty() {
        return Err(ConfigError::Validation(
            "approval.mode = \"rules\" requires at least one [[approval.rules]] entry".to_string(),
        ));
    }

    if let Some(rule) = approval.rules.iter().find(|rule| rule.capability.trim().is_empty()) {
        return Err(ConfigError::Validation(format!(
            "approval rule with effect {:?} has an empty capability pattern",
            rule.effect
        )));
    }

    Ok(())
}

fn validate_plugins(plugins: &PluginsConfig) -> Result<(), ConfigError> {
    for (key, service) in [("fitness", &plugins.fitness), ("notes", &plugins.notes)] {
        if !service.enabled {
            continue;
        }
        if secret_missing(service.token.as_ref()) {
            return Err(ConfigError::Validation(format!(
                "plugins.{key}.token is required when plugins.{key}.enabled is true"
            )));
        }
        let base_url = service.base_url.trim();
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(ConfigError::Validation(format!(
                "plugins.{key}.base_url must start with http:// or https://"
            )));
        }
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_f32(key: &str, value: &str) -> Result<f32, ConfigError> {
    value.parse::<f32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value.parse::<bool>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    llm: Option<LlmPatch>,
    agent: Option<AgentPatch>,
    approval: Option<ApprovalPatch>,
    plugins: Option<PluginsPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    provider: Option<LlmProvider>,
    api_key: Option<String>,
    base_url: Option<String>,
    deployment: Option<String>,
    api_version: Option<String>,
    model: Option<String>,
    temperature: Option<f32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct AgentPatch {
    name: Option<String>,
    instructions: Option<String>,
    reset_command: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ApprovalPatch {
    mode: Option<ApprovalMode>,
    timeout_secs: Option<u64>,
    default: Option<RuleEffect>,
    rules: Option<Vec<ApprovalRule>>,
}

#[derive(Debug, Default, Deserialize)]
struct PluginsPatch {
    lights: Option<TogglePatch>,
    software_builder: Option<TogglePatch>,
    fitness: Option<ServicePluginPatch>,
    notes: Option<ServicePluginPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct TogglePatch {
    enabled: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct ServicePluginPatch {
    enabled: Option<bool>,
    token: Option<String>,
    base_url: Option<String>,
}

impl ServicePluginPatch {
    fn apply_to(self, target: &mut ServicePluginConfig) {
        if let Some(enabled) = self.enabled {
            target.enabled = enabled;
        }
        if let Some(token_value) = self.token {
            target.token = Some(secret_value(token_value));
        }
        if let Some(base_url) = self.base_url {
            target.base_url = base_url;
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;
    use std::io;
    use std::sync::{Mutex, OnceLock};

    use secrecy::ExposeSecret;
    use serde_json::json;
    use tempfile::TempDir;

    use super::{
        AppConfig, ApprovalMode, ConfigError, ConfigOverrides, LlmProvider, LoadOptions,
        LogFormat,
    };
    use crate::domain::policy::{RuleCondition, RuleEffect};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    const TOUCHED_VARS: &[&str] = &[
        "PLUGBOARD_LLM_API_KEY",
        "OPENAI_API_KEY",
        "OPENAI_API_ApiKey",
        "PLUGBOARD_LLM_BASE_URL",
        "OPENAI_API_Endpoint",
        "PLUGBOARD_LLM_MODEL",
        "PLUGBOARD_LLM_PROVIDER",
        "PLUGBOARD_LOG_LEVEL",
        "PLUGBOARD_LOG_FORMAT",
        "PLUGBOARD_APPROVAL_MODE",
        "PLUGBOARD_APPROVAL_TIMEOUT_SECS",
        "PLUGBOARD_FITNESS_ENABLED",
        "PLUGBOARD_FITNESS_TOKEN",
        "FITNESS_API_TOKEN",
        "TEST_PLUGBOARD_KEY",
    ];

    fn env_lock() -> &'static Mutex<()> {
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn clear_vars(vars: &[&str]) {
        for var in vars {
            env::remove_var(var);
        }
    }

    fn ensure(condition: bool, message: &'static str) -> Result<(), String> {
        if condition {
            Ok(())
        } else {
            Err(message.to_string())
        }
    }

    fn isolated_options() -> Result<(TempDir, LoadOptions), String> {
        let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
        let path = dir.path().join("absent.toml");
        Ok((dir, LoadOptions { config_path: Some(path), ..LoadOptions::default() }))
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;
        clear_vars(TOUCHED_VARS);
        env::set_var("TEST_PLUGBOARD_KEY", "sk-from-env");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("plugboard.toml");
            fs::write(
                &path,
                r#"
[llm]
api_key = "${TEST_PLUGBOARD_KEY}"
model = "gpt-4o-mini"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.llm.api_key.as_ref().map(|key| key.expose_secret().to_string())
                    == Some("sk-from-env".to_string()),
                "api key should be interpolated from environment",
            )?;
            ensure(config.llm.model == "gpt-4o-mini", "model should come from the file")?;
            Ok(())
        })();

        clear_vars(TOUCHED_VARS);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;
        clear_vars(TOUCHED_VARS);
        env::set_var("PLUGBOARD_LLM_API_KEY", "sk-from-env");
        env::set_var("PLUGBOARD_LLM_MODEL", "model-from-env");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("plugboard.toml");
            fs::write(
                &path,
                r#"
[llm]
api_key = "sk-from-file"
model = "model-from-file"

[approval]
mode = "deny_all"

[logging]
level = "info"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config = AppConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    approval_mode: Some(ApprovalMode::AllowAll),
                    log_level: Some("debug".to_string()),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.llm.api_key.as_ref().map(|key| key.expose_secret().to_string())
                    == Some("sk-from-env".to_string()),
                "env api key should win over file",
            )?;
            ensure(config.llm.model == "model-from-env", "env model should win over file")?;
            ensure(
                config.approval.mode == ApprovalMode::AllowAll,
                "override approval mode should win",
            )?;
            ensure(config.logging.level == "debug", "overridden log level should be debug")?;
            Ok(())
        })();

        clear_vars(TOUCHED_VARS);
        result
    }

    #[test]
    fn openai_api_variables_fill_key_and_endpoint() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;
        clear_vars(TOUCHED_VARS);
        env::set_var("OPENAI_API_ApiKey", "sk-legacy-key");
        env::set_var("OPENAI_API_Endpoint", "https://example.openai.azure.com");

        let result = (|| -> Result<(), String> {
            let (_dir, options) = isolated_options()?;
            let config =
                AppConfig::load(options).map_err(|err| format!("config load failed: {err}"))?;
            ensure(
                config.llm.api_key.as_ref().map(|key| key.expose_secret().to_string())
                    == Some("sk-legacy-key".to_string()),
                "api key should fall back to OPENAI_API_ApiKey",
            )?;
            ensure(
                config.llm.base_url.as_deref() == Some("https://example.openai.azure.com"),
                "base url should fall back to OPENAI_API_Endpoint",
            )?;

            env::set_var("PLUGBOARD_LLM_BASE_URL", "https://api.openai.com");
            let (_dir, options) = isolated_options()?;
            let config =
                AppConfig::load(options).map_err(|err| format!("config load failed: {err}"))?;
            ensure(
                config.llm.base_url.as_deref() == Some("https://api.openai.com"),
                "PLUGBOARD_LLM_BASE_URL should win over the fallback",
            )?;
            Ok(())
        })();

        clear_vars(TOUCHED_VARS);
        result
    }

    #[test]
    fn missing_api_key_fails_fast() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;
        clear_vars(TOUCHED_VARS);

        let result = (|| -> Result<(), String> {
            let (_dir, options) = isolated_options()?;
            let error = match AppConfig::load(options) {
                Ok(_) => return Err("expected validation failure without api key".to_string()),
                Err(error) => error,
            };
            ensure(
                matches!(error, ConfigError::Validation(ref message) if message.contains("llm.api_key")),
                "validation failure should mention llm.api_key",
            )
        })();

        clear_vars(TOUCHED_VARS);
        result
    }

    #[test]
    fn enabled_fitness_plugin_requires_token() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;
        clear_vars(TOUCHED_VARS);
        env::set_var("PLUGBOARD_LLM_API_KEY", "sk-test");
        env::set_var("PLUGBOARD_FITNESS_ENABLED", "true");

        let result = (|| -> Result<(), String> {
            let (_dir, options) = isolated_options()?;
            let error = match AppConfig::load(options.clone()) {
                Ok(_) => return Err("expected validation failure without token".to_string()),
                Err(error) => error,
            };
            ensure(
                matches!(error, ConfigError::Validation(ref message) if message.contains("plugins.fitness.token")),
                "validation failure should mention plugins.fitness.token",
            )?;

            env::set_var("FITNESS_API_TOKEN", "ya29.token");
            let config =
                AppConfig::load(options).map_err(|err| format!("config load failed: {err}"))?;
            ensure(config.plugins.fitness.enabled, "fitness plugin should be enabled")
        })();

        clear_vars(TOUCHED_VARS);
        result
    }

    #[test]
    fn invalid_env_override_is_reported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;
        clear_vars(TOUCHED_VARS);
        env::set_var("PLUGBOARD_LLM_API_KEY", "sk-test");
        env::set_var("PLUGBOARD_APPROVAL_TIMEOUT_SECS", "soon");

        let result = (|| -> Result<(), String> {
            let (_dir, options) = isolated_options()?;
            ensure(
                matches!(
                    AppConfig::load(options),
                    Err(ConfigError::InvalidEnvOverride { ref key, .. })
                        if key == "PLUGBOARD_APPROVAL_TIMEOUT_SECS"
                ),
                "non-numeric timeout should be rejected",
            )
        })();

        clear_vars(TOUCHED_VARS);
        result
    }

    #[test]
    fn approval_rules_load_from_file() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;
        clear_vars(TOUCHED_VARS);
        env::set_var("PLUGBOARD_LLM_API_KEY", "sk-test");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("plugboard.toml");
            fs::write(
                &path,
                r#"
[approval]
mode = "rules"
default = "deny"

[[approval.rules]]
capability = "lights-get_*"
effect = "allow"

[[approval.rules]]
capability = "lights-change_state"
effect = "deny"
when = { kind = "equals", argument = "id", value = 3 }
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.approval.mode == ApprovalMode::Rules, "rules mode should be loaded")?;
            ensure(config.approval.rules.len() == 2, "both rules should be loaded")?;
            ensure(
                config.approval.rules[0].when == RuleCondition::Always,
                "missing condition should default to always",
            )?;
            ensure(
                config.approval.rules[1].when
                    == RuleCondition::Equals { argument: "id".to_string(), value: json!(3) },
                "equals condition should be parsed",
            )?;
            ensure(
                config.approval.rules[1].effect == RuleEffect::Deny,
                "deny effect should be parsed",
            )
        })();

        clear_vars(TOUCHED_VARS);
        result
    }

    #[test]
    fn rules_mode_without_rules_is_rejected() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;
        clear_vars(TOUCHED_VARS);
        env::set_var("PLUGBOARD_LLM_API_KEY", "sk-test");
        env::set_var("PLUGBOARD_APPROVAL_MODE", "rules");

        let result = (|| -> Result<(), String> {
            let (_dir, options) = isolated_options()?;
            ensure(
                matches!(AppConfig::load(options), Err(ConfigError::Validation(ref message)) if message.contains("approval.rules")),
                "rules mode without rules should fail validation",
            )
        })();

        clear_vars(TOUCHED_VARS);
        result
    }

    #[test]
    fn azure_provider_requires_deployment() {
        let mut config = AppConfig::default();
        config.llm.api_key = Some("key".to_string().into());
        config.llm.provider = LlmProvider::AzureOpenAi;
        config.llm.base_url = Some("https://example.openai.azure.com".to_string());

        assert!(matches!(
            config.validate(),
            Err(ConfigError::Validation(ref message)) if message.contains("llm.deployment")
        ));

        config.llm.deployment = Some("gpt-4".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn provider_and_mode_parse_loosely() {
        assert_eq!("Azure-OpenAI".parse::<LlmProvider>().ok(), Some(LlmProvider::AzureOpenAi));
        assert_eq!("allow-all".parse::<ApprovalMode>().ok(), Some(ApprovalMode::AllowAll));
        assert!("sometimes".parse::<ApprovalMode>().is_err());
    }

    #[test]
    fn secret_values_are_not_leaked_by_debug() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;
        clear_vars(TOUCHED_VARS);
        env::set_var("PLUGBOARD_LLM_API_KEY", "sk-secret-value");
        env::set_var("PLUGBOARD_FITNESS_TOKEN", "ya29.secret-value");

        let result = (|| -> Result<(), String> {
            let (_dir, options) = isolated_options()?;
            let config =
                AppConfig::load(options).map_err(|err| format!("config load failed: {err}"))?;
            let debug = format!("{config:?}");

            ensure(!debug.contains("sk-secret-value"), "debug output should not contain api key")?;
            ensure(
                !debug.contains("ya29.secret-value"),
                "debug output should not contain fitness token",
            )?;
            ensure(
                matches!(config.logging.format, LogFormat::Compact),
                "default logging format should be compact",
            )
        })();

        clear_vars(TOUCHED_VARS);
        result
    }
}
