//! OpenAI-compatible chat completions client with function calling.
//!
//! Two dialects share one wire format:
//! - `openai`: bearer auth against `{base_url}/v1/chat/completions`
//! - `azure_openai`: `api-key` header against
//!   `{endpoint}/openai/deployments/{deployment}/chat/completions?api-version=..`

use std::time::Duration;

use async_trait::async_trait;
use plugboard_core::config::{LlmConfig, LlmProvider};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::conversation::{ChatMessage, Role, ToolCall};
use crate::llm::{ChatRequest, ChatResponse, LlmClient, LlmError, TokenUsage, ToolDefinition};

const SERVICE: &str = "llm";
const MAX_ERROR_BODY_CHARS: usize = 500;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum AuthScheme {
    Bearer,
    ApiKeyHeader,
}

pub struct OpenAiClient {
    http: Client,
    url: String,
    auth: AuthScheme,
    api_key: SecretString,
    model: Option<String>,
}

impl OpenAiClient {
    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| LlmError::MissingCredentials { service: SERVICE.to_string() })?;
        let url = chat_completions_url(config)?;
        let (auth, model) = match config.provider {
            LlmProvider::OpenAi => (AuthScheme::Bearer, Some(config.model.clone())),
            LlmProvider::AzureOpenAi => (AuthScheme::ApiKeyHeader, None),
        };

        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|error| LlmError::Network {
                service: SERVICE.to_string(),
                message: error.to_string(),
            })?;

        Ok(Self { http, url, auth, api_key, model })
    }

    pub fn endpoint(&self) -> &str {
        &self.url
    }

    fn request_body<'a>(&'a self, request: &'a ChatRequest) -> WireRequest<'a> {
        WireRequest::new(self.model.as_deref(), request)
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, LlmError> {
        debug!(
            event_name = "agent.llm.request",
            messages = request.messages.len(),
            tools = request.tools.len(),
            "sending chat completion request"
        );

        let builder = self.http.post(&self.url).json(&self.request_body(&request));
        let builder = match self.auth {
            AuthScheme::Bearer => builder.bearer_auth(self.api_key.expose_secret()),
            AuthScheme::ApiKeyHeader => builder.header("api-key", self.api_key.expose_secret()),
        };

        let response = builder.send().await.map_err(network_error)?;
        let status = response.status();
        let body = response.text().await.map_err(network_error)?;

        if !status.is_success() {
            return Err(LlmError::Status {
                service: SERVICE.to_string(),
                status: status.as_u16(),
                message: error_message(&body),
            });
        }

        parse_response(&body)
    }
}

fn chat_completions_url(config: &LlmConfig) -> Result<String, LlmError> {
    let base = config
        .base_url
        .as_deref()
        .map(|url| url.trim().trim_end_matches('/'))
        .filter(|url| !url.is_empty())
        .ok_or_else(|| invalid_config("llm.base_url is not set"))?;

    match config.provider {
        LlmProvider::OpenAi if base.ends_with("/v1") => Ok(format!("{base}/chat/completions")),
        LlmProvider::OpenAi => Ok(format!("{base}/v1/chat/completions")),
        LlmProvider::AzureOpenAi => {
            let deployment = config
                .deployment
                .as_deref()
                .map(str::trim)
                .filter(|deployment| !deployment.is_empty())
                .ok_or_else(|| invalid_config("llm.deployment is not set"))?;
            Ok(format!(
                "{base}/openai/deployments/{deployment}/chat/completions?api-version={}",
                config.api_version.trim()
            ))
        }
    }
}

fn invalid_config(reason: &str) -> LlmError {
    LlmError::InvalidResponse { service: SERVICE.to_string(), reason: reason.to_string() }
}

fn network_error(error: reqwest::Error) -> LlmError {
    let message =
        if error.is_timeout() { format!("request timed out: {error}") } else { error.to_string() };
    LlmError::Network { service: SERVICE.to_string(), message }
}

/// Prefers the API's `error.message`; falls back to a clipped raw body.
fn error_message(body: &str) -> String {
    serde_json::from_str::<WireErrorBody>(body)
        .map(|parsed| parsed.error.message)
        .unwrap_or_else(|_| body.chars().take(MAX_ERROR_BODY_CHARS).collect())
}

fn parse_response(body: &str) -> Result<ChatResponse, LlmError> {
    let parsed: WireResponse = serde_json::from_str(body).map_err(|error| {
        LlmError::InvalidResponse { service: SERVICE.to_string(), reason: error.to_string() }
    })?;

    let choice = parsed.choices.into_iter().next().ok_or_else(|| LlmError::InvalidResponse {
        service: SERVICE.to_string(),
        reason: "response contained no choices".to_string(),
    })?;

    let tool_calls = choice
        .message
        .tool_calls
        .into_iter()
        .map(|call| ToolCall {
            id: call.id,
            name: call.function.name,
            arguments: call.function.arguments,
        })
        .collect();

    Ok(ChatResponse {
        message: ChatMessage::assistant_with_calls(choice.message.content, tool_calls),
        usage: parsed.usage,
    })
}

#[derive(Serialize)]
struct WireRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
    messages: Vec<WireMessage<'a>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

impl<'a> WireRequest<'a> {
    fn new(model: Option<&'a str>, request: &'a ChatRequest) -> Self {
        let tools: Vec<WireTool<'a>> = request.tools.iter().map(WireTool::from).collect();
        let tool_choice = if tools.is_empty() { None } else { Some("auto") };
        Self {
            model,
            messages: request.messages.iter().map(WireMessage::from).collect(),
            tools,
            tool_choice,
            temperature: request.temperature,
        }
    }
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: Role,
    content: Option<&'a str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<WireToolCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<&'a str>,
}

impl<'a> From<&'a ChatMessage> for WireMessage<'a> {
    fn from(message: &'a ChatMessage) -> Self {
        Self {
            role: message.role,
            content: message.content.as_deref(),
            tool_calls: message
                .tool_calls
                .iter()
                .map(|call| WireToolCall {
                    id: call.id.clone(),
                    kind: function_kind(),
                    function: WireFunctionCall {
                        name: call.name.clone(),
                        arguments: call.arguments.clone(),
                    },
                })
                .collect(),
            tool_call_id: message.tool_call_id.as_deref(),
        }
    }
}

#[derive(Serialize)]
struct WireTool<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    function: &'a ToolDefinition,
}

impl<'a> From<&'a ToolDefinition> for WireTool<'a> {
    fn from(function: &'a ToolDefinition) -> Self {
        Self { kind: "function", function }
    }
}

#[derive(Serialize, Deserialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type", default = "function_kind")]
    kind: String,
    function: WireFunctionCall,
}

fn function_kind() -> String {
    "function".to_string()
}

#[derive(Serialize, Deserialize)]
struct WireFunctionCall {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Deserialize)]
struct WireResponse {
    #[serde(default)]
    choices: Vec<WireChoice>,
    usage: Option<TokenUsage>,
}

#[derive(Deserialize)]
struct WireChoice {
    message: WireResponseMessage,
}

#[derive(Deserialize)]
struct WireResponseMessage {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<WireToolCall>,
}

#[derive(Deserialize)]
struct WireErrorBody {
    error: WireErrorDetail,
}

#[derive(Deserialize)]
struct WireErrorDetail {
    message: String,
}
