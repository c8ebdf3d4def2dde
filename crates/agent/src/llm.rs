use async_trait::async_trait;
use plugboard_core::{CapabilityDescriptor, UpstreamError};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::conversation::ChatMessage;

pub type LlmError = UpstreamError;

/// A function the model may call, in the shape chat completion APIs expect.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl ToolDefinition {
    pub fn from_descriptor(descriptor: &CapabilityDescriptor) -> Self {
        Self {
            name: descriptor.qualified_name(),
            description: descriptor.description.clone(),
            parameters: descriptor.parameters_schema(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolDefinition>,
    pub temperature: Option<f32>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ChatResponse {
    pub message: ChatMessage,
    pub usage: Option<TokenUsage>,
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, LlmError>;
}
