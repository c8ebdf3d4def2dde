//! Agent Runtime - approval-gated function calling for chat agents
//!
//! This crate is the part of plugboard that sits between the model and the
//! capabilities it may call:
//! - Keeps the registry of named capabilities and their implementations
//! - Gates every invocation on an approval decision
//! - Drives the chat loop against an OpenAI-compatible endpoint
//! - Renders the console protocol (user prompt, approval prompt, transcript)
//!
//! # Architecture
//!
//! One turn follows a constrained loop:
//! 1. **Model call** (`llm`, `openai`) - history plus tool definitions out, assistant message back
//! 2. **Resolution** (`tools`) - proposed `plugin-name` looked up, unknown names fail fast
//! 3. **Interception** (`interceptor`) - validation, then the filter chain with approval
//! 4. **Feedback** (`runtime`) - executed value, rejection reason or error text appended as tool results
//!
//! # Key Types
//!
//! - `AgentRuntime` / `AgentSession` - turn driver and interactive loop (see `runtime`)
//! - `InvocationPipeline` - the single chokepoint every call passes through
//! - `ApprovalService` - pluggable decision: console prompt, rules, or fixed stub
//!
//! # Safety Principle
//!
//! Approval fails closed. Anything other than an explicit approval, including
//! end of input and timeouts, is a rejection, and a rejected capability never
//! starts executing.

pub mod approval;
pub mod console;
pub mod conversation;
pub mod interceptor;
pub mod llm;
pub mod openai;
pub mod runtime;
pub mod tools;

pub use approval::{ApprovalService, RuleBasedApproval, StaticApproval, TimeoutApproval};
pub use console::{Console, ConsoleApproval, StdConsole};
pub use interceptor::{ApprovalFilter, InvocationFilter, InvocationPipeline, Next, TracingFilter};
pub use llm::{ChatRequest, ChatResponse, LlmClient, LlmError, TokenUsage, ToolDefinition};
pub use runtime::{AgentRuntime, AgentSession, TurnError, TurnSummary};
pub use tools::{CapabilityHandler, CapabilityRegistry, RegisteredCapability};
