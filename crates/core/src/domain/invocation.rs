use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::capability::CapabilityDescriptor;
use crate::errors::CapabilityError;

/// Named arguments for one invocation. Keys are unique and keep the order
/// the model produced them in.
pub type InvocationArguments = Map<String, Value>;

/// Reason attached to every outcome the approval gate rejects.
pub const REJECTION_REASON: &str = "Operation was rejected.";

/// One concrete attempt to run a capability.
#[derive(Clone, Debug)]
pub struct InvocationRequest {
    pub descriptor: Arc<CapabilityDescriptor>,
    pub arguments: InvocationArguments,
    pub call_id: Option<String>,
}

impl InvocationRequest {
    pub fn new(descriptor: Arc<CapabilityDescriptor>, arguments: InvocationArguments) -> Self {
        Self { descriptor, arguments, call_id: None }
    }

    pub fn with_call_id(mut self, call_id: impl Into<String>) -> Self {
        self.call_id = Some(call_id.into());
        self
    }

    /// Checks the arguments against the descriptor's parameter list.
    pub fn validate(&self) -> Result<(), CapabilityError> {
        let descriptor = &self.descriptor;
        for parameter in &descriptor.parameters {
            match self.arguments.get(&parameter.name) {
                None | Some(Value::Null) if parameter.required => {
                    return Err(CapabilityError::InvalidArguments {
                        name: descriptor.qualified_name(),
                        reason: format!("missing required argument `{}`", parameter.name),
                    });
                }
                None | Some(Value::Null) => {}
                Some(value) if !parameter.kind.accepts(value) => {
                    return Err(CapabilityError::InvalidArguments {
                        name: descriptor.qualified_name(),
                        reason: format!(
                            "argument `{}` must be of type {}",
                            parameter.name,
                            parameter.kind.as_str()
                        ),
                    });
                }
                Some(_) => {}
            }
        }

        if let Some(unknown) =
            self.arguments.keys().find(|key| descriptor.parameter(key.as_str()).is_none())
        {
            return Err(CapabilityError::InvalidArguments {
                name: descriptor.qualified_name(),
                reason: format!("unexpected argument `{unknown}`"),
            });
        }

        Ok(())
    }
}

/// Result of passing a request through the invocation pipeline.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum InvocationOutcome {
    Executed(Value),
    Rejected(String),
}

impl InvocationOutcome {
    pub fn rejected() -> Self {
        Self::Rejected(REJECTION_REASON.to_string())
    }

    pub fn is_executed(&self) -> bool {
        matches!(self, Self::Executed(_))
    }

    /// Text handed back to the model as the function result.
    pub fn to_result_text(&self) -> String {
        match self {
            Self::Executed(Value::String(text)) => text.clone(),
            Self::Executed(value) => value.to_string(),
            Self::Rejected(reason) => reason.clone(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalDecision {
    Approve,
    Deny,
}

impl ApprovalDecision {
    pub fn is_approved(&self) -> bool {
        matches!(self, Self::Approve)
    }
}

impl From<bool> for ApprovalDecision {
    fn from(approved: bool) -> Self {
        if approved {
            Self::Approve
        } else {
            Self::Deny
        }
    }
}

impl fmt::Display for ApprovalDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Approve => f.write_str("approve"),
            Self::Deny => f.write_str("deny"),
        }
    }
}

/// Renders an argument value the way a person reads it: strings unquoted,
/// everything else as compact JSON.
pub fn display_argument_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
