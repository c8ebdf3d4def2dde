pub mod config;
pub mod domain;
pub mod errors;

pub use domain::capability::{
    split_qualified_name, CapabilityDescriptor, ParameterKind, ParameterSpec,
};
pub use domain::invocation::{
    display_argument_value, ApprovalDecision, InvocationArguments, InvocationOutcome,
    InvocationRequest, REJECTION_REASON,
};
pub use domain::policy::{evaluate_rules, ApprovalRule, RuleCondition, RuleEffect};
pub use errors::{CapabilityError, UpstreamError};
