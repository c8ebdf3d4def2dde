use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::capability::CapabilityDescriptor;
use super::invocation::{ApprovalDecision, InvocationArguments};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleEffect {
    Allow,
    #[default]
    Deny,
}

impl From<RuleEffect> for ApprovalDecision {
    fn from(effect: RuleEffect) -> Self {
        match effect {
            RuleEffect::Allow => Self::Approve,
            RuleEffect::Deny => Self::Deny,
        }
    }
}

/// Predicate over the concrete arguments of an invocation.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuleCondition {
    #[default]
    Always,
    Equals { argument: String, value: Value },
    AtMost { argument: String, max: f64 },
    Present { argument: String },
}

impl RuleCondition {
    pub fn holds(&self, arguments: &InvocationArguments) -> bool {
        match self {
            Self::Always => true,
            Self::Equals { argument, value } => arguments.get(argument) == Some(value),
            Self::AtMost { argument, max } => arguments
                .get(argument)
                .and_then(Value::as_f64)
                .is_some_and(|actual| actual <= *max),
            Self::Present { argument } => {
                arguments.get(argument).is_some_and(|value| !value.is_null())
            }
        }
    }
}

/// One entry of a rule-based approval policy.
///
/// `capability` is an exact qualified name or a prefix ending in `*`
/// (`*`, `lights-*`, `lights-get_*`).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRule {
    pub capability: String,
    #[serde(default)]
    pub when: RuleCondition,
    pub effect: RuleEffect,
}

impl ApprovalRule {
    pub fn new(capability: impl Into<String>, effect: RuleEffect) -> Self {
        Self { capability: capability.into(), when: RuleCondition::Always, effect }
    }

    pub fn when(mut self, condition: RuleCondition) -> Self {
        self.when = condition;
        self
    }

    pub fn covers(&self, descriptor: &CapabilityDescriptor) -> bool {
        let pattern = self.capability.trim();
        let qualified = descriptor.qualified_name();
        match pattern.strip_suffix('*') {
            Some(prefix) => qualified.starts_with(prefix),
            None => qualified == pattern,
        }
    }

    pub fn applies(
        &self,
        descriptor: &CapabilityDescriptor,
        arguments: &InvocationArguments,
    ) -> bool {
        self.covers(descriptor) && self.when.holds(arguments)
    }
}

/// First matching rule wins; `default_effect` applies when none match.
pub fn evaluate_rules(
    rules: &[ApprovalRule],
    default_effect: RuleEffect,
    descriptor: &CapabilityDescriptor,
    arguments: &InvocationArguments,
) -> ApprovalDecision {
    rules
        .iter()
        .find(|rule| rule.applies(descriptor, arguments))
        .map(|rule| rule.effect)
        .unwrap_or(default_effect)
        .into()
}
