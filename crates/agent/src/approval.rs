//! Approval services decide whether a requested invocation may run.
//!
//! Every implementation answers the same question for one request at a time,
//! and nothing here remembers earlier answers: identical repeated calls are
//! decided again from scratch.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use plugboard_core::config::{ApprovalConfig, ApprovalMode};
use plugboard_core::{
    evaluate_rules, ApprovalDecision, ApprovalRule, CapabilityDescriptor, InvocationArguments,
    RuleEffect,
};
use tracing::warn;

#[async_trait]
pub trait ApprovalService: Send + Sync {
    /// May suspend for as long as the underlying policy needs (a person
    /// typing an answer, for instance). Must never approve by default.
    async fn decide(
        &self,
        descriptor: &CapabilityDescriptor,
        arguments: &InvocationArguments,
    ) -> ApprovalDecision;
}

#[async_trait]
impl<S> ApprovalService for Arc<S>
where
    S: ApprovalService + ?Sized,
{
    async fn decide(
        &self,
        descriptor: &CapabilityDescriptor,
        arguments: &InvocationArguments,
    ) -> ApprovalDecision {
        (**self).decide(descriptor, arguments).await
    }
}

/// Fixed answer, for tests and unattended runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StaticApproval {
    decision: ApprovalDecision,
}

impl StaticApproval {
    pub fn always_allow() -> Self {
        Self { decision: ApprovalDecision::Approve }
    }

    pub fn always_deny() -> Self {
        Self { decision: ApprovalDecision::Deny }
    }
}

#[async_trait]
impl ApprovalService for StaticApproval {
    async fn decide(
        &self,
        _descriptor: &CapabilityDescriptor,
        _arguments: &InvocationArguments,
    ) -> ApprovalDecision {
        self.decision
    }
}

/// Ordered argument predicates; the first rule that applies decides.
#[derive(Clone, Debug, Default)]
pub struct RuleBasedApproval {
    rules: Vec<ApprovalRule>,
    default_effect: RuleEffect,
}

impl RuleBasedApproval {
    pub fn new(rules: Vec<ApprovalRule>, default_effect: RuleEffect) -> Self {
        Self { rules, default_effect }
    }

    pub fn from_config(config: &ApprovalConfig) -> Self {
        Self::new(config.rules.clone(), config.default_effect)
    }
}

#[async_trait]
impl ApprovalService for RuleBasedApproval {
    async fn decide(
        &self,
        descriptor: &CapabilityDescriptor,
        arguments: &InvocationArguments,
    ) -> ApprovalDecision {
        evaluate_rules(&self.rules, self.default_effect, descriptor, arguments)
    }
}

/// Denies when the wrapped service does not answer in time.
#[derive(Clone, Debug)]
pub struct TimeoutApproval<S> {
    inner: S,
    timeout: Duration,
}

impl<S> TimeoutApproval<S> {
    pub fn new(inner: S, timeout: Duration) -> Self {
        Self { inner, timeout }
    }
}

#[async_trait]
impl<S> ApprovalService for TimeoutApproval<S>
where
    S: ApprovalService,
{
    async fn decide(
        &self,
        descriptor: &CapabilityDescriptor,
        arguments: &InvocationArguments,
    ) -> ApprovalDecision {
        match tokio::time::timeout(self.timeout, self.inner.decide(descriptor, arguments)).await {
            Ok(decision) => decision,
            Err(_) => {
                warn!(
                    event_name = "agent.approval.timed_out",
                    capability = descriptor.qualified_name().as_str(),
                    timeout_ms = self.timeout.as_millis() as u64,
                    "approval timed out; denying invocation"
                );
                ApprovalDecision::Deny
            }
        }
    }
}

/// Builds the configured approval service. `interactive` is only consulted in
/// interactive mode.
pub fn from_config(
    config: &ApprovalConfig,
    interactive: Arc<dyn ApprovalService>,
) -> Arc<dyn ApprovalService> {
    let service: Arc<dyn ApprovalService> = match config.mode {
        ApprovalMode::Interactive => interactive,
        ApprovalMode::AllowAll => Arc::new(StaticApproval::always_allow()),
        ApprovalMode::DenyAll => Arc::new(StaticApproval::always_deny()),
        ApprovalMode::Rules => Arc::new(RuleBasedApproval::from_config(config)),
    };

    if config.timeout_secs == 0 {
        service
    } else {
        Arc::new(TimeoutApproval::new(service, Duration::from_secs(config.timeout_secs)))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use plugboard_core::config::{ApprovalConfig, ApprovalMode};
    use plugboard_core::{
        ApprovalDecision, ApprovalRule, CapabilityDescriptor, InvocationArguments, RuleCondition,
        RuleEffect,
    };
    use serde_json::json;

    use super::{from_config, ApprovalService, RuleBasedApproval, StaticApproval, TimeoutApproval};

    struct NeverAnswers;

    #[async_trait]
    impl ApprovalService for NeverAnswers {
        async fn decide(
            &self,
            _descriptor: &CapabilityDescriptor,
            _arguments: &InvocationArguments,
        ) -> ApprovalDecision {
            std::future::pending::<()>().await;
            ApprovalDecision::Approve
        }
    }

    fn change_state() -> CapabilityDescriptor {
        CapabilityDescriptor::new("change_state", "Changes the state of the light")
            .in_plugin("lights")
    }

    fn approval_config(mode: ApprovalMode, timeout_secs: u64) -> ApprovalConfig {
        ApprovalConfig { mode, timeout_secs, default_effect: RuleEffect::Deny, rules: Vec::new() }
    }

    #[tokio::test]
    async fn static_stubs_return_fixed_decisions() {
        let descriptor = change_state();
        let arguments = InvocationArguments::new();
        assert_eq!(
            StaticApproval::always_allow().decide(&descriptor, &arguments).await,
            ApprovalDecision::Approve
        );
        assert_eq!(
            StaticApproval::always_deny().decide(&descriptor, &arguments).await,
            ApprovalDecision::Deny
        );
    }

    #[tokio::test]
    async fn rule_based_policy_evaluates_argument_predicates() {
        let policy = RuleBasedApproval::new(
            vec![ApprovalRule::new("lights-change_state", RuleEffect::Allow).when(
                RuleCondition::AtMost { argument: "id".to_string(), max: 2.0 },
            )],
            RuleEffect::Deny,
        );
        let descriptor = change_state();

        let mut low = InvocationArguments::new();
        low.insert("id".to_string(), json!(1));
        let mut high = InvocationArguments::new();
        high.insert("id".to_string(), json!(3));

        assert_eq!(policy.decide(&descriptor, &low).await, ApprovalDecision::Approve);
        assert_eq!(policy.decide(&descriptor, &high).await, ApprovalDecision::Deny);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_denies_when_no_answer_arrives() {
        let service = TimeoutApproval::new(NeverAnswers, Duration::from_secs(30));
        let decision = service.decide(&change_state(), &InvocationArguments::new()).await;
        assert_eq!(decision, ApprovalDecision::Deny);
    }

    #[tokio::test]
    async fn timeout_passes_through_prompt_answers() {
        let service =
            TimeoutApproval::new(StaticApproval::always_allow(), Duration::from_secs(30));
        let decision = service.decide(&change_state(), &InvocationArguments::new()).await;
        assert_eq!(decision, ApprovalDecision::Approve);
    }

    #[tokio::test]
    async fn from_config_selects_service_by_mode() {
        let interactive: Arc<dyn ApprovalService> = Arc::new(StaticApproval::always_allow());
        let descriptor = change_state();
        let arguments = InvocationArguments::new();

        let deny_all = from_config(&approval_config(ApprovalMode::DenyAll, 0), interactive.clone());
        assert_eq!(deny_all.decide(&descriptor, &arguments).await, ApprovalDecision::Deny);

        let prompt = from_config(&approval_config(ApprovalMode::Interactive, 5), interactive);
        assert_eq!(prompt.decide(&descriptor, &arguments).await, ApprovalDecision::Approve);
    }
}
