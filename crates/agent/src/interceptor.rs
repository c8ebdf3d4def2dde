//! Invocation pipeline: resolve, validate, then run a chain of filters that
//! ends in the capability implementation.
//!
//! Filters compose in the order they are added to the builder. The first
//! filter sees the request first and the outcome last. A filter that returns
//! without calling [`Next::run`] short-circuits everything after it,
//! including the implementation.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use plugboard_core::{
    CapabilityError, InvocationArguments, InvocationOutcome, InvocationRequest,
};
use tracing::{debug, info, warn};

use crate::approval::ApprovalService;
use crate::tools::{CapabilityHandler, CapabilityRegistry, RegisteredCapability};

#[async_trait]
pub trait InvocationFilter: Send + Sync {
    async fn on_invocation(
        &self,
        request: InvocationRequest,
        next: Next<'_>,
    ) -> Result<InvocationOutcome, CapabilityError>;
}

/// The rest of the chain after the current filter.
pub struct Next<'a> {
    filters: &'a [Arc<dyn InvocationFilter>],
    handler: &'a dyn CapabilityHandler,
}

impl<'a> Next<'a> {
    pub async fn run(
        self,
        request: InvocationRequest,
    ) -> Result<InvocationOutcome, CapabilityError> {
        match self.filters.split_first() {
            Some((filter, rest)) => {
                filter.on_invocation(request, Next { filters: rest, handler: self.handler }).await
            }
            None => {
                let name = request.descriptor.qualified_name();
                self.handler
                    .call(request.arguments)
                    .await
                    .map(InvocationOutcome::Executed)
                    .map_err(|error| CapabilityError::ExecutionFailed {
                        name,
                        message: format!("{error:#}"),
                    })
            }
        }
    }
}

pub struct InvocationPipeline {
    registry: Arc<CapabilityRegistry>,
    filters: Vec<Arc<dyn InvocationFilter>>,
}

pub struct InvocationPipelineBuilder {
    registry: Arc<CapabilityRegistry>,
    filters: Vec<Arc<dyn InvocationFilter>>,
}

impl InvocationPipelineBuilder {
    pub fn filter<F>(self, filter: F) -> Self
    where
        F: InvocationFilter + 'static,
    {
        self.shared_filter(Arc::new(filter))
    }

    pub fn shared_filter(mut self, filter: Arc<dyn InvocationFilter>) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn build(self) -> InvocationPipeline {
        InvocationPipeline { registry: self.registry, filters: self.filters }
    }
}

impl InvocationPipeline {
    pub fn builder(registry: impl Into<Arc<CapabilityRegistry>>) -> InvocationPipelineBuilder {
        InvocationPipelineBuilder { registry: registry.into(), filters: Vec::new() }
    }

    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    pub async fn invoke(
        &self,
        name: &str,
        plugin: Option<&str>,
        arguments: InvocationArguments,
    ) -> Result<InvocationOutcome, CapabilityError> {
        let entry = self.registry.resolve(name, plugin).inspect_err(log_unresolved)?;
        self.dispatch(entry, arguments, None).await
    }

    /// Entry point for model-proposed calls named `plugin-name`.
    pub async fn invoke_qualified(
        &self,
        qualified_name: &str,
        arguments: InvocationArguments,
        call_id: Option<&str>,
    ) -> Result<InvocationOutcome, CapabilityError> {
        let entry = self.registry.resolve_qualified(qualified_name).inspect_err(log_unresolved)?;
        self.dispatch(entry, arguments, call_id).await
    }

    async fn dispatch(
        &self,
        entry: &RegisteredCapability,
        arguments: InvocationArguments,
        call_id: Option<&str>,
    ) -> Result<InvocationOutcome, CapabilityError> {
        let mut request = InvocationRequest::new(entry.descriptor.clone(), arguments);
        if let Some(call_id) = call_id {
            request = request.with_call_id(call_id);
        }

        request.validate().inspect_err(|error| {
            warn!(
                event_name = "agent.invocation.invalid_arguments",
                capability = request.descriptor.qualified_name().as_str(),
                error = %error,
                "invocation arguments rejected before approval"
            );
        })?;

        Next { filters: &self.filters, handler: entry.handler.as_ref() }.run(request).await
    }
}

fn log_unresolved(error: &CapabilityError) {
    warn!(
        event_name = "agent.invocation.unknown_capability",
        error = %error,
        "model requested a capability that is not registered"
    );
}

/// Gates execution on an [`ApprovalService`] decision.
pub struct ApprovalFilter {
    service: Arc<dyn ApprovalService>,
}

impl ApprovalFilter {
    pub fn new(service: Arc<dyn ApprovalService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl InvocationFilter for ApprovalFilter {
    async fn on_invocation(
        &self,
        request: InvocationRequest,
        next: Next<'_>,
    ) -> Result<InvocationOutcome, CapabilityError> {
        let decision = self.service.decide(&request.descriptor, &request.arguments).await;
        if !decision.is_approved() {
            info!(
                event_name = "agent.invocation.rejected",
                capability = request.descriptor.qualified_name().as_str(),
                call_id = request.call_id.as_deref().unwrap_or_default(),
                "invocation rejected by approval service"
            );
            return Ok(InvocationOutcome::rejected());
        }

        debug!(
            event_name = "agent.invocation.approved",
            capability = request.descriptor.qualified_name().as_str(),
            "invocation approved"
        );
        next.run(request).await
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct TracingFilter;

#[async_trait]
impl InvocationFilter for TracingFilter {
    async fn on_invocation(
        &self,
        request: InvocationRequest,
        next: Next<'_>,
    ) -> Result<InvocationOutcome, CapabilityError> {
        let capability = request.descriptor.qualified_name();
        let call_id = request.call_id.clone().unwrap_or_default();
        let started = Instant::now();
        info!(
            event_name = "agent.invocation.started",
            capability = capability.as_str(),
            call_id = call_id.as_str(),
            "invocation started"
        );

        let result = next.run(request).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(outcome) => info!(
                event_name = "agent.invocation.completed",
                capability = capability.as_str(),
                call_id = call_id.as_str(),
                executed = outcome.is_executed(),
                elapsed_ms,
                "invocation completed"
            ),
            Err(error) => warn!(
                event_name = "agent.invocation.failed",
                capability = capability.as_str(),
                call_id = call_id.as_str(),
                error_class = error.error_class(),
                error = %error,
                elapsed_ms,
                "invocation failed"
            ),
        }
        result
    }
}
