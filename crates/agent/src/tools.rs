use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use plugboard_core::{split_qualified_name, CapabilityDescriptor, CapabilityError, InvocationArguments};
use serde_json::Value;

/// The code behind a registered capability.
#[async_trait]
pub trait CapabilityHandler: Send + Sync {
    async fn call(&self, arguments: InvocationArguments) -> Result<Value>;
}

#[async_trait]
impl<F, Fut> CapabilityHandler for F
where
    F: Fn(InvocationArguments) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    async fn call(&self, arguments: InvocationArguments) -> Result<Value> {
        (self)(arguments).await
    }
}

#[derive(Clone)]
pub struct RegisteredCapability {
    pub descriptor: Arc<CapabilityDescriptor>,
    pub handler: Arc<dyn CapabilityHandler>,
}

type CapabilityKey = (Option<String>, String);

/// Name-to-implementation table, filled once at startup and read-only after.
#[derive(Default, Clone)]
pub struct CapabilityRegistry {
    entries: Vec<RegisteredCapability>,
    index: HashMap<CapabilityKey, usize>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<H>(
        &mut self,
        descriptor: CapabilityDescriptor,
        handler: H,
    ) -> Result<(), CapabilityError>
    where
        H: CapabilityHandler + 'static,
    {
        self.register_shared(descriptor, Arc::new(handler))
    }

    pub fn register_shared(
        &mut self,
        descriptor: CapabilityDescriptor,
        handler: Arc<dyn CapabilityHandler>,
    ) -> Result<(), CapabilityError> {
        let key = (descriptor.plugin.clone(), descriptor.name.clone());
        if self.index.contains_key(&key) {
            return Err(CapabilityError::DuplicateCapability { name: descriptor.qualified_name() });
        }

        self.index.insert(key, self.entries.len());
        self.entries.push(RegisteredCapability { descriptor: Arc::new(descriptor), handler });
        Ok(())
    }

    pub fn resolve(
        &self,
        name: &str,
        plugin: Option<&str>,
    ) -> Result<&RegisteredCapability, CapabilityError> {
        let key = (plugin.map(str::to_string), name.to_string());
        self.index.get(&key).map(|position| &self.entries[*position]).ok_or_else(|| {
            CapabilityError::unknown(match plugin {
                Some(plugin) => format!("{plugin}-{name}"),
                None => name.to_string(),
            })
        })
    }

    /// Resolves a model-facing `plugin-name`.
    pub fn resolve_qualified(
        &self,
        qualified_name: &str,
    ) -> Result<&RegisteredCapability, CapabilityError> {
        let (plugin, name) = split_qualified_name(qualified_name);
        self.resolve(name, plugin)
            .or_else(|_| self.resolve(qualified_name, None))
            .map_err(|_| CapabilityError::unknown(qualified_name))
    }

    /// Descriptors in registration order.
    pub fn descriptors(&self) -> impl Iterator<Item = &Arc<CapabilityDescriptor>> {
        self.entries.iter().map(|entry| &entry.descriptor)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
