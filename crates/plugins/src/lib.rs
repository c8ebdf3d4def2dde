//! Plugins - the capabilities plugboard ships with
//!
//! Each plugin owns its state and exposes a fixed set of capabilities under
//! its plugin name:
//! - `lights`: in-memory smart light mock
//! - `software_builder`: five staged steps used by the rejection demo
//! - `fitness`: Google Fitness aggregate queries
//! - `notes`: Google Keep note listing

use std::future::Future;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use plugboard_agent::{CapabilityHandler, CapabilityRegistry};
use plugboard_core::config::PluginsConfig;
use plugboard_core::{CapabilityDescriptor, CapabilityError, InvocationArguments};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tracing::info;

pub mod fitness;
mod http;
pub mod lights;
pub mod notes;
pub mod software_builder;

pub use fitness::FitnessPlugin;
pub use lights::LightsPlugin;
pub use notes::NotesPlugin;
pub use software_builder::SoftwareBuilderPlugin;

/// A capability descriptor paired with the code that serves it.
pub type Capability = (CapabilityDescriptor, Arc<dyn CapabilityHandler>);

pub trait Plugin: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    /// Descriptors are given without a plugin; `register_plugin` assigns it.
    fn capabilities(self: Arc<Self>) -> Vec<Capability>;
}

/// Arguments for capabilities that take none.
#[derive(Debug, Default, Deserialize)]
pub struct NoArguments {}

/// Adapts a typed async method into a registry handler. Arguments are decoded
/// into `I` before `call` runs; decoding failures become handler errors.
pub fn typed_handler<P, I, F, Fut>(plugin: &Arc<P>, call: F) -> Arc<dyn CapabilityHandler>
where
    P: Send + Sync + 'static,
    I: DeserializeOwned + Send + 'static,
    F: Fn(Arc<P>, I) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    let plugin = plugin.clone();
    Arc::new(move |arguments: InvocationArguments| {
        let prepared = serde_json::from_value::<I>(Value::Object(arguments))
            .map(|input| call(plugin.clone(), input));
        async move {
            let pending = prepared.map_err(|error| anyhow!("could not decode arguments: {error}"))?;
            pending.await
        }
    })
}

pub fn register_plugin<P: Plugin>(
    registry: &mut CapabilityRegistry,
    plugin: Arc<P>,
) -> Result<usize, CapabilityError> {
    let name = plugin.name();
    let capabilities = plugin.capabilities();
    let count = capabilities.len();
    for (descriptor, handler) in capabilities {
        registry.register_shared(descriptor.in_plugin(name), handler)?;
    }

    info!(event_name = "plugin.registered", plugin = name, capabilities = count, "plugin registered");
    Ok(count)
}

/// Registers every plugin enabled in configuration.
pub fn registry_from_config(config: &PluginsConfig) -> Result<CapabilityRegistry> {
    let mut registry = CapabilityRegistry::new();

    if config.lights.enabled {
        register_plugin(&mut registry, Arc::new(LightsPlugin::new()))?;
    }
    if config.software_builder.enabled {
        register_plugin(&mut registry, Arc::new(SoftwareBuilderPlugin))?;
    }
    if config.fitness.enabled {
        let plugin = FitnessPlugin::from_config(&config.fitness)
            .context("failed to initialize fitness plugin")?;
        register_plugin(&mut registry, Arc::new(plugin))?;
    }
    if config.notes.enabled {
        let plugin =
            NotesPlugin::from_config(&config.notes).context("failed to initialize notes plugin")?;
        register_plugin(&mut registry, Arc::new(plugin))?;
    }

    Ok(registry)
}

/// Registry holding only the software builder, as used by the rejection demo.
pub fn software_builder_registry() -> Result<CapabilityRegistry, CapabilityError> {
    let mut registry = CapabilityRegistry::new();
    register_plugin(&mut registry, Arc::new(SoftwareBuilderPlugin))?;
    Ok(registry)
}
