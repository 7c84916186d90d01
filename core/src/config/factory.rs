//! Pluggable producers of interface configuration.
//!
//! Input adapters (annotation scanners, property files, XML) implement
//! `InterfaceConfigFactory`. Whatever they return is checked by `validate`
//! before any proxy is built on it.

use crate::config::builder::{InterfaceConfigBuilder, SharedContext};
use crate::config::{read, InterfaceConfig};
use crate::error::ProxyError;
use crate::types::InterfaceDescriptor;

pub trait InterfaceConfigFactory: Send + Sync {
    fn new_config(
        &self,
        descriptor: &InterfaceDescriptor,
        context: &SharedContext,
    ) -> Result<InterfaceConfig, ProxyError>;
}

/// Adapter-free factory: starts a builder with one sub-builder per method and
/// lets `configure` fill it in, then resolves it with defaults.
pub struct BuilderConfigFactory<F> {
    configure: F,
}

impl<F> BuilderConfigFactory<F>
where
    F: Fn(&InterfaceDescriptor, &mut InterfaceConfigBuilder) -> Result<(), ProxyError> + Send + Sync,
{
    pub fn new(configure: F) -> Self {
        Self { configure }
    }
}

impl<F> InterfaceConfigFactory for BuilderConfigFactory<F>
where
    F: Fn(&InterfaceDescriptor, &mut InterfaceConfigBuilder) -> Result<(), ProxyError> + Send + Sync,
{
    fn new_config(
        &self,
        descriptor: &InterfaceDescriptor,
        context: &SharedContext,
    ) -> Result<InterfaceConfig, ProxyError> {
        let mut builder = InterfaceConfigBuilder::for_descriptor(descriptor, context.clone());
        (self.configure)(descriptor, &mut builder)?;
        builder.build(true)
    }
}

/// Every described method must have a configuration with at least one
/// parameter entry per declared argument.
pub fn validate(descriptor: &InterfaceDescriptor, config: &InterfaceConfig) -> Result<(), ProxyError> {
    for method in &descriptor.methods {
        let target = format!("{}.{}", descriptor.name, method.id);
        let cell = config
            .method(&method.id)
            .ok_or_else(|| ProxyError::config(&target, "method has no configuration"))?;
        let method_config = read(cell);
        if method_config.param_count() < method.id.arity() {
            return Err(ProxyError::config(
                &target,
                format!(
                    "{} parameter configurations for {} declared parameters",
                    method_config.param_count(),
                    method.id.arity()
                ),
            ));
        }
    }
    Ok(())
}
