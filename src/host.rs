//! Config-driven provider hosting
//!
//! Ties a `DispatchConfig` to a registry: installs the configured provider
//! (native or in-process), hands out dispatchers, and removes the provider
//! with the configured drain timeout.

use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use crate::config::{ConfigError, DispatchConfig};
use crate::dispatch::Dispatcher;
use crate::native::{self, NativeError};
use crate::provider::Provider;
use crate::registry::{ProviderRegistry, RegistryError};

/// Hosting errors
#[derive(Debug, Error)]
pub enum HostError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Native(#[from] NativeError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("provider '{found}' does not match configured name '{expected}'")]
    NameMismatch { expected: String, found: String },
}

/// A registry plus the configuration it is served with.
#[derive(Debug)]
pub struct ProviderHost {
    registry: Arc<ProviderRegistry>,
    config: DispatchConfig,
}

impl ProviderHost {
    pub fn new(config: DispatchConfig) -> Result<Self, HostError> {
        config.validate()?;
        Ok(Self {
            registry: Arc::new(ProviderRegistry::new()),
            config,
        })
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    /// Load and register the native provider named in the config.
    ///
    /// Returns false when no library is configured.
    pub fn load_configured(&self) -> Result<bool, HostError> {
        let Some(path) = &self.config.provider.library else {
            return Ok(false);
        };
        let provider = native::load_provider(
            &self.config.provider.name,
            path,
            &self.config.provider.handlers,
        )?;
        self.install(provider)?;
        Ok(true)
    }

    /// Register an in-process provider under the configured name.
    pub fn install(&self, provider: Provider) -> Result<(), HostError> {
        if provider.name() != self.config.provider.name {
            return Err(HostError::NameMismatch {
                expected: self.config.provider.name.clone(),
                found: provider.name().to_string(),
            });
        }
        self.registry.register(provider)?;
        info!(provider = %self.config.provider.name, "provider installed");
        Ok(())
    }

    /// A dispatcher forwarding to the configured provider.
    pub fn dispatcher(&self) -> Dispatcher {
        Dispatcher::with_config(Arc::clone(&self.registry), &self.config)
    }

    /// Remove the configured provider once in-flight calls drain.
    pub fn remove(&self) -> Result<Provider, HostError> {
        let name = &self.config.provider.name;
        let provider = match self.config.unload.drain_timeout() {
            Some(timeout) => self.registry.unload_timeout(name, timeout)?,
            None => self.registry.unload(name)?,
        };
        info!(provider = %name, "provider removed");
        Ok(provider)
    }
}
