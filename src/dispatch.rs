//! Dispatch entry points
//!
//! Add, Get and Delete each run one straight-line sequence:
//!
//! ```text
//! pin ─▶ resolve ─▶ copy in ─▶ invoke ─▶ [copy out] ─▶ release staging ─▶ unpin
//! ```
//!
//! The pin and every staging buffer are scoped values. Whatever step fails,
//! the values already acquired are dropped in reverse order (staging
//! newest-first, then the pin), so no exit path can leak either.

use std::sync::Arc;

use tracing::trace;

use crate::config::{DispatchConfig, HandlerNames};
use crate::error::{DispatchError, DispatchResult};
use crate::marshal::{CallerMemory, Marshaller, UserPtr};
use crate::registry::ProviderRegistry;
use crate::resolver::{resolve, AddSignature, DeleteSignature, GetSignature};

/// Forwards phonebook operations from callers to the registered provider.
#[derive(Debug)]
pub struct Dispatcher {
    registry: Arc<ProviderRegistry>,
    marshaller: Marshaller,
    provider: String,
    handlers: HandlerNames,
}

impl Dispatcher {
    /// Dispatcher using the default provider name, handler names and budget.
    pub fn new(registry: Arc<ProviderRegistry>) -> Self {
        Self::with_config(registry, &DispatchConfig::default())
    }

    pub fn with_config(registry: Arc<ProviderRegistry>, config: &DispatchConfig) -> Self {
        Self {
            registry,
            marshaller: Marshaller::new(config.staging.budget_bytes),
            provider: config.provider.name.clone(),
            handlers: config.provider.handlers.clone(),
        }
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    pub fn marshaller(&self) -> &Marshaller {
        &self.marshaller
    }

    /// Name of the provider calls are forwarded to
    pub fn provider_name(&self) -> &str {
        &self.provider
    }

    /// Add the record at `record` in caller space.
    ///
    /// Returns the provider's result code unchanged.
    pub fn add(&self, mem: &dyn CallerMemory, record: UserPtr) -> DispatchResult<i64> {
        let pin = self.registry.pin(&self.provider)?;
        let handler = resolve::<AddSignature>(&pin, &self.handlers.add)?;
        let staged = self.marshaller.copy_in_record(mem, record)?;

        let code = handler(staged.record());
        trace!(provider = pin.name(), code, "add dispatched");
        Ok(code)
    }

    /// Look up `len` key bytes at `key` and write the provider's answer to
    /// the record at `out`.
    ///
    /// If the answer cannot be written back the call fails with
    /// `FaultAccess`, whatever the provider returned.
    pub fn get(
        &self,
        mem: &dyn CallerMemory,
        key: UserPtr,
        len: u32,
        out: UserPtr,
    ) -> DispatchResult<i64> {
        // Checked before pinning: an empty key never reaches the provider.
        if len == 0 {
            return Err(DispatchError::InvalidArgument);
        }
        let pin = self.registry.pin(&self.provider)?;
        let handler = resolve::<GetSignature>(&pin, &self.handlers.get)?;
        let name = self.marshaller.copy_in_key(mem, key, len as usize)?;
        let mut staged = self.marshaller.alloc_record()?;

        let code = handler(name.as_slice(), staged.record_mut());
        self.marshaller.copy_out_record(mem, &staged, out)?;
        trace!(provider = pin.name(), code, "get dispatched");
        Ok(code)
    }

    /// Delete by the `len` key bytes at `key`.
    pub fn delete(&self, mem: &dyn CallerMemory, key: UserPtr, len: u32) -> DispatchResult<i64> {
        if len == 0 {
            return Err(DispatchError::InvalidArgument);
        }
        let pin = self.registry.pin(&self.provider)?;
        let handler = resolve::<DeleteSignature>(&pin, &self.handlers.delete)?;
        let name = self.marshaller.copy_in_key(mem, key, len as usize)?;

        let code = handler(name.as_slice());
        trace!(provider = pin.name(), code, "delete dispatched");
        Ok(code)
    }
}
