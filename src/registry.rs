//! Provider registry
//!
//! Owns the lock-protected mapping from provider name to provider slot and
//! hands out pins. A pin is a counted reference that keeps its provider
//! registered; removal waits for the count to drain to zero.
//!
//! Per-provider lifecycle:
//!
//! ```text
//! register ──▶ Loaded ──unload──▶ Unloading ──pins == 0──▶ Unloaded
//!                 ▲                   │
//!                 └──drain timeout────┘
//! ```
//!
//! The registry lock covers only lookup-and-increment in `pin` and the
//! teardown check in `unload`. Resolution, marshalling and handler calls all
//! run outside it.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use thiserror::Error;
use tracing::{debug, warn};

use crate::error::DispatchError;
use crate::provider::Provider;

/// Registry errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("provider '{0}' is not registered")]
    NotFound(String),
    #[error("provider '{0}' is shutting down")]
    ShuttingDown(String),
    #[error("provider '{0}' is already registered")]
    AlreadyRegistered(String),
    #[error("provider '{name}' is pinned by {pins} caller(s)")]
    Busy { name: String, pins: usize },
    #[error("provider '{name}' still pinned by {pins} caller(s) after drain timeout")]
    DrainTimeout { name: String, pins: usize },
}

impl From<RegistryError> for DispatchError {
    fn from(_: RegistryError) -> Self {
        DispatchError::NotFound
    }
}

/// Lifecycle state of a registered provider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderState {
    /// Accepting pins
    Loaded,
    /// Removal requested; new pins are refused while existing ones drain
    Unloading,
    /// Removed from the registry
    Unloaded,
}

impl ProviderState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ProviderState::Loaded,
            1 => ProviderState::Unloading,
            _ => ProviderState::Unloaded,
        }
    }
}

struct ProviderSlot {
    provider: Provider,
    pins: AtomicUsize,
    state: AtomicU8,
}

// SeqCst on both atomics: unpin decrements then reads the state, unload
// stores the state then reads the count. Either side must see the other.
impl ProviderSlot {
    fn new(provider: Provider) -> Self {
        Self {
            provider,
            pins: AtomicUsize::new(0),
            state: AtomicU8::new(ProviderState::Loaded as u8),
        }
    }

    fn state(&self) -> ProviderState {
        ProviderState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: ProviderState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    fn pins(&self) -> usize {
        self.pins.load(Ordering::SeqCst)
    }
}

/// Registry of loaded providers.
pub struct ProviderRegistry {
    providers: Mutex<HashMap<String, Arc<ProviderSlot>>>,
    drained: Condvar,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self {
            providers: Mutex::new(HashMap::new()),
            drained: Condvar::new(),
        }
    }

    /// Register a provider under its own name.
    pub fn register(&self, provider: Provider) -> Result<(), RegistryError> {
        let mut providers = self.providers.lock();
        let name = provider.name().to_string();
        if providers.contains_key(&name) {
            return Err(RegistryError::AlreadyRegistered(name));
        }
        debug!(provider = %name, handlers = provider.handlers().len(), "provider registered");
        providers.insert(name, Arc::new(ProviderSlot::new(provider)));
        Ok(())
    }

    /// Pin the provider registered under `name`.
    ///
    /// The count is incremented while the registry lock is held, so a
    /// concurrent unload can never observe zero and remove the provider
    /// between the lookup and the increment.
    pub fn pin(&self, name: &str) -> Result<ProviderPin<'_>, RegistryError> {
        let providers = self.providers.lock();
        let slot = providers
            .get(name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
        if slot.state() != ProviderState::Loaded {
            return Err(RegistryError::ShuttingDown(name.to_string()));
        }
        let pins = slot.pins.fetch_add(1, Ordering::SeqCst) + 1;
        let slot = Arc::clone(slot);
        drop(providers);

        debug!(provider = name, pins, "pinned");
        Ok(ProviderPin {
            registry: self,
            slot,
        })
    }

    fn unpin_slot(&self, slot: &ProviderSlot) {
        let prev = slot.pins.fetch_sub(1, Ordering::SeqCst);
        debug!(provider = slot.provider.name(), pins = prev - 1, "unpinned");
        if prev == 1 && slot.state() == ProviderState::Unloading {
            // Taking the lock orders this wakeup after the waiter's check.
            let _providers = self.providers.lock();
            self.drained.notify_all();
        }
    }

    /// Current pin count, or `None` if `name` is not registered.
    pub fn pin_count(&self, name: &str) -> Option<usize> {
        self.providers.lock().get(name).map(|slot| slot.pins())
    }

    /// Lifecycle state; `Unloaded` once removed.
    pub fn state(&self, name: &str) -> ProviderState {
        self.providers
            .lock()
            .get(name)
            .map(|slot| slot.state())
            .unwrap_or(ProviderState::Unloaded)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.providers.lock().contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.providers.lock().keys().cloned().collect()
    }

    /// Remove `name` only if nobody holds a pin right now.
    pub fn try_unload(&self, name: &str) -> Result<Provider, RegistryError> {
        let mut providers = self.providers.lock();
        let slot = providers
            .get(name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
        if slot.state() != ProviderState::Loaded {
            return Err(RegistryError::ShuttingDown(name.to_string()));
        }
        let pins = slot.pins();
        if pins > 0 {
            return Err(RegistryError::Busy {
                name: name.to_string(),
                pins,
            });
        }
        let slot = providers
            .remove(name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
        slot.set_state(ProviderState::Unloaded);
        debug!(provider = name, "provider removed");
        Ok(slot.provider.clone())
    }

    /// Remove `name`, blocking until every pin has been released.
    pub fn unload(&self, name: &str) -> Result<Provider, RegistryError> {
        self.drain_and_remove(name, None)
    }

    /// Like `unload`, but gives up after `timeout`. On timeout the provider
    /// goes back to `Loaded` and keeps serving calls.
    pub fn unload_timeout(&self, name: &str, timeout: Duration) -> Result<Provider, RegistryError> {
        self.drain_and_remove(name, Some(Instant::now() + timeout))
    }

    fn drain_and_remove(
        &self,
        name: &str,
        deadline: Option<Instant>,
    ) -> Result<Provider, RegistryError> {
        let mut providers = self.providers.lock();
        let slot = providers
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
        if slot.state() != ProviderState::Loaded {
            return Err(RegistryError::ShuttingDown(name.to_string()));
        }
        slot.set_state(ProviderState::Unloading);
        debug!(provider = name, pins = slot.pins(), "unloading");

        while slot.pins() > 0 {
            match deadline {
                Some(deadline) => {
                    let timed_out = self.drained.wait_until(&mut providers, deadline).timed_out();
                    if timed_out && slot.pins() > 0 {
                        slot.set_state(ProviderState::Loaded);
                        let pins = slot.pins();
                        warn!(provider = name, pins, "drain timed out, provider stays loaded");
                        return Err(RegistryError::DrainTimeout {
                            name: name.to_string(),
                            pins,
                        });
                    }
                }
                None => self.drained.wait(&mut providers),
            }
        }

        providers.remove(name);
        slot.set_state(ProviderState::Unloaded);
        debug!(provider = name, "provider removed");
        Ok(slot.provider.clone())
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.names())
            .finish()
    }
}

/// A live pin on a registered provider.
///
/// Dropping the pin (or calling `unpin`) releases it. Anything resolved
/// through the pin borrows from it and cannot outlive it.
#[must_use = "dropping a pin releases it immediately"]
pub struct ProviderPin<'r> {
    registry: &'r ProviderRegistry,
    slot: Arc<ProviderSlot>,
}

impl<'r> ProviderPin<'r> {
    pub fn provider(&self) -> &Provider {
        &self.slot.provider
    }

    pub fn name(&self) -> &str {
        self.slot.provider.name()
    }

    /// Release the pin explicitly.
    pub fn unpin(self) {}
}

impl Drop for ProviderPin<'_> {
    fn drop(&mut self) {
        self.registry.unpin_slot(&self.slot);
    }
}

impl fmt::Debug for ProviderPin<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderPin")
            .field("provider", &self.name())
            .field("pins", &self.slot.pins())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::PHONEBOOK_PROVIDER;
    use std::sync::atomic::AtomicBool;
    use std::thread;

    fn registry_with_phonebook() -> ProviderRegistry {
        let registry = ProviderRegistry::new();
        registry
            .register(Provider::builder(PHONEBOOK_PROVIDER).build())
            .unwrap();
        registry
    }

    #[test]
    fn test_pin_unknown_name_is_not_found() {
        let registry = registry_with_phonebook();
        let err = registry.pin("addressbook").unwrap_err();
        assert_eq!(err, RegistryError::NotFound("addressbook".to_string()));
        assert_eq!(registry.pin_count(PHONEBOOK_PROVIDER), Some(0));
        assert_eq!(registry.pin_count("addressbook"), None);
    }

    #[test]
    fn test_pins_are_counted_and_released() {
        let registry = registry_with_phonebook();
        let a = registry.pin(PHONEBOOK_PROVIDER).unwrap();
        let b = registry.pin(PHONEBOOK_PROVIDER).unwrap();
        assert_eq!(registry.pin_count(PHONEBOOK_PROVIDER), Some(2));
        assert_eq!(a.name(), PHONEBOOK_PROVIDER);

        a.unpin();
        assert_eq!(registry.pin_count(PHONEBOOK_PROVIDER), Some(1));
        drop(b);
        assert_eq!(registry.pin_count(PHONEBOOK_PROVIDER), Some(0));
    }

    #[test]
    fn test_register_twice_is_rejected() {
        let registry = registry_with_phonebook();
        let err = registry
            .register(Provider::builder(PHONEBOOK_PROVIDER).build())
            .unwrap_err();
        assert!(matches!(err, RegistryError::AlreadyRegistered(_)));
    }

    #[test]
    fn test_try_unload_refuses_while_pinned() {
        let registry = registry_with_phonebook();
        let pin = registry.pin(PHONEBOOK_PROVIDER).unwrap();

        let err = registry.try_unload(PHONEBOOK_PROVIDER).unwrap_err();
        assert_eq!(
            err,
            RegistryError::Busy {
                name: PHONEBOOK_PROVIDER.to_string(),
                pins: 1
            }
        );
        assert_eq!(registry.state(PHONEBOOK_PROVIDER), ProviderState::Loaded);

        drop(pin);
        let provider = registry.try_unload(PHONEBOOK_PROVIDER).unwrap();
        assert_eq!(provider.name(), PHONEBOOK_PROVIDER);
        assert!(!registry.contains(PHONEBOOK_PROVIDER));
        assert_eq!(registry.state(PHONEBOOK_PROVIDER), ProviderState::Unloaded);
    }

    #[test]
    fn test_unload_blocks_until_pins_drain() {
        let registry = registry_with_phonebook();
        let removed = AtomicBool::new(false);
        let pin = registry.pin(PHONEBOOK_PROVIDER).unwrap();

        thread::scope(|s| {
            let unloader = s.spawn(|| {
                let provider = registry.unload(PHONEBOOK_PROVIDER);
                removed.store(true, Ordering::SeqCst);
                provider
            });

            while registry.state(PHONEBOOK_PROVIDER) != ProviderState::Unloading {
                thread::yield_now();
            }
            // Shutting down: new pins are refused, the held one stays valid.
            assert_eq!(
                registry.pin(PHONEBOOK_PROVIDER).unwrap_err(),
                RegistryError::ShuttingDown(PHONEBOOK_PROVIDER.to_string())
            );
            thread::sleep(Duration::from_millis(20));
            assert!(!removed.load(Ordering::SeqCst));
            assert_eq!(pin.provider().name(), PHONEBOOK_PROVIDER);

            drop(pin);
            assert!(unloader.join().unwrap().is_ok());
        });

        assert!(removed.load(Ordering::SeqCst));
        assert!(!registry.contains(PHONEBOOK_PROVIDER));
    }

    #[test]
    fn test_unload_timeout_reverts_to_loaded() {
        let registry = registry_with_phonebook();
        let pin = registry.pin(PHONEBOOK_PROVIDER).unwrap();

        let err = registry
            .unload_timeout(PHONEBOOK_PROVIDER, Duration::from_millis(10))
            .unwrap_err();
        assert_eq!(
            err,
            RegistryError::DrainTimeout {
                name: PHONEBOOK_PROVIDER.to_string(),
                pins: 1
            }
        );
        assert_eq!(registry.state(PHONEBOOK_PROVIDER), ProviderState::Loaded);

        let second = registry.pin(PHONEBOOK_PROVIDER).unwrap();
        assert_eq!(registry.pin_count(PHONEBOOK_PROVIDER), Some(2));
        drop(second);
        drop(pin);

        assert!(registry
            .unload_timeout(PHONEBOOK_PROVIDER, Duration::from_millis(10))
            .is_ok());
    }

    #[test]
    fn test_registry_error_maps_to_not_found() {
        let err: DispatchError = RegistryError::ShuttingDown("x".to_string()).into();
        assert_eq!(err, DispatchError::NotFound);
    }
}
