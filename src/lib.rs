//! pb-dispatch - privileged dispatch layer for a pluggable phonebook provider
//!
//! Callers hand the dispatcher raw addresses in their own address space. The
//! dispatcher pins the provider registered as `"phonebook"`, resolves the
//! named handler, stages the caller's data in zeroed trusted buffers, invokes
//! the handler and unpins, releasing everything it acquired on every exit
//! path.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use pb_dispatch::{Access, Dispatcher, FixedRecord, MemoryPhonebook, Provider,
//!                   ProviderRegistry, UserSpace, RECORD_SIZE};
//!
//! let registry = Arc::new(ProviderRegistry::new());
//! registry
//!     .register(Provider::from_backend("phonebook", Arc::new(MemoryPhonebook::new())))
//!     .unwrap();
//! let dispatcher = Dispatcher::new(Arc::clone(&registry));
//!
//! let mem = UserSpace::new();
//! let anna = FixedRecord::new("Anna", "Ivanova", 30, "+70000000000", "anna@example.com");
//! let rec = mem.map(&anna.to_bytes(), Access::ReadOnly);
//! assert_eq!(dispatcher.add(&mem, rec), Ok(0));
//!
//! let key = mem.map(b"Ivanova", Access::ReadOnly);
//! let out = mem.map_zeroed(RECORD_SIZE, Access::ReadWrite);
//! assert_eq!(dispatcher.get(&mem, key, 7, out), Ok(0));
//! assert_eq!(registry.pin_count("phonebook"), Some(0));
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐
//! │  caller memory   │  UserPtr + length, validated on every access
//! └────────┬─────────┘
//!          │
//!          ▼
//! ┌──────────────────┐     ┌──────────────────┐
//! │    Dispatcher    │────▶│ ProviderRegistry │  pin / unpin, drain on unload
//! └────────┬─────────┘     └──────────────────┘
//!          │
//!     ┌────┴─────┐
//!     ▼          ▼
//! ┌────────┐  ┌──────────┐
//! │Resolver│  │Marshaller│  charged, zeroed staging buffers
//! └───┬────┘  └──────────┘
//!     │
//!     ▼
//! ┌──────────────────┐
//! │     Provider     │  in-process backend or native library
//! └──────────────────┘
//! ```

pub mod config;
pub mod dispatch;
pub mod error;
pub mod host;
pub mod marshal;
pub mod memory;
pub mod native;
pub mod provider;
pub mod record;
pub mod registry;
pub mod resolver;

pub use config::{ConfigError, DispatchConfig, HandlerNames};
pub use dispatch::Dispatcher;
pub use error::{into_return_code, DispatchError, DispatchResult};
pub use host::{HostError, ProviderHost};
pub use marshal::{Access, CallerMemory, MarshalError, Marshaller, UserPtr, UserSpace};
pub use memory::{MemoryPhonebook, PB_NOT_FOUND, PB_OK};
pub use native::{load_provider, NativeError};
pub use provider::{
    Handler, HandlerKind, PhonebookBackend, Provider, ADD_HANDLER, DELETE_HANDLER, GET_HANDLER,
    PHONEBOOK_PROVIDER,
};
pub use record::{FixedRecord, RECORD_SIZE};
pub use registry::{ProviderPin, ProviderRegistry, ProviderState, RegistryError};
pub use resolver::{resolve, ResolveError};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
