//! Provider capability interface
//!
//! A provider hands the registry a fixed table of named handlers when it is
//! loaded. Resolution is a lookup by string key into that table.
//!
//! # Example
//!
//! ```rust
//! use pb_dispatch::provider::{Provider, ADD_HANDLER};
//! use pb_dispatch::record::FixedRecord;
//!
//! let provider = Provider::builder("phonebook")
//!     .add_handler(ADD_HANDLER, |_record: &FixedRecord| 0)
//!     .build();
//! assert!(provider.handlers().contains(ADD_HANDLER));
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::record::FixedRecord;

/// Registry identifier of the phonebook provider
pub const PHONEBOOK_PROVIDER: &str = "phonebook";
/// Exported name of the create-record handler
pub const ADD_HANDLER: &str = "addHandler";
/// Exported name of the lookup-by-key handler
pub const GET_HANDLER: &str = "getHandler";
/// Exported name of the delete-by-key handler
pub const DELETE_HANDLER: &str = "deleteHandler";

/// `addHandler(record) -> code`
pub type AddFn = Arc<dyn Fn(&FixedRecord) -> i64 + Send + Sync>;
/// `getHandler(key, out) -> code`; the key length is `key.len()`
pub type GetFn = Arc<dyn Fn(&[u8], &mut FixedRecord) -> i64 + Send + Sync>;
/// `deleteHandler(key) -> code`
pub type DeleteFn = Arc<dyn Fn(&[u8]) -> i64 + Send + Sync>;

/// Signature family of a handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandlerKind {
    Add,
    Get,
    Delete,
}

impl fmt::Display for HandlerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandlerKind::Add => write!(f, "add"),
            HandlerKind::Get => write!(f, "get"),
            HandlerKind::Delete => write!(f, "delete"),
        }
    }
}

/// A callable exported by a provider.
#[derive(Clone)]
pub enum Handler {
    Add(AddFn),
    Get(GetFn),
    Delete(DeleteFn),
}

impl Handler {
    pub fn kind(&self) -> HandlerKind {
        match self {
            Handler::Add(_) => HandlerKind::Add,
            Handler::Get(_) => HandlerKind::Get,
            Handler::Delete(_) => HandlerKind::Delete,
        }
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Handler").field(&self.kind()).finish()
    }
}

/// Named handlers exported by one provider.
#[derive(Debug, Clone, Default)]
pub struct HandlerTable {
    handlers: HashMap<String, Handler>,
}

impl HandlerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Export `handler` under `name`, returning any handler it replaces.
    pub fn insert(&mut self, name: impl Into<String>, handler: Handler) -> Option<Handler> {
        self.handlers.insert(name.into(), handler)
    }

    pub fn get(&self, name: &str) -> Option<&Handler> {
        self.handlers.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.handlers.keys().map(|s| s.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// The storage side of a phonebook, expressed as plain methods.
///
/// `Provider::from_backend` exports these under the standard handler names.
pub trait PhonebookBackend: Send + Sync + 'static {
    fn add(&self, record: &FixedRecord) -> i64;
    fn get(&self, key: &[u8], out: &mut FixedRecord) -> i64;
    fn delete(&self, key: &[u8]) -> i64;
}

/// A loaded provider: its registry name plus its exported handler table.
///
/// Cloning is cheap; clones share the same table.
#[derive(Clone)]
pub struct Provider {
    name: Arc<str>,
    handlers: Arc<HandlerTable>,
}

impl Provider {
    pub fn new(name: impl Into<String>, handlers: HandlerTable) -> Self {
        Self {
            name: Arc::from(name.into()),
            handlers: Arc::new(handlers),
        }
    }

    pub fn builder(name: impl Into<String>) -> ProviderBuilder {
        ProviderBuilder {
            name: name.into(),
            handlers: HandlerTable::new(),
        }
    }

    /// Export a backend's three operations under the standard handler names.
    pub fn from_backend<B: PhonebookBackend>(name: impl Into<String>, backend: Arc<B>) -> Self {
        let add = Arc::clone(&backend);
        let get = Arc::clone(&backend);
        let delete = backend;
        Self::builder(name)
            .add_handler(ADD_HANDLER, move |record: &FixedRecord| add.add(record))
            .get_handler(GET_HANDLER, move |key: &[u8], out: &mut FixedRecord| {
                get.get(key, out)
            })
            .delete_handler(DELETE_HANDLER, move |key: &[u8]| delete.delete(key))
            .build()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn handlers(&self) -> &HandlerTable {
        &self.handlers
    }
}

impl fmt::Debug for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Provider")
            .field("name", &self.name)
            .field("handlers", &self.handlers.names())
            .finish()
    }
}

/// Builder for a provider's handler table
pub struct ProviderBuilder {
    name: String,
    handlers: HandlerTable,
}

impl ProviderBuilder {
    pub fn add_handler<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&FixedRecord) -> i64 + Send + Sync + 'static,
    {
        self.handlers.insert(name, Handler::Add(Arc::new(f)));
        self
    }

    pub fn get_handler<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&[u8], &mut FixedRecord) -> i64 + Send + Sync + 'static,
    {
        self.handlers.insert(name, Handler::Get(Arc::new(f)));
        self
    }

    pub fn delete_handler<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&[u8]) -> i64 + Send + Sync + 'static,
    {
        self.handlers.insert(name, Handler::Delete(Arc::new(f)));
        self
    }

    /// Export an already-built handler, e.g. one backed by a native symbol.
    pub fn handler(mut self, name: impl Into<String>, handler: Handler) -> Self {
        self.handlers.insert(name, handler);
        self
    }

    pub fn build(self) -> Provider {
        Provider::new(self.name, self.handlers)
    }
}
