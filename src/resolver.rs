//! Handler resolution
//!
//! Looks up a handler by name in a pinned provider's table and checks it has
//! the signature the caller expects. The returned callable borrows from the
//! pin, so it cannot be invoked after the pin is released.

use thiserror::Error;

use crate::error::DispatchError;
use crate::provider::{Handler, HandlerKind};
use crate::record::FixedRecord;
use crate::registry::ProviderPin;

/// Resolution errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("provider '{provider}' does not export '{handler}'")]
    NotExported { provider: String, handler: String },
    #[error("handler '{handler}' is a {found} handler, expected {expected}")]
    SignatureMismatch {
        handler: String,
        expected: HandlerKind,
        found: HandlerKind,
    },
}

impl From<ResolveError> for DispatchError {
    fn from(_: ResolveError) -> Self {
        DispatchError::NotFound
    }
}

/// Expected signature of a handler being resolved.
pub trait Signature {
    const KIND: HandlerKind;
    type Callable: ?Sized;

    fn extract(handler: &Handler) -> Option<&Self::Callable>;
}

/// `addHandler(record) -> code`
pub struct AddSignature;

impl Signature for AddSignature {
    const KIND: HandlerKind = HandlerKind::Add;
    type Callable = dyn Fn(&FixedRecord) -> i64 + Send + Sync;

    fn extract(handler: &Handler) -> Option<&Self::Callable> {
        match handler {
            Handler::Add(f) => Some(f.as_ref()),
            _ => None,
        }
    }
}

/// `getHandler(key, out) -> code`
pub struct GetSignature;

impl Signature for GetSignature {
    const KIND: HandlerKind = HandlerKind::Get;
    type Callable = dyn Fn(&[u8], &mut FixedRecord) -> i64 + Send + Sync;

    fn extract(handler: &Handler) -> Option<&Self::Callable> {
        match handler {
            Handler::Get(f) => Some(f.as_ref()),
            _ => None,
        }
    }
}

/// `deleteHandler(key) -> code`
pub struct DeleteSignature;

impl Signature for DeleteSignature {
    const KIND: HandlerKind = HandlerKind::Delete;
    type Callable = dyn Fn(&[u8]) -> i64 + Send + Sync;

    fn extract(handler: &Handler) -> Option<&Self::Callable> {
        match handler {
            Handler::Delete(f) => Some(f.as_ref()),
            _ => None,
        }
    }
}

/// Resolve `name` in the pinned provider as a handler of signature `S`.
pub fn resolve<'p, S: Signature>(
    pin: &'p ProviderPin<'_>,
    name: &str,
) -> Result<&'p S::Callable, ResolveError> {
    let handler = pin
        .provider()
        .handlers()
        .get(name)
        .ok_or_else(|| ResolveError::NotExported {
            provider: pin.name().to_string(),
            handler: name.to_string(),
        })?;

    S::extract(handler).ok_or_else(|| ResolveError::SignatureMismatch {
        handler: name.to_string(),
        expected: S::KIND,
        found: handler.kind(),
    })
}
