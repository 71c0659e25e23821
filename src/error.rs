//! Dispatch error taxonomy
//!
//! Component errors (registry, resolver, marshaller) are translated into
//! exactly one `DispatchError` at the entry-point boundary. The provider's own
//! result code never passes through here; it is returned as `Ok(code)`.

use thiserror::Error;

/// Errors surfaced by the dispatch entry points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// Provider absent or being torn down, or handler not exported
    #[error("provider or handler not found")]
    NotFound,
    /// Staging allocation failed
    #[error("cannot allocate staging memory")]
    NoMemory,
    /// A boundary copy could not complete
    #[error("bad caller address")]
    FaultAccess,
    /// Zero-length key supplied to Get or Delete
    #[error("invalid argument")]
    InvalidArgument,
}

/// Result of a dispatch entry point: the provider's result code on success.
pub type DispatchResult<T> = Result<T, DispatchError>;

impl DispatchError {
    /// Positive errno value for this error.
    pub fn errno(self) -> i32 {
        match self {
            DispatchError::NotFound => libc::ENODEV,
            DispatchError::NoMemory => libc::ENOMEM,
            DispatchError::FaultAccess => libc::EFAULT,
            DispatchError::InvalidArgument => libc::EINVAL,
        }
    }

    /// Negative errno, the form returned by a flattened call.
    #[inline]
    pub fn to_raw(self) -> i64 {
        -(self.errno() as i64)
    }

    #[inline]
    pub fn name(self) -> &'static str {
        match self {
            DispatchError::NotFound => "ENODEV",
            DispatchError::NoMemory => "ENOMEM",
            DispatchError::FaultAccess => "EFAULT",
            DispatchError::InvalidArgument => "EINVAL",
        }
    }
}

/// Flatten a call result into a single return code.
///
/// Handler codes pass through verbatim; dispatch errors become negative errno.
pub fn into_return_code(result: DispatchResult<i64>) -> i64 {
    match result {
        Ok(code) => code,
        Err(err) => err.to_raw(),
    }
}
