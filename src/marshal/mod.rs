//! Boundary marshalling
//!
//! Moves data between untrusted caller memory and trusted staging buffers.
//!
//! # Architecture
//!
//! ```text
//! caller space (CallerMemory)          trusted side
//!  ┌──────────────┐   copy_in_*    ┌──────────────────┐
//!  │ key / record │ ─────────────▶ │ StagingBuffer    │──▶ handler
//!  └──────────────┘                │ StagingRecord    │
//!  ┌──────────────┐ copy_out_record│ (zeroed, charged)│
//!  │ out record   │ ◀───────────── │                  │◀── handler
//!  └──────────────┘                └──────────────────┘
//! ```
//!
//! | Failure | Error |
//! |---------|-------|
//! | zero-length key | `MarshalError::InvalidArgument` |
//! | budget exhausted or allocator refused | `MarshalError::NoMemory` |
//! | caller region unmapped, read-only, null, or overflowing | `MarshalError::Fault` |

mod staging;
mod user;

pub use staging::{MarshalError, Marshaller, StagingBuffer, StagingRecord};
pub use user::{Access, CallerMemory, UserAccessError, UserPtr, UserSpace, PAGE_SIZE};

#[cfg(test)]
mod tests;
