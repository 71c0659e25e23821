//! Staging buffers and boundary copies
//!
//! Every staging buffer is charged against the marshaller's budget, zeroed
//! before any caller byte lands in it, and zeroed again when released.
//! Buffers release on drop, so a call that bails out early unwinds its
//! buffers newest-first without any hand-written cleanup chain.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

use thiserror::Error;
use tracing::warn;

use super::user::{CallerMemory, UserAccessError, UserPtr};
use crate::error::DispatchError;
use crate::record::{FixedRecord, RECORD_SIZE};

/// Marshalling errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MarshalError {
    #[error("zero-length key")]
    InvalidArgument,
    #[error("cannot stage {requested} bytes ({available} available)")]
    NoMemory { requested: usize, available: usize },
    #[error("caller region {ptr:?}+{len} is not accessible: {source}")]
    Fault {
        ptr: UserPtr,
        len: usize,
        #[source]
        source: UserAccessError,
    },
}

impl From<MarshalError> for DispatchError {
    fn from(err: MarshalError) -> Self {
        match err {
            MarshalError::InvalidArgument => DispatchError::InvalidArgument,
            MarshalError::NoMemory { .. } => DispatchError::NoMemory,
            MarshalError::Fault { .. } => DispatchError::FaultAccess,
        }
    }
}

/// Copies data across the caller boundary through charged staging buffers.
pub struct Marshaller {
    budget: usize,
    charged: AtomicUsize,
    live: AtomicUsize,
}

impl Marshaller {
    /// Create a marshaller allowed to hold `budget` bytes of staging at once.
    pub fn new(budget: usize) -> Self {
        Self {
            budget,
            charged: AtomicUsize::new(0),
            live: AtomicUsize::new(0),
        }
    }

    /// Stage a key. An empty key is never meaningful and is rejected.
    pub fn copy_in_key(
        &self,
        mem: &dyn CallerMemory,
        src: UserPtr,
        len: usize,
    ) -> Result<StagingBuffer<'_>, MarshalError> {
        if len == 0 {
            return Err(MarshalError::InvalidArgument);
        }
        self.copy_in_bytes(mem, src, len)
    }

    /// Stage `len` caller bytes. Zero-length transfers are allowed here.
    pub fn copy_in_bytes(
        &self,
        mem: &dyn CallerMemory,
        src: UserPtr,
        len: usize,
    ) -> Result<StagingBuffer<'_>, MarshalError> {
        let mut staged = self.alloc_bytes(len)?;
        mem.read(src, &mut staged.bytes)
            .map_err(|source| fault(src, len, source))?;
        Ok(staged)
    }

    /// Stage a caller record.
    pub fn copy_in_record(
        &self,
        mem: &dyn CallerMemory,
        src: UserPtr,
    ) -> Result<StagingRecord<'_>, MarshalError> {
        let charge = self.charge(RECORD_SIZE)?;
        let mut bytes = [0u8; RECORD_SIZE];
        if let Err(source) = mem.read(src, &mut bytes) {
            bytes.fill(0);
            return Err(fault(src, RECORD_SIZE, source));
        }
        let record = FixedRecord::from_bytes(&bytes);
        bytes.fill(0);
        Ok(StagingRecord { record, charge })
    }

    /// Allocate a zeroed output record.
    pub fn alloc_record(&self) -> Result<StagingRecord<'_>, MarshalError> {
        let charge = self.charge(RECORD_SIZE)?;
        Ok(StagingRecord {
            record: FixedRecord::zeroed(),
            charge,
        })
    }

    /// Write a staged record back to caller space.
    pub fn copy_out_record(
        &self,
        mem: &dyn CallerMemory,
        staged: &StagingRecord<'_>,
        dst: UserPtr,
    ) -> Result<(), MarshalError> {
        let mut bytes = staged.record.to_bytes();
        let result = mem
            .write(dst, &bytes)
            .map_err(|source| fault(dst, RECORD_SIZE, source));
        bytes.fill(0);
        result
    }

    /// Allocate `len` zeroed bytes.
    pub fn alloc_bytes(&self, len: usize) -> Result<StagingBuffer<'_>, MarshalError> {
        let charge = self.charge(len)?;
        let mut bytes = Vec::new();
        if bytes.try_reserve_exact(len).is_err() {
            return Err(MarshalError::NoMemory {
                requested: len,
                available: self.available(),
            });
        }
        bytes.resize(len, 0);
        Ok(StagingBuffer { bytes, charge })
    }

    /// Staging bytes that may still be charged
    pub fn available(&self) -> usize {
        self.budget
            .saturating_sub(self.charged.load(Ordering::Acquire))
    }

    pub fn budget(&self) -> usize {
        self.budget
    }

    /// Bytes currently held by live staging buffers
    pub fn charged_bytes(&self) -> usize {
        self.charged.load(Ordering::Acquire)
    }

    /// Number of staging buffers not yet released
    pub fn live_buffers(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    fn charge(&self, len: usize) -> Result<Charge<'_>, MarshalError> {
        let budget = self.budget;
        self.charged
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |charged| {
                charged.checked_add(len).filter(|&total| total <= budget)
            })
            .map_err(|charged| MarshalError::NoMemory {
                requested: len,
                available: budget.saturating_sub(charged),
            })?;
        self.live.fetch_add(1, Ordering::AcqRel);
        Ok(Charge { owner: self, len })
    }
}

impl fmt::Debug for Marshaller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Marshaller")
            .field("budget", &self.budget)
            .field("charged", &self.charged_bytes())
            .field("live", &self.live_buffers())
            .finish()
    }
}

fn fault(ptr: UserPtr, len: usize, source: UserAccessError) -> MarshalError {
    warn!(?ptr, len, %source, "caller region not accessible");
    MarshalError::Fault { ptr, len, source }
}

/// Budget held by one staging buffer; returned on drop.
struct Charge<'m> {
    owner: &'m Marshaller,
    len: usize,
}

impl Drop for Charge<'_> {
    fn drop(&mut self) {
        self.owner.charged.fetch_sub(self.len, Ordering::AcqRel);
        self.owner.live.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Staged bytes owned by one call.
pub struct StagingBuffer<'m> {
    bytes: Vec<u8>,
    charge: Charge<'m>,
}

impl StagingBuffer<'_> {
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl Drop for StagingBuffer<'_> {
    fn drop(&mut self) {
        self.bytes.fill(0);
    }
}

impl fmt::Debug for StagingBuffer<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StagingBuffer")
            .field("len", &self.bytes.len())
            .field("charged", &self.charge.len)
            .finish()
    }
}

/// A staged record owned by one call.
pub struct StagingRecord<'m> {
    record: FixedRecord,
    charge: Charge<'m>,
}

impl StagingRecord<'_> {
    pub fn record(&self) -> &FixedRecord {
        &self.record
    }

    pub fn record_mut(&mut self) -> &mut FixedRecord {
        &mut self.record
    }
}

impl Drop for StagingRecord<'_> {
    fn drop(&mut self) {
        self.record = FixedRecord::zeroed();
    }
}

impl fmt::Debug for StagingRecord<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StagingRecord")
            .field("record", &self.record)
            .field("charged", &self.charge.len)
            .finish()
    }
}
