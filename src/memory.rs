//! In-memory reference provider
//!
//! A plain list of records behind a lock. It exists to exercise the dispatch
//! layer in tests and benchmarks; lookups are linear.

use parking_lot::Mutex;

use crate::provider::PhonebookBackend;
use crate::record::{field_bytes, FixedRecord};

/// Result code for a successful operation
pub const PB_OK: i64 = 0;
/// Result code when no record matches the key
pub const PB_NOT_FOUND: i64 = -(libc::ENOENT as i64);

/// Phonebook stored in process memory.
#[derive(Debug, Default)]
pub struct MemoryPhonebook {
    records: Mutex<Vec<FixedRecord>>,
}

impl MemoryPhonebook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Copy of every stored record, in insertion order
    pub fn records(&self) -> Vec<FixedRecord> {
        self.records.lock().clone()
    }
}

impl PhonebookBackend for MemoryPhonebook {
    fn add(&self, record: &FixedRecord) -> i64 {
        self.records.lock().push(*record);
        PB_OK
    }

    /// First record whose last name equals `key`.
    fn get(&self, key: &[u8], out: &mut FixedRecord) -> i64 {
        let key = field_bytes(key);
        let records = self.records.lock();
        match records.iter().find(|r| r.last_name() == key) {
            Some(found) => {
                *out = *found;
                PB_OK
            }
            None => PB_NOT_FOUND,
        }
    }

    /// Removes every record with that last name.
    fn delete(&self, key: &[u8]) -> i64 {
        let key = field_bytes(key);
        let mut records = self.records.lock();
        let before = records.len();
        records.retain(|r| r.last_name() != key);
        if records.len() == before {
            PB_NOT_FOUND
        } else {
            PB_OK
        }
    }
}
