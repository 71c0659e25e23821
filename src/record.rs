//! Fixed-layout phonebook record
//!
//! `FixedRecord` is the only structure that crosses the caller boundary. Its
//! layout is fixed and `repr(C)` so native providers can take it by pointer:
//!
//! ```text
//! offset  size  field
//!      0    64  first_name   (NUL-padded bytes)
//!     64    64  last_name    (NUL-padded bytes)
//!    128     4  age          (u32, native byte order)
//!    132    16  phone        (NUL-padded bytes)
//!    148    64  email        (NUL-padded bytes)
//!    212        end
//! ```
//!
//! Text fields are plain byte buffers. A value that fills the whole field has
//! no terminating NUL, and truncation may split a multi-byte UTF-8 sequence;
//! callers size their strings accordingly.

use std::borrow::Cow;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Capacity of `first_name` and `last_name`
pub const NAME_LEN: usize = 64;
/// Capacity of `phone`
pub const PHONE_LEN: usize = 16;
/// Capacity of `email`
pub const EMAIL_LEN: usize = 64;
/// Total size of the wire layout
pub const RECORD_SIZE: usize = NAME_LEN * 2 + 4 + PHONE_LEN + EMAIL_LEN;

const LAST_NAME_OFFSET: usize = NAME_LEN;
const AGE_OFFSET: usize = NAME_LEN * 2;
const PHONE_OFFSET: usize = AGE_OFFSET + 4;
const EMAIL_OFFSET: usize = PHONE_OFFSET + PHONE_LEN;

const _: () = assert!(std::mem::size_of::<FixedRecord>() == RECORD_SIZE);

/// A phonebook entry in its fixed exchange layout.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct FixedRecord {
    pub first_name: [u8; NAME_LEN],
    pub last_name: [u8; NAME_LEN],
    pub age: u32,
    pub phone: [u8; PHONE_LEN],
    pub email: [u8; EMAIL_LEN],
}

impl FixedRecord {
    /// An all-zero record.
    pub const fn zeroed() -> Self {
        Self {
            first_name: [0; NAME_LEN],
            last_name: [0; NAME_LEN],
            age: 0,
            phone: [0; PHONE_LEN],
            email: [0; EMAIL_LEN],
        }
    }

    /// Build a record, truncating every text field to its capacity.
    pub fn new(first_name: &str, last_name: &str, age: u32, phone: &str, email: &str) -> Self {
        let mut record = Self::zeroed();
        record.set_first_name(first_name);
        record.set_last_name(last_name);
        record.age = age;
        record.set_phone(phone);
        record.set_email(email);
        record
    }

    pub fn set_first_name(&mut self, value: &str) {
        fill_field(&mut self.first_name, value.as_bytes());
    }

    pub fn set_last_name(&mut self, value: &str) {
        fill_field(&mut self.last_name, value.as_bytes());
    }

    pub fn set_phone(&mut self, value: &str) {
        fill_field(&mut self.phone, value.as_bytes());
    }

    pub fn set_email(&mut self, value: &str) {
        fill_field(&mut self.email, value.as_bytes());
    }

    /// First name up to the first NUL
    pub fn first_name(&self) -> &[u8] {
        field_bytes(&self.first_name)
    }

    /// Last name up to the first NUL
    pub fn last_name(&self) -> &[u8] {
        field_bytes(&self.last_name)
    }

    /// Phone number up to the first NUL
    pub fn phone(&self) -> &[u8] {
        field_bytes(&self.phone)
    }

    /// Email up to the first NUL
    pub fn email(&self) -> &[u8] {
        field_bytes(&self.email)
    }

    /// Serialize into the fixed wire layout.
    pub fn to_bytes(&self) -> [u8; RECORD_SIZE] {
        let mut out = [0u8; RECORD_SIZE];
        out[..LAST_NAME_OFFSET].copy_from_slice(&self.first_name);
        out[LAST_NAME_OFFSET..AGE_OFFSET].copy_from_slice(&self.last_name);
        out[AGE_OFFSET..PHONE_OFFSET].copy_from_slice(&self.age.to_ne_bytes());
        out[PHONE_OFFSET..EMAIL_OFFSET].copy_from_slice(&self.phone);
        out[EMAIL_OFFSET..].copy_from_slice(&self.email);
        out
    }

    /// Deserialize from the fixed wire layout.
    pub fn from_bytes(bytes: &[u8; RECORD_SIZE]) -> Self {
        let mut record = Self::zeroed();
        record
            .first_name
            .copy_from_slice(&bytes[..LAST_NAME_OFFSET]);
        record
            .last_name
            .copy_from_slice(&bytes[LAST_NAME_OFFSET..AGE_OFFSET]);
        let mut age = [0u8; 4];
        age.copy_from_slice(&bytes[AGE_OFFSET..PHONE_OFFSET]);
        record.age = u32::from_ne_bytes(age);
        record
            .phone
            .copy_from_slice(&bytes[PHONE_OFFSET..EMAIL_OFFSET]);
        record.email.copy_from_slice(&bytes[EMAIL_OFFSET..]);
        record
    }
}

impl Default for FixedRecord {
    fn default() -> Self {
        Self::zeroed()
    }
}

// Ordering and equality look at each field the way `strncmp` over the field
// capacity does: bytes after the first NUL do not participate.
impl Ord for FixedRecord {
    fn cmp(&self, other: &Self) -> Ordering {
        self.first_name()
            .cmp(other.first_name())
            .then_with(|| self.last_name().cmp(other.last_name()))
            .then_with(|| self.age.cmp(&other.age))
            .then_with(|| self.phone().cmp(other.phone()))
            .then_with(|| self.email().cmp(other.email()))
    }
}

impl PartialOrd for FixedRecord {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for FixedRecord {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for FixedRecord {}

impl Hash for FixedRecord {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.first_name().hash(state);
        self.last_name().hash(state);
        self.age.hash(state);
        self.phone().hash(state);
        self.email().hash(state);
    }
}

impl fmt::Display for FixedRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({}, {}, {}, {}, {})",
            lossy(self.first_name()),
            lossy(self.last_name()),
            self.age,
            lossy(self.phone()),
            lossy(self.email())
        )
    }
}

impl fmt::Debug for FixedRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FixedRecord")
            .field("first_name", &lossy(self.first_name()))
            .field("last_name", &lossy(self.last_name()))
            .field("age", &self.age)
            .field("phone", &lossy(self.phone()))
            .field("email", &lossy(self.email()))
            .finish()
    }
}

/// Trim a NUL-padded field (or key) at its first NUL.
pub fn field_bytes(field: &[u8]) -> &[u8] {
    match field.iter().position(|&b| b == 0) {
        Some(end) => &field[..end],
        None => field,
    }
}

fn fill_field(field: &mut [u8], value: &[u8]) {
    field.fill(0);
    let len = value.len().min(field.len());
    field[..len].copy_from_slice(&value[..len]);
}

fn lossy(bytes: &[u8]) -> Cow<'_, str> {
    String::from_utf8_lossy(bytes)
}
