//! Marshalling tests

use super::*;
use crate::error::DispatchError;
use crate::record::{FixedRecord, RECORD_SIZE};

const BUDGET: usize = 4096;

#[test]
fn test_user_space_read_write() {
    let space = UserSpace::new();
    let ptr = space.map(b"hello", Access::ReadWrite);

    let mut buf = [0u8; 5];
    space.read(ptr, &mut buf).unwrap();
    assert_eq!(&buf, b"hello");

    space.write(ptr.checked_add(1).unwrap(), b"ipp").unwrap();
    assert_eq!(space.snapshot(ptr, 5).unwrap(), b"hippo");
}

#[test]
fn test_user_space_rejects_bad_ranges() {
    let space = UserSpace::new();
    let ptr = space.map(b"abc", Access::ReadOnly);
    let mut buf = [0u8; 4];

    assert_eq!(
        space.read(UserPtr::null(), &mut buf),
        Err(UserAccessError::NullPointer)
    );
    assert_eq!(space.read(ptr, &mut buf), Err(UserAccessError::NotMapped));
    assert_eq!(
        space.read(UserPtr(u64::MAX - 1), &mut buf),
        Err(UserAccessError::Overflow)
    );
    assert_eq!(
        space.read(UserPtr(PAGE_SIZE), &mut buf),
        Err(UserAccessError::NotMapped)
    );
    assert_eq!(
        space.write(ptr, b"x"),
        Err(UserAccessError::PermissionDenied)
    );
}

#[test]
fn test_unmap_and_protect() {
    let space = UserSpace::new();
    let ptr = space.map_zeroed(8, Access::ReadWrite);
    assert_eq!(space.mapped_regions(), 1);

    assert!(space.protect(ptr, Access::ReadOnly));
    assert_eq!(
        space.write(ptr, b"x"),
        Err(UserAccessError::PermissionDenied)
    );
    // Nothing was written by the refused copy.
    assert_eq!(space.snapshot(ptr, 8).unwrap(), vec![0u8; 8]);

    assert!(space.unmap(ptr));
    assert!(!space.unmap(ptr));
    assert_eq!(space.snapshot(ptr, 1), Err(UserAccessError::NotMapped));
}

#[test]
fn test_zero_length_key_is_invalid() {
    let space = UserSpace::new();
    let marshaller = Marshaller::new(BUDGET);
    let ptr = space.map(b"key", Access::ReadOnly);

    let err = marshaller.copy_in_key(&space, ptr, 0).unwrap_err();
    assert_eq!(err, MarshalError::InvalidArgument);
    assert_eq!(DispatchError::from(err), DispatchError::InvalidArgument);
    assert_eq!(marshaller.live_buffers(), 0);
}

#[test]
fn test_zero_length_bytes_are_allowed() {
    let space = UserSpace::new();
    let marshaller = Marshaller::new(BUDGET);

    let staged = marshaller
        .copy_in_bytes(&space, UserPtr::null(), 0)
        .unwrap();
    assert!(staged.is_empty());
}

#[test]
fn test_copy_in_key_stages_exact_bytes() {
    let space = UserSpace::new();
    let marshaller = Marshaller::new(BUDGET);
    let ptr = space.map(b"Ivanova", Access::ReadOnly);

    let staged = marshaller.copy_in_key(&space, ptr, 7).unwrap();
    assert_eq!(staged.as_slice(), b"Ivanova");
    assert_eq!(staged.len(), 7);
    assert_eq!(marshaller.live_buffers(), 1);
    assert_eq!(marshaller.charged_bytes(), 7);

    drop(staged);
    assert_eq!(marshaller.live_buffers(), 0);
    assert_eq!(marshaller.charged_bytes(), 0);
}

#[test]
fn test_fault_releases_staging() {
    let space = UserSpace::new();
    let marshaller = Marshaller::new(BUDGET);
    let ptr = space.map(b"Ivanova", Access::ReadOnly);

    // Longer than the mapped region.
    let err = marshaller.copy_in_key(&space, ptr, 5000).unwrap_err();
    assert!(matches!(err, MarshalError::NoMemory { .. }));

    let err = marshaller.copy_in_key(&space, ptr, 64).unwrap_err();
    assert_eq!(
        err,
        MarshalError::Fault {
            ptr,
            len: 64,
            source: UserAccessError::NotMapped
        }
    );
    assert_eq!(DispatchError::from(err), DispatchError::FaultAccess);
    assert_eq!(marshaller.live_buffers(), 0);
    assert_eq!(marshaller.charged_bytes(), 0);
}

#[test]
fn test_budget_exhaustion_is_no_memory() {
    let space = UserSpace::new();
    let marshaller = Marshaller::new(RECORD_SIZE + 10);
    let ptr = space.map(&[b'k'; 32], Access::ReadOnly);

    let held = marshaller.alloc_record().unwrap();
    assert_eq!(marshaller.available(), 10);

    let err = marshaller.copy_in_key(&space, ptr, 11).unwrap_err();
    assert_eq!(
        err,
        MarshalError::NoMemory {
            requested: 11,
            available: 10
        }
    );
    assert_eq!(DispatchError::from(err), DispatchError::NoMemory);

    let small = marshaller.copy_in_key(&space, ptr, 10).unwrap();
    assert_eq!(marshaller.available(), 0);

    drop(small);
    drop(held);
    assert_eq!(marshaller.available(), RECORD_SIZE + 10);
}

#[test]
fn test_record_roundtrip_through_caller_space() {
    let space = UserSpace::new();
    let marshaller = Marshaller::new(BUDGET);
    let record = FixedRecord::new("Anna", "Ivanova", 30, "+70000000000", "a@x.com");
    let src = space.map(&record.to_bytes(), Access::ReadOnly);
    let dst = space.map_zeroed(RECORD_SIZE, Access::ReadWrite);

    let staged = marshaller.copy_in_record(&space, src).unwrap();
    assert_eq!(staged.record(), &record);

    marshaller.copy_out_record(&space, &staged, dst).unwrap();
    let bytes = space.snapshot(dst, RECORD_SIZE).unwrap();
    assert_eq!(bytes.as_slice(), record.to_bytes().as_slice());
}

#[test]
fn test_alloc_record_is_zeroed() {
    let marshaller = Marshaller::new(BUDGET);
    let mut staged = marshaller.alloc_record().unwrap();
    assert_eq!(staged.record().to_bytes(), [0u8; RECORD_SIZE]);

    staged.record_mut().age = 7;
    assert_eq!(staged.record().age, 7);
}

#[test]
fn test_copy_out_to_read_only_region_faults() {
    let space = UserSpace::new();
    let marshaller = Marshaller::new(BUDGET);
    let dst = space.map_zeroed(RECORD_SIZE, Access::ReadOnly);
    let staged = marshaller.alloc_record().unwrap();

    let err = marshaller.copy_out_record(&space, &staged, dst).unwrap_err();
    assert!(matches!(
        err,
        MarshalError::Fault {
            source: UserAccessError::PermissionDenied,
            ..
        }
    ));
}

#[test]
fn test_short_record_region_faults() {
    let space = UserSpace::new();
    let marshaller = Marshaller::new(BUDGET);
    let src = space.map(&[1u8; RECORD_SIZE - 1], Access::ReadOnly);

    let err = marshaller.copy_in_record(&space, src).unwrap_err();
    assert!(matches!(err, MarshalError::Fault { .. }));
    assert_eq!(marshaller.live_buffers(), 0);
}
