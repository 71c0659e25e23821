//! Concurrent Unload Tests
//!
//! Hammers the dispatcher from several threads while another thread keeps
//! removing and re-registering the provider. A provider may only leave the
//! registry while none of its handlers are running.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use pb_dispatch::{
    Access, DispatchError, Dispatcher, FixedRecord, Provider, ProviderRegistry, ProviderState,
    RegistryError, UserSpace, RECORD_SIZE,
};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Provider whose handlers record how many calls are inside them.
fn tracked_provider(in_flight: &Arc<AtomicUsize>, completed: &Arc<AtomicUsize>) -> Provider {
    fn enter(in_flight: &AtomicUsize, completed: &AtomicUsize) -> i64 {
        in_flight.fetch_add(1, Ordering::SeqCst);
        thread::yield_now();
        in_flight.fetch_sub(1, Ordering::SeqCst);
        completed.fetch_add(1, Ordering::SeqCst);
        0
    }

    let (ai, ac) = (Arc::clone(in_flight), Arc::clone(completed));
    let (gi, gc) = (Arc::clone(in_flight), Arc::clone(completed));
    let (di, dc) = (Arc::clone(in_flight), Arc::clone(completed));
    Provider::builder("phonebook")
        .add_handler("addHandler", move |_: &FixedRecord| enter(&ai, &ac))
        .get_handler("getHandler", move |_: &[u8], _: &mut FixedRecord| {
            enter(&gi, &gc)
        })
        .delete_handler("deleteHandler", move |_: &[u8]| enter(&di, &dc))
        .build()
}

#[test]
fn test_unload_never_overlaps_handler_calls() {
    init_tracing();
    const CALLERS: usize = 4;
    const CALLS_PER_CALLER: usize = 500;

    let in_flight = Arc::new(AtomicUsize::new(0));
    let completed = Arc::new(AtomicUsize::new(0));
    let registry = Arc::new(ProviderRegistry::new());
    registry
        .register(tracked_provider(&in_flight, &completed))
        .unwrap();
    let dispatcher = Dispatcher::new(Arc::clone(&registry));
    let mem = UserSpace::new();
    let done = AtomicBool::new(false);

    let anna = FixedRecord::new("Anna", "Ivanova", 30, "", "");
    let rec = mem.map(&anna.to_bytes(), Access::ReadOnly);
    let key = mem.map(b"Ivanova", Access::ReadOnly);

    thread::scope(|s| {
        s.spawn(|| {
            while !done.load(Ordering::SeqCst) {
                match registry.try_unload("phonebook") {
                    Ok(_) => {
                        assert_eq!(in_flight.load(Ordering::SeqCst), 0);
                        registry
                            .register(tracked_provider(&in_flight, &completed))
                            .unwrap();
                    }
                    Err(RegistryError::Busy { .. }) => thread::yield_now(),
                    Err(other) => panic!("unexpected unload error: {other}"),
                }
            }
        });

        let (mem, dispatcher) = (&mem, &dispatcher);
        let callers: Vec<_> = (0..CALLERS)
            .map(|_| {
                s.spawn(move || {
                    let out = mem.map_zeroed(RECORD_SIZE, Access::ReadWrite);
                    for i in 0..CALLS_PER_CALLER {
                        let result = match i % 3 {
                            0 => dispatcher.add(mem, rec),
                            1 => dispatcher.get(mem, key, 7, out),
                            _ => dispatcher.delete(mem, key, 7),
                        };
                        match result {
                            Ok(code) => assert_eq!(code, 0),
                            Err(err) => assert_eq!(err, DispatchError::NotFound),
                        }
                    }
                })
            })
            .collect();
        for caller in callers {
            caller.join().unwrap();
        }
        done.store(true, Ordering::SeqCst);
    });

    assert_eq!(in_flight.load(Ordering::SeqCst), 0);
    assert_eq!(registry.pin_count("phonebook"), Some(0));
    assert_eq!(dispatcher.marshaller().live_buffers(), 0);
    assert_eq!(dispatcher.marshaller().charged_bytes(), 0);
    assert!(completed.load(Ordering::SeqCst) <= CALLERS * CALLS_PER_CALLER);
}

#[test]
fn test_blocking_unload_waits_for_in_flight_call() {
    init_tracing();
    let registry = Arc::new(ProviderRegistry::new());
    let entered = Arc::new(AtomicBool::new(false));
    let release = Arc::new(AtomicBool::new(false));

    let (e, r) = (Arc::clone(&entered), Arc::clone(&release));
    registry
        .register(
            Provider::builder("phonebook")
                .delete_handler("deleteHandler", move |_: &[u8]| {
                    e.store(true, Ordering::SeqCst);
                    while !r.load(Ordering::SeqCst) {
                        thread::sleep(Duration::from_millis(1));
                    }
                    0
                })
                .build(),
        )
        .unwrap();
    let dispatcher = Dispatcher::new(Arc::clone(&registry));
    let mem = UserSpace::new();
    let key = mem.map(b"Ivanova", Access::ReadOnly);

    thread::scope(|s| {
        let call = s.spawn(|| dispatcher.delete(&mem, key, 7));
        while !entered.load(Ordering::SeqCst) {
            thread::yield_now();
        }

        let unload = s.spawn(|| registry.unload("phonebook"));
        while registry.state("phonebook") != ProviderState::Unloading {
            thread::yield_now();
        }

        // New calls are refused while the old one drains.
        assert_eq!(dispatcher.delete(&mem, key, 7), Err(DispatchError::NotFound));
        assert!(!unload.is_finished());

        release.store(true, Ordering::SeqCst);
        assert_eq!(call.join().unwrap(), Ok(0));
        assert!(unload.join().unwrap().is_ok());
    });

    assert_eq!(registry.state("phonebook"), ProviderState::Unloaded);
    assert_eq!(dispatcher.delete(&mem, key, 7), Err(DispatchError::NotFound));
}
