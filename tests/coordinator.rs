use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use windbore::concurrency::{Coordinator, Message, Scorer, WorkerPool};
use windbore::Error;

const WORKERS: usize = 4;
const JOBS: usize = 200;

#[test]
fn workers_never_exceed_the_core_limit() {
    let coordinator: Coordinator<Message> = Coordinator::new(WORKERS);
    let peak = Arc::new(AtomicUsize::new(0));
    let scorer: Scorer = {
        let coordinator = coordinator.clone();
        let peak = Arc::clone(&peak);
        Arc::new(move |v: &[f64]| {
            let used = coordinator.used();
            assert!(used <= coordinator.cores(), "{used} cores in use");
            peak.fetch_max(used, Ordering::SeqCst);
            thread::yield_now();
            v[0] * 2.0
        })
    };

    let mut pool = WorkerPool::start(coordinator.clone(), WORKERS, scorer).unwrap();
    let mut submitted = 0;
    let mut received = 0;
    while received < JOBS {
        if submitted < JOBS && pool.has_idle() {
            pool.submit(vec![submitted as f64]).unwrap();
            submitted += 1;
        } else {
            let (vector, score) = pool.next_result().unwrap();
            assert_eq!(score, vector[0] * 2.0);
            received += 1;
        }
        assert!(coordinator.used() <= coordinator.cores());
    }
    assert_eq!(pool.finish().unwrap(), JOBS);
    assert!(peak.load(Ordering::SeqCst) <= WORKERS);
    assert_eq!(coordinator.live_futures(), 0);
}

#[test]
fn futures_are_retrieved_once_and_cached() {
    let coordinator: Coordinator<u64> = Coordinator::new(2);
    let handle = coordinator.new_future();
    let copy = handle.clone();
    assert_eq!(coordinator.refcount(handle.id()), Some(2));

    coordinator.deliver(handle.id(), 11);
    assert_eq!(handle.get().unwrap(), 11);
    assert_eq!(handle.get().unwrap(), 11);
    // The copy still holds its own reference.
    assert_eq!(coordinator.refcount(copy.id()), Some(1));
    assert_eq!(copy.take().unwrap(), 11);
    assert_eq!(coordinator.live_futures(), 0);
}

#[test]
fn dropping_the_last_holder_frees_the_slot() {
    let coordinator: Coordinator<u64> = Coordinator::new(2);
    let handles: Vec<_> = (0..5).map(|_| coordinator.new_future()).collect();
    let clones: Vec<_> = handles.iter().map(Clone::clone).collect();
    assert_eq!(coordinator.live_futures(), 5);
    drop(handles);
    assert_eq!(coordinator.live_futures(), 5);
    drop(clones);
    assert_eq!(coordinator.live_futures(), 0);
}

#[test]
fn nested_spawns_share_the_core_budget() {
    let coordinator: Coordinator<usize> = Coordinator::new(3);
    let (outer, outer_thread) = coordinator
        .spawn("outer", |c| {
            let (inner, inner_thread) = c.spawn("inner", |c| c.used()).unwrap();
            let seen = inner.take().unwrap();
            inner_thread.join().unwrap();
            seen
        })
        .unwrap();
    let seen = outer.take().unwrap();
    outer_thread.join().unwrap();
    assert!(seen <= 3);
    assert_eq!(coordinator.used(), 1);
}

#[test]
fn shutdown_wakes_blocked_retrievals() {
    let coordinator: Coordinator<u64> = Coordinator::new(2);
    let handle = coordinator.new_future();
    let waiter = thread::spawn(move || handle.take());
    thread::sleep(std::time::Duration::from_millis(20));
    coordinator.shutdown();
    assert!(matches!(waiter.join().unwrap(), Err(Error::Shutdown)));
}
