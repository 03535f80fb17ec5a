//! Core accounting, mailbox and future table shared by every thread.
//!
//! Threads are assumed to start out owning one core. A thread that blocks on
//! a future gives its core back while it waits and queues for one again once
//! the value arrives. Queued requests are granted largest first and, among
//! equal requests, most recent first, so a single busy thread keeps running
//! the way a plain sequential program would.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use tracing::{debug, warn};

use crate::error::{Error, Result};

use super::future::{Delivery, FutureHandle, FutureId, WorkerFault};

type Task<T> = Box<dyn FnOnce(Coordinator<T>) -> T + Send>;

struct Slot<T> {
    delivery: Option<Delivery<T>>,
    refcount: usize,
}

struct Waiter {
    ticket: u64,
    request: usize,
}

struct State<T> {
    cores: usize,
    used: usize,
    waiters: Vec<Waiter>,
    granted: HashSet<u64>,
    next_ticket: u64,
    mailbox: HashMap<u64, Task<T>>,
    next_mail: u64,
    futures: HashMap<u64, Slot<T>>,
    next_future: u64,
    clock: u64,
    statuses: BTreeMap<String, String>,
    shut_down: bool,
}

impl<T> State<T> {
    /// Grant every queued request that fits, largest first, then most recent.
    fn grant(&mut self) -> bool {
        self.waiters
            .sort_by(|a, b| b.request.cmp(&a.request).then(b.ticket.cmp(&a.ticket)));
        let mut any = false;
        let mut i = 0;
        while i < self.waiters.len() {
            let request = self.waiters[i].request;
            if self.used + request <= self.cores {
                self.used += request;
                let waiter = self.waiters.remove(i);
                debug!(ticket = waiter.ticket, request, used = self.used, "granted cores");
                self.granted.insert(waiter.ticket);
                any = true;
            } else {
                i += 1;
            }
        }
        any
    }
}

struct Shared<T> {
    state: Mutex<State<T>>,
    changed: Condvar,
}

/// Shared handle to the process-wide scheduler state. Cloning is cheap; all
/// clones see the same state.
pub struct Coordinator<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Coordinator<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> Default for Coordinator<T> {
    fn default() -> Self {
        Self::new(thread::available_parallelism().map(|n| n.get()).unwrap_or(1))
    }
}

impl<T> Coordinator<T> {
    /// Create a coordinator allowing `cores` concurrently running threads.
    /// The calling thread counts as one of them.
    pub fn new(cores: usize) -> Self {
        let state = State {
            cores: cores.max(1),
            used: 1,
            waiters: Vec::new(),
            granted: HashSet::new(),
            next_ticket: 0,
            mailbox: HashMap::new(),
            next_mail: 0,
            futures: HashMap::new(),
            next_future: 0,
            clock: 0,
            statuses: BTreeMap::new(),
            shut_down: false,
        };
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(state),
                changed: Condvar::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.shared.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait<'a>(&'a self, guard: MutexGuard<'a, State<T>>) -> MutexGuard<'a, State<T>> {
        self.shared
            .changed
            .wait(guard)
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn cores(&self) -> usize {
        self.lock().cores
    }

    pub fn set_cores(&self, cores: usize) {
        let mut state = self.lock();
        state.cores = cores.max(1);
        if state.grant() {
            self.shared.changed.notify_all();
        }
    }

    /// Cores currently accounted as running.
    pub fn used(&self) -> usize {
        self.lock().used
    }

    /// Swap `old` cores for `new`. Giving cores back never blocks; asking
    /// for more waits until the request can be granted.
    pub fn trade_cores(&self, old: usize, new: usize) {
        let state = self.lock();
        drop(self.trade_locked(state, old, new));
    }

    fn trade_locked<'a>(
        &'a self,
        mut state: MutexGuard<'a, State<T>>,
        old: usize,
        new: usize,
    ) -> MutexGuard<'a, State<T>> {
        state.used = state.used.saturating_sub(old);
        if new <= old || state.shut_down {
            state.used += new;
            if state.grant() {
                self.shared.changed.notify_all();
            }
            return state;
        }

        let ticket = state.next_ticket;
        state.next_ticket += 1;
        let request = new.min(state.cores);
        state.waiters.push(Waiter { ticket, request });
        if state.grant() {
            self.shared.changed.notify_all();
        }
        while !state.granted.remove(&ticket) {
            if state.shut_down {
                state.waiters.retain(|w| w.ticket != ticket);
                break;
            }
            state = self.wait(state);
        }
        state
    }

    pub fn acquire_core(&self) {
        self.trade_cores(0, 1);
    }

    pub fn release_core(&self) {
        self.trade_cores(1, 0);
    }

    /// Allocate a new future slot with one reference, held by the returned
    /// handle.
    pub fn new_future(&self) -> FutureHandle<T> {
        let mut state = self.lock();
        let number = state.next_future;
        state.next_future += 1;
        state.futures.insert(
            number,
            Slot {
                delivery: None,
                refcount: 1,
            },
        );
        drop(state);
        FutureHandle::new(self.clone(), FutureId(number))
    }

    pub(crate) fn ref_future(&self, id: FutureId) {
        let mut state = self.lock();
        if let Some(slot) = state.futures.get_mut(&id.0) {
            slot.refcount += 1;
        } else {
            debug_assert!(state.shut_down, "future refcount inconsistency");
        }
    }

    pub(crate) fn deref_future(&self, id: FutureId) {
        let mut state = self.lock();
        let freed = match state.futures.get_mut(&id.0) {
            Some(slot) => {
                slot.refcount -= 1;
                slot.refcount == 0
            }
            None => {
                debug_assert!(state.shut_down, "future refcount inconsistency");
                false
            }
        };
        if freed {
            state.futures.remove(&id.0);
        }
    }

    fn deliver_outcome(&self, id: FutureId, outcome: std::result::Result<T, WorkerFault>) -> bool {
        let mut state = self.lock();
        let timestamp = state.clock;
        let Some(slot) = state.futures.get_mut(&id.0) else {
            return false;
        };
        slot.delivery = Some(Delivery { timestamp, outcome });
        state.clock += 1;
        self.shared.changed.notify_all();
        true
    }

    /// Deliver a value. Returns false when nobody holds the future any more.
    pub fn deliver(&self, id: FutureId, value: T) -> bool {
        self.deliver_outcome(id, Ok(value))
    }

    pub fn deliver_fault(&self, id: FutureId, fault: WorkerFault) -> bool {
        self.deliver_outcome(id, Err(fault))
    }

    pub(crate) fn is_delivered(&self, id: FutureId) -> bool {
        self.delivery_timestamp(id).is_some()
    }

    pub(crate) fn delivery_timestamp(&self, id: FutureId) -> Option<u64> {
        self.lock()
            .futures
            .get(&id.0)
            .and_then(|slot| slot.delivery.as_ref())
            .map(|delivery| delivery.timestamp)
    }

    /// Block until any of `handles` has a value and return the index of the
    /// earliest delivery among those available. The value stays in place for
    /// the caller to take.
    pub fn wait_any(&self, handles: &[FutureHandle<T>]) -> Result<usize> {
        if handles.is_empty() {
            return Err(Error::Protocol("wait_any on no futures".to_string()));
        }
        let earliest = || {
            handles
                .iter()
                .enumerate()
                .filter_map(|(i, handle)| handle.timestamp().map(|t| (t, i)))
                .min()
                .map(|(_, i)| i)
        };
        if let Some(index) = earliest() {
            return Ok(index);
        }

        // Handles lock the coordinator themselves, so poll under the
        // condition variable instead of holding the state across checks.
        let mut state = self.trade_locked(self.lock(), 1, 0);
        loop {
            if state.shut_down {
                drop(self.trade_locked(state, 0, 1));
                return Err(Error::Shutdown);
            }
            let seen = state.clock;
            drop(state);
            if let Some(index) = earliest() {
                drop(self.trade_locked(self.lock(), 0, 1));
                return Ok(index);
            }
            state = self.lock();
            while state.clock == seen && !state.shut_down {
                state = self.wait(state);
            }
        }
    }

    /// Record a status line for `identity`; an empty value clears it.
    /// Returns the previous status, empty if there was none.
    pub fn set_status(&self, identity: &str, value: &str) -> String {
        let mut state = self.lock();
        let old = if value.is_empty() {
            state.statuses.remove(identity)
        } else {
            state.statuses.insert(identity.to_string(), value.to_string())
        };
        old.unwrap_or_default()
    }

    pub fn statuses(&self) -> Vec<(String, String)> {
        self.lock()
            .statuses
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    fn post_mail(&self, task: Task<T>) -> u64 {
        let mut state = self.lock();
        let number = state.next_mail;
        state.next_mail += 1;
        state.mailbox.insert(number, task);
        number
    }

    fn take_mail(&self, number: u64) -> Option<Task<T>> {
        self.lock().mailbox.remove(&number)
    }

    /// Drop everything still queued and wake every blocked thread. Waiting
    /// retrievals fail with [`Error::Shutdown`].
    pub fn shutdown(&self) {
        let mut state = self.lock();
        state.shut_down = true;
        let mail = state.mailbox.len();
        let futures = state.futures.len();
        let undelivered = state
            .futures
            .values()
            .filter(|slot| slot.delivery.is_none())
            .count();
        state.mailbox.clear();
        state.futures.clear();
        state.statuses.clear();
        self.shared.changed.notify_all();
        debug!(mail, futures, undelivered, "coordinator shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.lock().shut_down
    }

    /// Number of future slots still allocated.
    pub fn live_futures(&self) -> usize {
        self.lock().futures.len()
    }

    pub fn refcount(&self, id: FutureId) -> Option<usize> {
        self.lock().futures.get(&id.0).map(|slot| slot.refcount)
    }
}

impl<T: Clone> Coordinator<T> {
    /// Block until `id` is delivered, then drop one reference. The last
    /// reference moves the delivery out; earlier ones copy it. The calling
    /// thread's core is lent out while it waits.
    pub(crate) fn retrieve(&self, id: FutureId) -> Result<Delivery<T>> {
        let mut state = self.lock();
        if !state.futures.contains_key(&id.0) {
            return Err(if state.shut_down {
                Error::Shutdown
            } else {
                Error::Protocol(format!("future {id} has no slot"))
            });
        }
        let ready = |state: &State<T>| {
            state
                .futures
                .get(&id.0)
                .is_some_and(|slot| slot.delivery.is_some())
        };
        if !ready(&state) {
            state = self.trade_locked(state, 1, 0);
            while !ready(&state) && !state.shut_down {
                state = self.wait(state);
            }
            state = self.trade_locked(state, 0, 1);
        }

        let slot = state.futures.get_mut(&id.0).ok_or(Error::Shutdown)?;
        slot.refcount = slot.refcount.saturating_sub(1);
        if slot.refcount > 0 {
            return slot.delivery.clone().ok_or(Error::Shutdown);
        }
        state
            .futures
            .remove(&id.0)
            .and_then(|slot| slot.delivery)
            .ok_or(Error::Shutdown)
    }
}

impl<T: Send + 'static> Coordinator<T> {
    /// Run `task` on a new named thread.
    ///
    /// The caller's core passes to the new thread, and the caller queues for
    /// another before returning. A panic inside `task` is caught and
    /// delivered to the returned future as a [`WorkerFault`]. The thread
    /// gives its core back when it finishes.
    pub fn spawn<F>(&self, name: &str, task: F) -> Result<(FutureHandle<T>, JoinHandle<()>)>
    where
        F: FnOnce(Coordinator<T>) -> T + Send + 'static,
    {
        let completion = self.new_future();
        let id = completion.id();
        let mail = self.post_mail(Box::new(task));
        let coordinator = self.clone();
        let worker = name.to_string();

        let spawned = thread::Builder::new().name(worker.clone()).spawn(move || {
            let outcome = match coordinator.take_mail(mail) {
                Some(task) => {
                    let child = coordinator.clone();
                    panic::catch_unwind(AssertUnwindSafe(move || task(child)))
                        .map_err(|payload| WorkerFault::from_panic(worker.as_str(), payload))
                }
                None => Err(WorkerFault::new(worker.as_str(), "task was not in the mailbox")),
            };
            if let Err(fault) = &outcome {
                warn!(worker = %fault.worker, message = %fault.message, "worker failed");
            }
            if !coordinator.deliver_outcome(id, outcome) {
                debug!(worker = %worker, "completion future dropped before delivery");
            }
            coordinator.release_core();
        });

        match spawned {
            Ok(thread) => {
                self.acquire_core();
                Ok((completion, thread))
            }
            Err(err) => {
                drop(self.take_mail(mail));
                Err(Error::Io(err))
            }
        }
    }
}
