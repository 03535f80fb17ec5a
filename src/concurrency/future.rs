//! Refcounted handles to values delivered through the coordinator.

use std::any::Any;
use std::fmt;
use std::sync::{Mutex, PoisonError};

use crate::error::{Error, Result};

use super::coordinator::Coordinator;

/// Identifies a future slot in a [`Coordinator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FutureId(pub(crate) u64);

impl fmt::Display for FutureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A worker failure: a panic caught at the worker boundary, or a worker
/// process that died.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{worker}: {message}")]
pub struct WorkerFault {
    pub worker: String,
    pub message: String,
}

impl WorkerFault {
    pub fn new(worker: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            worker: worker.into(),
            message: message.into(),
        }
    }

    /// Recover the message from a `catch_unwind` payload.
    pub fn from_panic(worker: impl Into<String>, payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "panic with non-string payload".to_string()
        };
        Self::new(worker, message)
    }
}

/// What a future slot holds once delivered.
#[derive(Debug, Clone)]
pub struct Delivery<T> {
    /// Coordinator-wide delivery sequence number.
    pub timestamp: u64,
    pub outcome: std::result::Result<T, WorkerFault>,
}

impl<T> Delivery<T> {
    fn into_result(self) -> Result<T> {
        self.outcome.map_err(Error::from)
    }
}

enum Retrieval<T> {
    Pending,
    Cached(Delivery<T>),
    Taken,
}

/// Handle to a value some thread will deliver later.
///
/// Each handle holds one reference on its slot. Cloning an unretrieved handle
/// adds a reference; dropping one removes it. Retrieving removes the handle's
/// reference and caches the delivery on the handle, so the slot is freed as
/// soon as every holder has either retrieved or dropped.
pub struct FutureHandle<T> {
    coordinator: Coordinator<T>,
    id: FutureId,
    state: Mutex<Retrieval<T>>,
}

impl<T> FutureHandle<T> {
    pub(crate) fn new(coordinator: Coordinator<T>, id: FutureId) -> Self {
        Self {
            coordinator,
            id,
            state: Mutex::new(Retrieval::Pending),
        }
    }

    pub fn id(&self) -> FutureId {
        self.id
    }

    /// True once a value is available without blocking.
    pub fn is_ready(&self) -> bool {
        match &*self.state.lock().unwrap_or_else(PoisonError::into_inner) {
            Retrieval::Pending => self.coordinator.is_delivered(self.id),
            Retrieval::Cached(_) | Retrieval::Taken => true,
        }
    }

    /// Delivery timestamp if the value has arrived.
    pub(crate) fn timestamp(&self) -> Option<u64> {
        match &*self.state.lock().unwrap_or_else(PoisonError::into_inner) {
            Retrieval::Pending => self.coordinator.delivery_timestamp(self.id),
            Retrieval::Cached(delivery) => Some(delivery.timestamp),
            Retrieval::Taken => None,
        }
    }
}

impl<T: Clone> FutureHandle<T> {
    /// Block until delivered and take the value, consuming the handle.
    pub fn take(self) -> Result<T> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let delivery = match std::mem::replace(&mut *state, Retrieval::Taken) {
            Retrieval::Pending => self.coordinator.retrieve(self.id)?,
            Retrieval::Cached(delivery) => delivery,
            Retrieval::Taken => return Err(Error::Protocol(format!("future {} taken twice", self.id))),
        };
        delivery.into_result()
    }

    /// Block until delivered and return a copy of the value. Later calls
    /// return the cached delivery.
    pub fn get(&self) -> Result<T> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if let Retrieval::Pending = *state {
            // Holding the handle lock keeps a concurrent `get` from retrieving twice.
            let delivery = self.coordinator.retrieve(self.id)?;
            *state = Retrieval::Cached(delivery);
        }
        match &*state {
            Retrieval::Cached(delivery) => delivery.clone().into_result(),
            _ => Err(Error::Protocol(format!("future {} already taken", self.id))),
        }
    }
}

impl<T: Clone> Clone for FutureHandle<T> {
    fn clone(&self) -> Self {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let copied = match &*state {
            Retrieval::Pending => {
                self.coordinator.ref_future(self.id);
                Retrieval::Pending
            }
            Retrieval::Cached(delivery) => Retrieval::Cached(delivery.clone()),
            Retrieval::Taken => Retrieval::Taken,
        };
        Self {
            coordinator: self.coordinator.clone(),
            id: self.id,
            state: Mutex::new(copied),
        }
    }
}

impl<T> Drop for FutureHandle<T> {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Retrieval::Pending = state {
            self.coordinator.deref_future(self.id);
        }
    }
}

impl<T> fmt::Debug for FutureHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FutureHandle").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn panic_payloads_become_messages() {
        let fault = WorkerFault::from_panic("w0", Box::new("boom"));
        assert_eq!(fault.message, "boom");
        let fault = WorkerFault::from_panic("w1", Box::new(String::from("bang")));
        assert_eq!(fault.to_string(), "w1: bang");
        let fault = WorkerFault::from_panic("w2", Box::new(17_u32));
        assert_eq!(fault.worker, "w2");
    }

    #[test]
    fn get_caches_the_delivery() {
        let coordinator = Coordinator::new(2);
        let handle = coordinator.new_future();
        assert!(!handle.is_ready());
        coordinator.deliver(handle.id(), 42_u32);
        assert!(handle.is_ready());
        assert_eq!(handle.get().unwrap(), 42);
        // The slot is gone but the handle remembers.
        assert_eq!(coordinator.live_futures(), 0);
        assert_eq!(handle.get().unwrap(), 42);
    }

    #[test]
    fn clones_share_one_slot() {
        let coordinator = Coordinator::<u32>::new(2);
        let first = coordinator.new_future();
        let second = first.clone();
        assert_eq!(coordinator.refcount(first.id()), Some(2));
        drop(second);
        assert_eq!(coordinator.refcount(first.id()), Some(1));
        drop(first);
        assert_eq!(coordinator.live_futures(), 0);
    }

    #[test]
    fn clone_after_get_does_not_touch_the_slot() {
        let coordinator = Coordinator::new(2);
        let handle = coordinator.new_future();
        let id = handle.id();
        coordinator.deliver(id, 5_i32);
        assert_eq!(handle.get().unwrap(), 5);
        let copy = handle.clone();
        assert_eq!(copy.get().unwrap(), 5);
        assert_eq!(coordinator.refcount(id), None);
    }

    #[test]
    fn take_blocks_until_delivered() {
        let coordinator = Coordinator::new(2);
        let handle = coordinator.new_future();
        let id = handle.id();
        let sender = coordinator.clone();
        let producer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            sender.deliver(id, "done".to_string());
        });
        assert_eq!(handle.take().unwrap(), "done");
        producer.join().unwrap();
        assert_eq!(coordinator.used(), 1);
    }

    #[test]
    fn faults_surface_as_worker_errors() {
        let coordinator = Coordinator::<u8>::new(1);
        let handle = coordinator.new_future();
        coordinator.deliver_fault(handle.id(), WorkerFault::new("w", "scorer panicked"));
        match handle.take() {
            Err(Error::Worker(fault)) => assert_eq!(fault.message, "scorer panicked"),
            other => panic!("expected worker fault, got {other:?}"),
        }
    }
}
