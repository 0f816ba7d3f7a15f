//! Reentrant read/write lock for one resource
//!
//! Many readers or one writer. Ownership is tracked per thread:
//! - a writer may take the write lock again and may take read locks
//! - a reader may take the read lock again
//! - a reader asking for the write lock is refused rather than deadlocked
//!
//! Waiting writers block new readers so a steady stream of readers cannot
//! starve them. Threads already holding the lock are exempt.

use super::cancel::Acquire;
use crate::error::{Error, Result};
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::Instant;

#[derive(Debug, Default)]
struct LockState {
    writer: Option<ThreadId>,
    write_holds: usize,
    readers: HashMap<ThreadId, usize>,
    waiting_writers: usize,
}

impl LockState {
    fn holds(&self, me: ThreadId) -> bool {
        self.writer == Some(me) || self.readers.contains_key(&me)
    }
}

/// The lock registered for one resource id
#[derive(Debug)]
pub struct ResourceLock {
    resource: String,
    state: Mutex<LockState>,
    cond: Condvar,
}

/// Snapshot of who holds a lock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockStatus {
    pub readers: usize,
    pub writer: bool,
    pub waiting_writers: usize,
}

impl ResourceLock {
    pub fn new(resource: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            state: Mutex::new(LockState::default()),
            cond: Condvar::new(),
        }
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn status(&self) -> LockStatus {
        let state = self.state.lock();
        LockStatus {
            readers: state.readers.values().sum(),
            writer: state.writer.is_some(),
            waiting_writers: state.waiting_writers,
        }
    }

    /// Block until a read hold is granted
    pub fn read(self: &Arc<Self>, acquire: &Acquire) -> Result<ReadGuard> {
        let me = thread::current().id();
        let started = Instant::now();
        let mut state = self.state.lock();

        loop {
            let writer_ok = state.writer.map(|w| w == me).unwrap_or(true);
            if writer_ok && (state.waiting_writers == 0 || state.holds(me)) {
                *state.readers.entry(me).or_insert(0) += 1;
                return Ok(ReadGuard {
                    lock: Arc::clone(self),
                    _not_send: PhantomData,
                });
            }
            self.wait(&mut state, acquire, started)?;
        }
    }

    /// Block until the write hold is granted
    pub fn write(self: &Arc<Self>, acquire: &Acquire) -> Result<WriteGuard> {
        let me = thread::current().id();
        let started = Instant::now();
        let mut state = self.state.lock();

        if state.writer == Some(me) {
            state.write_holds += 1;
            return Ok(self.write_guard());
        }
        if state.readers.contains_key(&me) {
            return Err(Error::LockUpgrade {
                resource: self.resource.clone(),
            });
        }

        state.waiting_writers += 1;
        let granted = loop {
            if state.writer.is_none() && state.readers.is_empty() {
                state.writer = Some(me);
                state.write_holds = 1;
                break Ok(());
            }
            if let Err(e) = self.wait(&mut state, acquire, started) {
                break Err(e);
            }
        };
        state.waiting_writers -= 1;

        match granted {
            Ok(()) => Ok(self.write_guard()),
            Err(e) => {
                // readers held back for this writer may go now
                self.cond.notify_all();
                Err(e)
            }
        }
    }

    fn write_guard(self: &Arc<Self>) -> WriteGuard {
        WriteGuard {
            lock: Arc::clone(self),
            _not_send: PhantomData,
        }
    }

    fn wait(
        &self,
        state: &mut MutexGuard<'_, LockState>,
        acquire: &Acquire,
        started: Instant,
    ) -> Result<()> {
        if acquire.is_cancelled() {
            return Err(Error::LockCancelled {
                resource: self.resource.clone(),
            });
        }

        let mut slice = acquire.poll_interval;
        if let Some(timeout) = acquire.timeout {
            let waited = started.elapsed();
            if waited >= timeout {
                return Err(Error::LockTimeout {
                    resource: self.resource.clone(),
                    waited,
                });
            }
            slice = slice.min(timeout - waited);
        }

        self.cond.wait_for(state, slice);
        Ok(())
    }

    fn release_read(&self) {
        let me = thread::current().id();
        let mut state = self.state.lock();
        if let Some(count) = state.readers.get_mut(&me) {
            *count -= 1;
            if *count == 0 {
                state.readers.remove(&me);
            }
        }
        drop(state);
        self.cond.notify_all();
    }

    fn release_write(&self) {
        let mut state = self.state.lock();
        state.write_holds = state.write_holds.saturating_sub(1);
        if state.write_holds == 0 {
            state.writer = None;
        }
        drop(state);
        self.cond.notify_all();
    }
}

/// A read hold; released on drop
///
/// Holds are tracked per thread, so guards cannot move between threads.
#[must_use = "the lock is released as soon as the guard is dropped"]
#[derive(Debug)]
pub struct ReadGuard {
    lock: Arc<ResourceLock>,
    _not_send: PhantomData<*const ()>,
}

impl ReadGuard {
    pub fn resource(&self) -> &str {
        self.lock.resource()
    }
}

impl Drop for ReadGuard {
    fn drop(&mut self) {
        self.lock.release_read();
    }
}

/// A write hold; released on drop
#[must_use = "the lock is released as soon as the guard is dropped"]
#[derive(Debug)]
pub struct WriteGuard {
    lock: Arc<ResourceLock>,
    _not_send: PhantomData<*const ()>,
}

impl WriteGuard {
    pub fn resource(&self) -> &str {
        self.lock.resource()
    }
}

impl Drop for WriteGuard {
    fn drop(&mut self) {
        self.lock.release_write();
    }
}
