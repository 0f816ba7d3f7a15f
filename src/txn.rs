//! Transaction coordinator
//!
//! A transaction here is a mutual-exclusion scope over an explicit set of
//! resource ids, not a durable commit.
//!
//! ```text
//! 1. dedupe + sort resource ids (lexical order is the global lock order)
//! 2. take write locks in that order
//!    on failure: release what was taken, fail with TransactionAborted
//! 3. run the unit of work
//! 4. release in reverse order, whatever the outcome
//! 5. return the unit of work's result unchanged
//! ```
//!
//! Any two transactions sharing resources lock them in the same relative
//! order, so no waiting cycle can form between them.
//!
//! If the process dies between two writes of one unit of work, the set can be
//! left half-applied. Indexes are then repaired by [`crate::repo::Reconciler`].

use crate::error::{Error, Result};
use crate::lock::{Acquire, LockManager, WriteGuard};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

/// Acquires lock sets in global order and runs units of work under them
#[derive(Debug, Clone)]
pub struct TransactionCoordinator {
    locks: Arc<LockManager>,
    defaults: Acquire,
}

/// Write guards of one transaction, released last-acquired first
struct HeldLocks(Vec<WriteGuard>);

impl Drop for HeldLocks {
    fn drop(&mut self) {
        while let Some(guard) = self.0.pop() {
            drop(guard);
        }
    }
}

impl TransactionCoordinator {
    pub fn new(locks: Arc<LockManager>, defaults: Acquire) -> Self {
        Self { locks, defaults }
    }

    pub fn locks(&self) -> &Arc<LockManager> {
        &self.locks
    }

    /// Run `work` holding write locks on every resource, with default wait limits
    pub fn run_in_transaction<T, I, S, F>(&self, resources: I, work: F) -> Result<T>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        F: FnOnce() -> Result<T>,
    {
        let acquire = self.defaults.clone();
        self.run_in_transaction_with(resources, &acquire, work)
    }

    /// Run `work` holding write locks on every resource
    pub fn run_in_transaction_with<T, I, S, F>(
        &self,
        resources: I,
        acquire: &Acquire,
        work: F,
    ) -> Result<T>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        F: FnOnce() -> Result<T>,
    {
        let ordered: BTreeSet<String> = resources.into_iter().map(Into::into).collect();
        let held = self.lock_all(&ordered, acquire)?;
        debug!(resources = ordered.len(), "transaction started");

        let result = work();

        drop(held);
        debug!(
            resources = ordered.len(),
            ok = result.is_ok(),
            "transaction finished"
        );
        result
    }

    fn lock_all(&self, ordered: &BTreeSet<String>, acquire: &Acquire) -> Result<HeldLocks> {
        let mut held = HeldLocks(Vec::with_capacity(ordered.len()));
        for resource in ordered {
            match self.locks.acquire_write(resource, acquire) {
                Ok(guard) => held.0.push(guard),
                Err(e) => {
                    // `held` releases everything taken so far on return
                    return Err(Error::TransactionAborted {
                        resource: resource.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }
        Ok(held)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::CancelToken;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;
    use std::thread;
    use std::time::Duration;

    fn coordinator() -> TransactionCoordinator {
        TransactionCoordinator::new(
            Arc::new(LockManager::new()),
            Acquire::new().with_poll_interval(Duration::from_millis(2)),
        )
    }

    #[test]
    fn test_result_and_error_propagate() {
        let txn = coordinator();
        let value = txn.run_in_transaction(["a", "b"], || Ok(42)).unwrap();
        assert_eq!(value, 42);

        let err = txn
            .run_in_transaction(["a"], || -> Result<()> {
                Err(Error::not_found(vaultpath::EntityKind::Test, "p", "x"))
            })
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));

        // locks were released on the error path
        txn.run_in_transaction(["a", "b"], || Ok(())).unwrap();
    }

    #[test]
    fn test_duplicates_are_locked_once() {
        let txn = coordinator();
        let ran = txn.run_in_transaction(["a", "a", "b", "a"], || Ok(true)).unwrap();
        assert!(ran);
    }

    #[test]
    fn test_opposite_order_does_not_deadlock() {
        let txn = coordinator();
        let barrier = Arc::new(Barrier::new(2));
        let completed = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = [["A", "B"], ["B", "A"]]
            .into_iter()
            .map(|order| {
                let txn = txn.clone();
                let barrier = Arc::clone(&barrier);
                let completed = Arc::clone(&completed);
                thread::spawn(move || {
                    barrier.wait();
                    for _ in 0..200 {
                        txn.run_in_transaction(order, || Ok(())).unwrap();
                    }
                    completed.fetch_add(1, Ordering::SeqCst);
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(completed.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_cancelled_acquisition_aborts_without_running_work() {
        let txn = coordinator();
        let locks = Arc::clone(txn.locks());
        let barrier = Arc::new(Barrier::new(2));
        let release = Arc::new(Barrier::new(2));

        // another thread holds "b" for the duration
        let holder = {
            let barrier = Arc::clone(&barrier);
            let release = Arc::clone(&release);
            thread::spawn(move || {
                let _b = locks.acquire_write("b", &Acquire::new()).unwrap();
                barrier.wait();
                release.wait();
            })
        };
        barrier.wait();

        let token = CancelToken::new();
        token.cancel();
        let acquire = Acquire::new().with_cancel(token);
        let ran = AtomicUsize::new(0);
        let err = txn
            .run_in_transaction_with(["a", "b"], &acquire, || {
                ran.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap_err();

        assert!(matches!(err, Error::TransactionAborted { ref resource, .. } if resource == "b"));
        assert_eq!(ran.load(Ordering::SeqCst), 0);

        // "a" was released when the attempt failed
        let a = txn.locks().acquire_write(
            "a",
            &Acquire::new().with_timeout(Duration::from_millis(20)),
        );
        assert!(a.is_ok());
        drop(a);

        release.wait();
        holder.join().unwrap();
    }
}
