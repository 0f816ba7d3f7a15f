//! In-process locking for testvault
//!
//! # Concurrency Model
//!
//! 1. **Resource ids**: every lock is keyed by a logical path or an opaque id
//!    (`session:{id}` for recording sessions). One mechanism for both.
//! 2. **Readers/writers**: many readers or one writer per resource; reentrant
//!    per thread.
//! 3. **Bounded waits**: every acquisition honours a [`CancelToken`] and an
//!    optional timeout, see [`Acquire`].
//!
//! Nothing here is persisted; locks live as long as the process.

mod cancel;
mod manager;
mod rwlock;

pub use cancel::{Acquire, CancelToken, DEFAULT_POLL_INTERVAL};
pub use manager::LockManager;
pub use rwlock::{LockStatus, ReadGuard, ResourceLock, WriteGuard};
