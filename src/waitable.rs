use base::fmt;
use base::ops::Deref;

use base::prelude::v1::*;

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::{DeleteError, Deleter, Lifecycle, RefOwner, ReleaseHook};

/// Release hook that wakes up threads waiting for a marked owner to drain.
#[derive(Debug, Default)]
pub struct DrainSignal {
    lock: Mutex<()>,
    drained: Condvar,
}

impl ReleaseHook for DrainSignal {
    fn on_release(&self, remaining: usize, lifecycle: &Lifecycle) {
        if remaining == 0 && lifecycle.is_marked() {
            // A waiter checks the count while holding the lock, so taking it here means the
            // notification cannot fall between its check and its wait.
            let _guard = self.lock.lock();
            self.drained.notify_all();
        }
    }
}

impl DrainSignal {
    /// Blocks until `lifecycle` has no outstanding units, or until `deadline` has passed.
    /// Returns whether the count reached zero.
    fn wait_for_zero(&self, lifecycle: &Lifecycle, deadline: Option<Instant>) -> bool {
        let mut guard = self.lock.lock();
        while lifecycle.ref_count() != 0 {
            match deadline {
                Some(deadline) => {
                    if self.drained.wait_until(&mut guard, deadline).timed_out() {
                        return lifecycle.ref_count() == 0;
                    }
                }
                None => self.drained.wait(&mut guard),
            }
        }
        true
    }
}

/// A [`RefOwner`] that can block until all handles are released, and then delete its object.
///
/// All of the [`RefOwner`] operations are available through `Deref`.
pub struct WaitableRefOwner<T: ?Sized> {
    owner: RefOwner<T, DrainSignal>,
}

impl<T> WaitableRefOwner<T> {
    pub fn new(value: T) -> Self {
        Self::from_box(Box::new(value))
    }
}

impl<T: ?Sized> WaitableRefOwner<T> {
    pub fn from_box(value: Box<T>) -> Self {
        WaitableRefOwner {
            owner: RefOwner::from_parts(value, None, DrainSignal::default()),
        }
    }

    pub fn with_deleter<D>(value: Box<T>, deleter: D) -> Self
    where
        D: FnOnce(Box<T>) + Send + 'static,
    {
        let deleter: Deleter<T> = Box::new(deleter);
        WaitableRefOwner {
            owner: RefOwner::from_parts(value, Some(deleter), DrainSignal::default()),
        }
    }

    /// Marks the owner, blocks until every handle has been released, and deletes the object.
    pub fn mark_and_wait(&self) {
        let deleted = self.mark_and_wait_with(None);
        debug_assert!(deleted);
    }

    /// Marks the owner and waits at most `timeout` for every handle to be released.
    ///
    /// Returns `true` if the object is deleted when this returns. On timeout nothing is deleted
    /// and `false` is returned; the owner stays marked, so a later call can try again.
    pub fn mark_and_wait_for_zero(&self, timeout: Duration) -> bool {
        self.mark_and_wait_with(Instant::now().checked_add(timeout))
    }

    /// Like [`mark_and_wait_for_zero`](WaitableRefOwner::mark_and_wait_for_zero), with an
    /// absolute deadline.
    pub fn mark_and_wait_until(&self, deadline: Instant) -> bool {
        self.mark_and_wait_with(Some(deadline))
    }

    fn mark_and_wait_with(&self, deadline: Option<Instant>) -> bool {
        self.owner.mark_for_deletion();

        loop {
            let signal = self.owner.release_hook();
            if !signal.wait_for_zero(self.owner.lifecycle(), deadline) {
                log::warn!(
                    "timed out waiting for {} outstanding handle(s) to be released",
                    self.owner.ref_count()
                );
                return false;
            }

            match self.owner.delete() {
                Ok(()) | Err(DeleteError::AlreadyDeleted) => return true,
                // A failed acquisition had not rolled back its unit yet. Its rollback notifies.
                Err(_) => continue,
            }
        }
    }
}

impl<T: ?Sized> Deref for WaitableRefOwner<T> {
    type Target = RefOwner<T, DrainSignal>;

    fn deref(&self) -> &RefOwner<T, DrainSignal> {
        &self.owner
    }
}

impl<T: ?Sized> fmt::Debug for WaitableRefOwner<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("WaitableRefOwner").field(&self.owner).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicBool, Ordering::SeqCst};
    use std::thread;

    #[test]
    fn no_handles_deletes_immediately() {
        let owner = WaitableRefOwner::new(1u8);
        owner.mark_and_wait();
        assert!(owner.is_deleted());
    }

    #[test]
    fn times_out_while_handle_is_held() {
        let owner = WaitableRefOwner::new(1u8);
        let handle = owner.try_acquire().unwrap();

        assert!(!owner.mark_and_wait_for_zero(Duration::from_millis(10)));
        assert!(owner.is_marked_for_deletion());
        assert!(!owner.is_deleted());

        drop(handle);
        assert!(owner.mark_and_wait_for_zero(Duration::from_millis(100)));
        assert!(owner.is_deleted());
    }

    #[test]
    fn waiter_wakes_when_last_handle_goes() {
        let owner = WaitableRefOwner::new(1u8);
        let released = AtomicBool::new(false);

        thread::scope(|s| {
            let handle = owner.try_acquire().unwrap();
            s.spawn(|| {
                thread::sleep(Duration::from_millis(20));
                released.store(true, SeqCst);
                drop(handle);
            });

            owner.mark_and_wait();
            assert!(released.load(SeqCst));
        });

        assert!(owner.is_deleted());
    }

    #[test]
    fn deadline_in_the_past_still_checks_count() {
        let owner = WaitableRefOwner::new(1u8);
        let handle = owner.try_acquire().unwrap();
        assert!(!owner.mark_and_wait_until(Instant::now()));

        drop(handle);
        assert!(owner.mark_and_wait_until(Instant::now()));
    }

    #[test]
    fn already_deleted_counts_as_done() {
        let owner = WaitableRefOwner::new(1u8);
        assert!(owner.mark_and_try_delete());
        assert!(owner.mark_and_wait_for_zero(Duration::from_millis(1)));
    }
}
