use base::fmt;
use base::sync::atomic::{AtomicBool, AtomicUsize, Ordering::SeqCst};

use crate::{DeleteError, ReleaseHook};

/// A soft limit on the amount of handles that may be outstanding for one owner.
///
/// Going above this limit panics at _exactly_ `MAX_REFCOUNT + 1` outstanding units, after the
/// offending unit has been given back.
const MAX_REFCOUNT: usize = (isize::MAX) as usize;

/// The states an owner moves through. There is no way back from `Deleted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    /// Handles can be acquired.
    Active,
    /// No further handle can be acquired, the object still exists.
    Marked,
    /// The object has been destroyed.
    Deleted,
}

/// The shared counter and flags of an owner.
///
/// Every access uses sequentially consistent ordering. Acquisition increments before it reads the
/// mark, and deletion reads the mark before it reads the counter; both orders only line up if all
/// threads agree on a single order of these operations.
///
/// The invariants, over units held by live handles:
///
/// - `deleted => ref_count == 0`
/// - `ref_count > 0 => !deleted`
/// - `deleted => marked`
///
/// The raw counter can briefly include the unit of an acquisition that is about to be rolled
/// back, so a concurrent reader of [`ref_count`](Lifecycle::ref_count) may see one more unit than
/// there are handles.
pub struct Lifecycle {
    ref_count: AtomicUsize,
    marked: AtomicBool,
    deleted: AtomicBool,
}

impl Lifecycle {
    pub(crate) const fn new() -> Self {
        Lifecycle {
            ref_count: AtomicUsize::new(0),
            marked: AtomicBool::new(false),
            deleted: AtomicBool::new(false),
        }
    }

    /// The number of outstanding units.
    #[inline]
    pub fn ref_count(&self) -> usize {
        self.ref_count.load(SeqCst)
    }

    /// Whether the owner has been marked for deletion.
    #[inline]
    pub fn is_marked(&self) -> bool {
        self.marked.load(SeqCst)
    }

    /// Whether the object has been destroyed.
    #[inline]
    pub fn is_deleted(&self) -> bool {
        self.deleted.load(SeqCst)
    }

    /// The current state, derived from both flags.
    pub fn state(&self) -> LifecycleState {
        if self.is_deleted() {
            LifecycleState::Deleted
        } else if self.is_marked() {
            LifecycleState::Marked
        } else {
            LifecycleState::Active
        }
    }

    /// Registers one unit, unless the owner is marked.
    ///
    /// The increment has to happen before the mark is read. Reading first would let a deleter
    /// observe a zero count between our check and our increment, and we would hand out a handle
    /// to a destroyed object.
    pub(crate) fn try_register<H: ReleaseHook + ?Sized>(&self, hook: &H) -> bool {
        let old_count = self.ref_count.fetch_add(1, SeqCst);

        // Same degenerate case as an `Arc` that has been `mem::forget`-cloned too often.
        if old_count > MAX_REFCOUNT {
            self.release(hook);
            panic!("reference count overflow");
        }

        if self.marked.load(SeqCst) {
            // Rollbacks go through the hook as well: this may be the decrement that brings a
            // marked owner back to zero.
            self.release(hook);
            return false;
        }

        true
    }

    /// Gives back one unit.
    pub(crate) fn release<H: ReleaseHook + ?Sized>(&self, hook: &H) {
        let old_count = self.ref_count.fetch_sub(1, SeqCst);
        debug_assert!(old_count > 0, "released a unit that was never registered");
        hook.on_release(old_count - 1, self);
    }

    /// Sets the mark. Returns whether this call was the one that set it.
    pub(crate) fn mark(&self) -> bool {
        !self.marked.swap(true, SeqCst)
    }

    /// Checks the deletion preconditions in order and then claims the deletion.
    ///
    /// At most one caller ever gets `Ok(())`, and only that caller may destroy the object.
    pub(crate) fn claim_deletion(&self) -> Result<(), DeleteError> {
        if !self.marked.load(SeqCst) {
            return Err(DeleteError::NotMarked);
        }

        if self.deleted.load(SeqCst) {
            return Err(DeleteError::AlreadyDeleted);
        }

        let count = self.ref_count.load(SeqCst);
        if count != 0 {
            return Err(DeleteError::Outstanding { count });
        }

        self.deleted
            .compare_exchange(false, true, SeqCst, SeqCst)
            .map(|_| ())
            .map_err(|_| DeleteError::AlreadyDeleted)
    }
}

impl fmt::Debug for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lifecycle")
            .field("ref_count", &self.ref_count())
            .field("marked", &self.is_marked())
            .field("deleted", &self.is_deleted())
            .finish()
    }
}
