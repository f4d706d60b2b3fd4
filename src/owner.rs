use base::cell::UnsafeCell;
use base::fmt;
use base::marker::PhantomData;
use base::ptr::NonNull;

use base::prelude::v1::*;

use crate::handle::Release;
use crate::{AcquireError, DeleteError, Handle, Lifecycle, LifecycleState, ReleaseHook};

/// Destroys the managed object in place of simply dropping its box.
///
/// Useful when the object wraps storage that has to be handed back somewhere else.
pub type Deleter<T> = Box<dyn FnOnce(Box<T>) + Send>;

/// The single owner of an object that lends out counted [`Handle`]s.
///
/// Handles borrow the owner, so the owner cannot be moved or dropped while any of them is alive.
/// The object is destroyed by exactly one successful call to [`delete`](RefOwner::delete) (or
/// one of its wrappers), which requires the owner to be marked for deletion and the handle count
/// to be zero. Dropping the owner performs that deletion if it has not happened yet.
///
/// Units can only be outstanding at that point if a handle was leaked with `mem::forget`. Such an
/// owner cannot delete its object safely, so it leaks the object and reports the violation with
/// `log::error!` in every build configuration instead of panicking inside `drop`.
///
/// The `H` parameter is a [`ReleaseHook`] that runs after every release. The plain owner uses
/// `()`, the [`WaitableRefOwner`](crate::WaitableRefOwner) uses it to wake up waiters.
pub struct RefOwner<T: ?Sized, H: ReleaseHook = ()> {
    ptr: NonNull<T>,
    deleter: UnsafeCell<Option<Deleter<T>>>,
    lifecycle: Lifecycle,
    hook: H,
    phantom: PhantomData<T>,
}

// Whichever thread wins the deletion drops the object.
unsafe impl<T: ?Sized + Send, H: ReleaseHook> Send for RefOwner<T, H> {}
unsafe impl<T: ?Sized + Send + Sync, H: ReleaseHook> Sync for RefOwner<T, H> {}

impl<T> RefOwner<T> {
    /// Moves `value` to the heap and takes ownership of it.
    pub fn new(value: T) -> Self {
        Self::from_box(Box::new(value))
    }
}

impl<T: ?Sized> RefOwner<T> {
    /// Takes ownership of an already boxed, possibly unsized, object.
    pub fn from_box(value: Box<T>) -> Self {
        Self::from_parts(value, None, ())
    }

    /// Takes ownership of `value`, and hands it to `deleter` instead of dropping it on deletion.
    pub fn with_deleter<D>(value: Box<T>, deleter: D) -> Self
    where
        D: FnOnce(Box<T>) + Send + 'static,
    {
        let deleter: Deleter<T> = Box::new(deleter);
        Self::from_parts(value, Some(deleter), ())
    }
}

impl<T: ?Sized, H: ReleaseHook> RefOwner<T, H> {
    /// Creates an owner with an explicit deleter and release hook.
    pub fn from_parts(value: Box<T>, deleter: Option<Deleter<T>>, hook: H) -> Self {
        RefOwner {
            ptr: Box::leak(value).into(),
            deleter: UnsafeCell::new(deleter),
            lifecycle: Lifecycle::new(),
            hook,
            phantom: PhantomData,
        }
    }

    /// Acquires a handle, or returns `None` if the owner has been marked for deletion.
    pub fn try_acquire(&self) -> Option<Handle<'_, T>> {
        if !self.lifecycle.try_register(&self.hook) {
            log::trace!("handle acquisition denied: owner is marked for deletion");
            return None;
        }

        // The registered unit keeps the object alive until the handle gives it back.
        Some(unsafe { Handle::from_registered(self, self.ptr) })
    }

    /// Like [`try_acquire`](RefOwner::try_acquire), for callers that treat a marked owner as an
    /// error.
    pub fn acquire(&self) -> Result<Handle<'_, T>, AcquireError> {
        self.try_acquire().ok_or(AcquireError::Marked)
    }

    /// Prevents all further acquisitions.
    ///
    /// Returns `true` if this call set the mark, `false` if the owner was already marked (or
    /// deleted). Acquisitions racing with this call may still succeed, but none that reads the
    /// mark after it was set.
    pub fn mark_for_deletion(&self) -> bool {
        let first = self.lifecycle.mark();
        if first {
            log::debug!(
                "owner marked for deletion with {} outstanding handle(s)",
                self.lifecycle.ref_count()
            );
        }
        first
    }

    /// Destroys the object if the owner is marked, not yet deleted, and has no outstanding
    /// handles.
    ///
    /// When several threads call this at once, at most one of them gets `Ok(())` and runs the
    /// destructor (or deleter).
    pub fn delete(&self) -> Result<(), DeleteError> {
        self.lifecycle.claim_deletion()?;

        // We won the claim while the owner was marked and no unit was outstanding, so there is
        // no handle left and none can be created anymore.
        unsafe { self.destroy() };
        Ok(())
    }

    /// Returns whether this call destroyed the object. See [`delete`](RefOwner::delete).
    pub fn try_delete(&self) -> bool {
        self.delete().is_ok()
    }

    /// Marks the owner, then tries to delete the object.
    ///
    /// The two steps are not atomic as a pair. An acquisition in between either fails or was
    /// already counted, in which case the deletion is refused.
    pub fn mark_and_try_delete(&self) -> bool {
        self.mark_for_deletion();
        self.try_delete()
    }

    #[inline(never)]
    unsafe fn destroy(&self) {
        let object = unsafe { Box::from_raw(self.ptr.as_ptr()) };
        match unsafe { (*self.deleter.get()).take() } {
            Some(deleter) => deleter(object),
            None => drop(object),
        }
        log::debug!("managed object destroyed");
    }

    /// Gives exclusive access to the object, unless it has been deleted.
    ///
    /// Holding `&mut self` proves that no handle is alive.
    pub fn get_mut(&mut self) -> Option<&mut T> {
        if self.lifecycle.is_deleted() {
            None
        } else {
            Some(unsafe { self.ptr.as_mut() })
        }
    }

    /// The number of outstanding handles.
    pub fn ref_count(&self) -> usize {
        self.lifecycle.ref_count()
    }

    /// Whether any handle is outstanding.
    pub fn has_outstanding_references(&self) -> bool {
        self.lifecycle.ref_count() > 0
    }

    /// Whether the owner has been marked; acquisitions fail from then on.
    pub fn is_marked_for_deletion(&self) -> bool {
        self.lifecycle.is_marked()
    }

    /// Whether the object has been destroyed.
    pub fn is_deleted(&self) -> bool {
        self.lifecycle.is_deleted()
    }

    /// The owner's current [`LifecycleState`].
    pub fn state(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    /// The shared counter and flags.
    pub fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    /// The hook that runs after every release.
    pub fn release_hook(&self) -> &H {
        &self.hook
    }
}

impl<T: ?Sized, H: ReleaseHook> Release for RefOwner<T, H> {
    #[inline]
    fn release(&self) {
        self.lifecycle.release(&self.hook);
    }
}

impl<T: ?Sized, H: ReleaseHook> Drop for RefOwner<T, H> {
    /// Deletes the object if that has not happened yet.
    ///
    /// No handle can outlive the owner, so units can only be outstanding here if a handle was
    /// leaked with `mem::forget`. The object is then leaked too, never destroyed.
    fn drop(&mut self) {
        if self.lifecycle.is_deleted() {
            return;
        }

        self.lifecycle.mark();
        if let Err(err) = self.delete() {
            log::error!("owner dropped without deleting its object ({}), leaking it", err);
        }
    }
}

impl<T: ?Sized, H: ReleaseHook> fmt::Debug for RefOwner<T, H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefOwner")
            .field("ref_count", &self.ref_count())
            .field("state", &self.state())
            .finish()
    }
}

impl<T: Default> Default for RefOwner<T> {
    /// Creates a new `RefOwner<T>`, with the `Default` value for `T`.
    fn default() -> RefOwner<T> {
        RefOwner::new(Default::default())
    }
}

impl<T> From<T> for RefOwner<T> {
    fn from(t: T) -> Self {
        RefOwner::new(t)
    }
}

impl<T: ?Sized> From<Box<T>> for RefOwner<T> {
    fn from(b: Box<T>) -> Self {
        RefOwner::from_box(b)
    }
}
