use base::any::Any;
use base::borrow;
use base::cmp::Ordering;
use base::fmt;
use base::hash::{Hash, Hasher};
use base::marker::PhantomData;
use base::mem::ManuallyDrop;
use base::ops::Deref;
use base::ptr::NonNull;

/// Gives one unit back to the owner a handle was acquired from.
///
/// Implementations may only touch atomics and their `Sync` release hook, since handles release
/// from whichever thread drops them.
pub(crate) trait Release {
    fn release(&self);
}

/// A move-only borrow of an object held by a [`RefOwner`](crate::RefOwner).
///
/// Every handle stands for exactly one unit of its owner's reference count, and the owner
/// refuses to delete the object while any unit is outstanding. Holding a handle therefore proves
/// that the object is alive, and access through it never fails.
///
/// Moving a handle moves its unit along; the count only changes when a handle is acquired or
/// dropped. The same holds for [`widen`](Handle::widen) and the narrowing conversions, which
/// change the type a handle refers to without touching the count.
pub struct Handle<'a, R: ?Sized> {
    owner: &'a (dyn Release + 'a),
    target: NonNull<R>,
    phantom: PhantomData<&'a R>,
}

// A handle is a shared borrow of `R`. Releasing only touches the owner's atomics and its
// `ReleaseHook`, which is `Send + Sync`.
unsafe impl<R: ?Sized + Sync> Send for Handle<'_, R> {}
unsafe impl<R: ?Sized + Sync> Sync for Handle<'_, R> {}

impl<'a, R: ?Sized> Handle<'a, R> {
    /// Safety: the caller must have registered a unit with `owner` that this handle now owns,
    /// and `target` must point into the object kept alive by that unit.
    pub(crate) unsafe fn from_registered(owner: &'a (dyn Release + 'a), target: NonNull<R>) -> Self {
        Handle {
            owner,
            target,
            phantom: PhantomData,
        }
    }

    /// Moves the unit held by `this` into a handle for `target`.
    fn transfer<U: ?Sized + 'a>(this: Self, target: NonNull<U>) -> Handle<'a, U> {
        let this = ManuallyDrop::new(this);
        Handle {
            owner: this.owner,
            target,
            phantom: PhantomData,
        }
    }

    #[inline]
    pub fn get(this: &Self) -> &R {
        // The unit held by this handle keeps the object from being deleted.
        unsafe { this.target.as_ref() }
    }

    /// Gives the unit back. Equivalent to dropping the handle.
    pub fn release(this: Self) {
        drop(this);
    }

    pub fn as_ptr(this: &Self) -> *const R {
        this.target.as_ptr()
    }

    /// Returns whether both handles refer to the same address.
    pub fn ptr_eq<U: ?Sized>(this: &Self, other: &Handle<'_, U>) -> bool {
        Self::as_ptr(this) as *const () == Handle::as_ptr(other) as *const ()
    }

    /// Converts the handle through a reference conversion that cannot fail, typically an
    /// unsizing coercion to a trait object.
    ///
    /// ```
    /// use std::fmt::Display;
    /// use ref_owner::{Handle, RefOwner};
    ///
    /// let owner = RefOwner::new(5u32);
    /// let handle = owner.try_acquire().unwrap();
    /// let display: Handle<dyn Display> = Handle::widen(handle, |n| n as &dyn Display);
    /// assert_eq!(display.to_string(), "5");
    /// assert_eq!(owner.ref_count(), 1);
    /// ```
    pub fn widen<U, F>(this: Self, f: F) -> Handle<'a, U>
    where
        U: ?Sized + 'a,
        F: FnOnce(&R) -> &U,
    {
        let target = NonNull::from(f(Self::get(&this)));
        Self::transfer(this, target)
    }

    /// Converts the handle through a checked reference conversion.
    ///
    /// If `f` returns `None`, the original handle is returned untouched in the `Err` variant.
    pub fn try_narrow<U, F>(this: Self, f: F) -> Result<Handle<'a, U>, Self>
    where
        U: ?Sized + 'a,
        F: FnOnce(&R) -> Option<&U>,
    {
        let target = f(Self::get(&this)).map(NonNull::from);
        match target {
            Some(target) => Ok(Self::transfer(this, target)),
            None => Err(this),
        }
    }
}

mod sealed {
    pub trait Sealed {}
}

/// The `dyn Any` trait objects a handle can be narrowed from with [`Handle::narrow`].
///
/// Implemented for `dyn Any`, `dyn Any + Send` and `dyn Any + Send + Sync`, and cannot be
/// implemented outside of this crate.
pub trait AnyTarget: sealed::Sealed {
    #[doc(hidden)]
    fn downcast_target<U: Any>(&self) -> Option<&U>;
}

macro_rules! impl_any_target {
    ($($any:ty),*) => {
        $(
            impl sealed::Sealed for $any {}

            impl AnyTarget for $any {
                #[inline]
                fn downcast_target<U: Any>(&self) -> Option<&U> {
                    self.downcast_ref::<U>()
                }
            }
        )*
    };
}

impl_any_target!(dyn Any, dyn Any + Send, dyn Any + Send + Sync);

impl<'a, R: ?Sized + AnyTarget> Handle<'a, R> {
    /// Attempts to downcast the handle to a concrete type.
    ///
    /// On failure, the original handle is returned untouched in the `Err` variant.
    ///
    /// ```
    /// use std::any::Any;
    /// use ref_owner::{Handle, RefOwner};
    ///
    /// let boxed: Box<dyn Any + Send> = Box::new(7u8);
    /// let owner = RefOwner::from_box(boxed);
    /// let any = owner.try_acquire().unwrap();
    ///
    /// let any = match Handle::narrow::<u32>(any) {
    ///     Ok(_) => unreachable!(),
    ///     Err(any) => any,
    /// };
    /// assert_eq!(owner.ref_count(), 1);
    ///
    /// let number = Handle::narrow::<u8>(any).unwrap();
    /// assert_eq!(*number, 7);
    /// assert_eq!(owner.ref_count(), 1);
    /// ```
    pub fn narrow<U: Any>(this: Self) -> Result<Handle<'a, U>, Self> {
        Handle::try_narrow(this, |any| any.downcast_target::<U>())
    }
}

impl<R: ?Sized> Drop for Handle<'_, R> {
    #[inline]
    fn drop(&mut self) {
        self.owner.release();
    }
}

impl<R: ?Sized> Deref for Handle<'_, R> {
    type Target = R;

    #[inline]
    fn deref(&self) -> &R {
        Handle::get(self)
    }
}

impl<R: ?Sized> borrow::Borrow<R> for Handle<'_, R> {
    fn borrow(&self) -> &R {
        &**self
    }
}

impl<R: ?Sized> AsRef<R> for Handle<'_, R> {
    fn as_ref(&self) -> &R {
        &**self
    }
}

impl<R: ?Sized + fmt::Display> fmt::Display for Handle<'_, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&**self, f)
    }
}

impl<R: ?Sized + fmt::Debug> fmt::Debug for Handle<'_, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}

impl<R: ?Sized> fmt::Pointer for Handle<'_, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Pointer::fmt(&Handle::as_ptr(self), f)
    }
}

impl<R: ?Sized + PartialEq> PartialEq for Handle<'_, R> {
    /// Two handles are equal if the objects they refer to are equal.
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        (**self).eq(&**other)
    }
}

impl<R: ?Sized + Eq> Eq for Handle<'_, R> {}

impl<R: ?Sized + PartialOrd> PartialOrd for Handle<'_, R> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        (**self).partial_cmp(&**other)
    }
}

impl<R: ?Sized + Ord> Ord for Handle<'_, R> {
    fn cmp(&self, other: &Self) -> Ordering {
        (**self).cmp(&**other)
    }
}

impl<R: ?Sized + Hash> Hash for Handle<'_, R> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (**self).hash(state)
    }
}
