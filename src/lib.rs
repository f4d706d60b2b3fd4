//! An owner that lends out counted handles to its object, but keeps the decision of when that
//! object is destroyed to itself.
//!
//! A [`RefOwner`] holds a single object. Any number of threads can ask it for a [`Handle`], a
//! move-only borrow that keeps the object alive while it exists. Unlike an `Arc`, dropping the last
//! handle does not destroy anything: the owner first marks itself for deletion (after which no
//! new handle can be acquired) and then deletes the object once the handle count is back at zero.
//!
//! ```
//! use ref_owner::RefOwner;
//!
//! let owner = RefOwner::new(String::from("hello"));
//! {
//!     let handle = owner.try_acquire().unwrap();
//!     assert_eq!(&*handle, "hello");
//!
//!     owner.mark_for_deletion();
//!     assert!(owner.try_acquire().is_none());
//!     assert!(!owner.try_delete());
//! }
//! assert!(owner.try_delete());
//! ```
#![no_std]
#![allow(unused_unsafe)]
extern crate maybe_std as base;

#[cfg(any(test, feature = "waitable"))]
extern crate std;

/// A strategy invoked every time a unit of an owner's reference count is given back.
///
/// The owner calls [`on_release`](ReleaseHook::on_release) right after decrementing its counter,
/// both for dropped handles and for acquisitions that were rolled back because the owner had been
/// marked. Implementations must not assume that the object still exists, and they must not block
/// for long, as they run on the releasing thread.
pub trait ReleaseHook: Send + Sync {
    /// Called after a unit was released. `remaining` is the counter value right after the
    /// decrement.
    fn on_release(&self, remaining: usize, lifecycle: &Lifecycle);
}

/// The plain owner does nothing after a release.
impl ReleaseHook for () {
    #[inline]
    fn on_release(&self, _remaining: usize, _lifecycle: &Lifecycle) {}
}

mod error;
pub use error::*;

mod lifecycle;
pub use lifecycle::*;

mod owner;
pub use owner::*;

mod handle;
pub use handle::*;

#[cfg(feature = "waitable")]
mod waitable;
#[cfg(feature = "waitable")]
pub use waitable::*;
