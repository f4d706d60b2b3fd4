use thiserror::Error;

/// Returned by [`RefOwner::acquire`](crate::RefOwner::acquire) when no handle could be created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum AcquireError {
    #[error("cannot acquire a handle: the owner is marked for deletion")]
    Marked,
}

/// Explains why [`RefOwner::delete`](crate::RefOwner::delete) did not destroy the object.
///
/// None of these are fatal. Whether a refused deletion is retried, logged or escalated is up to
/// the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum DeleteError {
    #[error("the owner has not been marked for deletion")]
    NotMarked,
    #[error("the object has already been deleted")]
    AlreadyDeleted,
    #[error("{count} handle(s) are still outstanding")]
    Outstanding { count: usize },
}
