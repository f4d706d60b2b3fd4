//! Property-based tests for the owner lifecycle.
//!
//! Uses proptest to generate random operation sequences and checks them against a simple model,
//! asserting the lifecycle invariants after every step.

use std::any::Any;
use std::sync::atomic::{AtomicUsize, Ordering::SeqCst};
use std::sync::Arc;
use std::thread;

use proptest::prelude::*;
use ref_owner::{Handle, LifecycleState, RefOwner};

struct Tracked {
    drops: Arc<AtomicUsize>,
}

impl Drop for Tracked {
    fn drop(&mut self) {
        self.drops.fetch_add(1, SeqCst);
    }
}

#[derive(Debug, Clone)]
enum Op {
    Acquire,
    Release(usize),
    /// Narrow a held handle to its concrete type and widen it back.
    Convert(usize),
    /// Attempt a narrowing that must fail.
    BadNarrow(usize),
    Mark,
    Delete,
}

/// Strategy for generating single operations
fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => Just(Op::Acquire),
        3 => any::<usize>().prop_map(Op::Release),
        1 => any::<usize>().prop_map(Op::Convert),
        1 => any::<usize>().prop_map(Op::BadNarrow),
        1 => Just(Op::Mark),
        2 => Just(Op::Delete),
    ]
}

fn check_invariants<T: ?Sized>(owner: &RefOwner<T>) -> Result<(), TestCaseError> {
    let count = owner.ref_count();
    let marked = owner.is_marked_for_deletion();
    let deleted = owner.is_deleted();

    prop_assert!(!deleted || count == 0, "deleted with {} outstanding", count);
    prop_assert!(count == 0 || !deleted);
    prop_assert!(!deleted || marked, "deleted without being marked");
    Ok(())
}

proptest! {
    /// A single-threaded run matches the model after every operation.
    #[test]
    fn lifecycle_matches_model(ops in prop::collection::vec(op(), 0..80)) {
        let drops = Arc::new(AtomicUsize::new(0));
        let boxed: Box<dyn Any + Send + Sync> = Box::new(Tracked { drops: drops.clone() });
        let owner = RefOwner::from_box(boxed);

        let mut handles: Vec<Handle<dyn Any + Send + Sync>> = Vec::new();
        let mut marked = false;
        let mut deleted = false;

        for op in ops {
            match op {
                Op::Acquire => {
                    let handle = owner.try_acquire();
                    prop_assert_eq!(handle.is_some(), !marked);
                    handles.extend(handle);
                }
                Op::Release(i) => {
                    if !handles.is_empty() {
                        let len = handles.len();
                        Handle::release(handles.swap_remove(i % len));
                    }
                }
                Op::Convert(i) => {
                    if !handles.is_empty() {
                        let len = handles.len();
                        let handle = handles.swap_remove(i % len);
                        let tracked = match Handle::narrow::<Tracked>(handle) {
                            Ok(tracked) => tracked,
                            Err(_) => return Err(TestCaseError::fail("narrowing failed")),
                        };
                        handles.push(Handle::widen(tracked, |t| t as &(dyn Any + Send + Sync)));
                    }
                }
                Op::BadNarrow(i) => {
                    if !handles.is_empty() {
                        let len = handles.len();
                        let handle = handles.swap_remove(i % len);
                        let before = owner.ref_count();
                        let handle = match Handle::narrow::<String>(handle) {
                            Ok(_) => return Err(TestCaseError::fail("narrowing to the wrong type succeeded")),
                            Err(handle) => handle,
                        };
                        prop_assert_eq!(owner.ref_count(), before);
                        prop_assert!(handle.is::<Tracked>());
                        handles.push(handle);
                    }
                }
                Op::Mark => {
                    prop_assert_eq!(owner.mark_for_deletion(), !marked);
                    marked = true;
                }
                Op::Delete => {
                    let expected = marked && !deleted && handles.is_empty();
                    prop_assert_eq!(owner.try_delete(), expected);
                    deleted |= expected;
                }
            }

            check_invariants(&owner)?;
            prop_assert_eq!(owner.ref_count(), handles.len());
            prop_assert_eq!(owner.is_deleted(), deleted);
            prop_assert_eq!(drops.load(SeqCst), deleted as usize);
        }

        drop(handles);
        drop(owner);
        prop_assert_eq!(drops.load(SeqCst), 1);
    }

    /// Marking and then attempting acquisitions from several threads never changes the count.
    #[test]
    fn marked_acquisitions_roll_back(held in 0usize..4, threads in 1usize..6, attempts in 1usize..50) {
        let owner = RefOwner::new(0u64);
        let handles: Vec<_> = (0..held).map(|_| owner.try_acquire().unwrap()).collect();
        owner.mark_for_deletion();

        thread::scope(|s| {
            for _ in 0..threads {
                s.spawn(|| {
                    for _ in 0..attempts {
                        assert!(owner.try_acquire().is_none());
                    }
                });
            }
        });

        prop_assert_eq!(owner.ref_count(), held);
        prop_assert_eq!(owner.try_delete(), held == 0);
        drop(handles);
        prop_assert_eq!(owner.ref_count(), 0);
        prop_assert_eq!(owner.state(), if held == 0 { LifecycleState::Deleted } else { LifecycleState::Marked });
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Threads acquire and release while the owner is marked part way through; once quiescent the
    /// invariants hold and exactly one deletion succeeds.
    #[test]
    fn concurrent_runs_settle(threads in 1usize..6, ops in 1usize..200, mark_after in 0usize..200) {
        let drops = Arc::new(AtomicUsize::new(0));
        let owner = RefOwner::new(Tracked { drops: drops.clone() });
        let started = AtomicUsize::new(0);

        thread::scope(|s| {
            for _ in 0..threads {
                s.spawn(|| {
                    let mut held = Vec::new();
                    for i in 0..ops {
                        started.fetch_add(1, SeqCst);
                        if let Some(handle) = owner.try_acquire() {
                            assert!(!owner.is_deleted());
                            held.push(handle);
                        }
                        if i % 3 == 0 {
                            held.clear();
                        }
                    }
                });
            }

            while started.load(SeqCst) < mark_after.min(threads * ops) {
                thread::yield_now();
            }
            owner.mark_for_deletion();
        });

        check_invariants(&owner)?;
        prop_assert_eq!(owner.ref_count(), 0);
        prop_assert!(owner.try_delete());
        prop_assert!(!owner.try_delete());
        prop_assert_eq!(drops.load(SeqCst), 1);
    }
}
