//! Tests for the per-thread activation stack

use crate::cache_request::CacheRequest;
use crate::errors::AutomationError;
use crate::types::{properties, TreeScope};
use std::sync::{Arc, Barrier};
use std::thread;

#[test]
fn current_is_the_default_when_nothing_is_pushed() {
    assert_eq!(CacheRequest::stack_depth(), 0);
    let current = CacheRequest::current();
    assert!(current.is_default());
    assert!(current.is_same(&CacheRequest::default_request()));
}

#[test]
fn fresh_thread_sees_the_default_request() {
    let outer = CacheRequest::new();
    let _guard = outer.activate();

    let result = thread::spawn(|| {
        let current = CacheRequest::current();
        (current.is_default(), current.add_property(properties::NAME))
    })
    .join()
    .expect("thread panicked");

    assert!(result.0, "another thread's pushes must not be visible");
    assert!(matches!(result.1, Err(AutomationError::InStateViolation(_))));
}

#[test]
fn pops_must_nest() {
    let b1 = CacheRequest::new();
    let b2 = CacheRequest::new();
    let before = CacheRequest::current();

    b1.push();
    b2.push();
    assert!(CacheRequest::current().is_same(&b2));

    assert!(matches!(b1.pop(), Err(AutomationError::InStateViolation(_))));
    assert!(CacheRequest::current().is_same(&b2));
    assert_eq!(b1.activation_count(), 1);

    b2.pop().unwrap();
    assert!(CacheRequest::current().is_same(&b1));
    b1.pop().unwrap();
    assert!(CacheRequest::current().is_same(&before));
}

#[test]
fn popping_with_nothing_pushed_fails() {
    let request = CacheRequest::new();
    assert!(matches!(
        request.pop(),
        Err(AutomationError::InStateViolation(_))
    ));
    assert!(matches!(
        CacheRequest::default_request().pop(),
        Err(AutomationError::InStateViolation(_))
    ));
}

#[test]
fn guard_pops_on_drop() {
    let request = CacheRequest::new();
    {
        let _guard = request.activate();
        assert!(CacheRequest::current().is_same(&request));
        assert_eq!(CacheRequest::stack_depth(), 1);
    }
    assert_eq!(CacheRequest::stack_depth(), 0);
    assert!(!request.is_active());
}

#[test]
fn guard_release_reports_nesting_violation() {
    let outer = CacheRequest::new();
    let inner = CacheRequest::new();
    let outer_guard = outer.activate();
    let inner_guard = inner.activate();

    assert!(matches!(
        outer_guard.release(),
        Err(AutomationError::InStateViolation(_))
    ));
    inner_guard.release().unwrap();
    // outer is still pushed; its guard was consumed by the failed release.
    outer.pop().unwrap();
    assert_eq!(CacheRequest::stack_depth(), 0);
}

#[test]
fn same_request_can_be_pushed_repeatedly() {
    let request = CacheRequest::new();
    request.push();
    request.push();
    assert_eq!(request.activation_count(), 2);
    assert_eq!(CacheRequest::stack_depth(), 2);

    request.pop().unwrap();
    assert!(request.is_active());
    request.pop().unwrap();
    assert!(!request.is_active());
}

#[test]
fn default_request_can_be_pushed_and_popped() {
    let default = CacheRequest::default_request();
    let custom = CacheRequest::new();
    let _custom = custom.activate();
    {
        let _default = default.activate();
        assert!(CacheRequest::current().is_default());
    }
    assert!(CacheRequest::current().is_same(&custom));
}

#[test]
fn activation_count_is_shared_across_threads() {
    let request = Arc::new(CacheRequest::new());
    request.add_property(properties::NAME).unwrap();
    let pushed = Arc::new(Barrier::new(3));
    let checked = Arc::new(Barrier::new(3));

    let workers: Vec<_> = (0..2)
        .map(|_| {
            let request = request.clone();
            let pushed = pushed.clone();
            let checked = checked.clone();
            thread::spawn(move || {
                request.push();
                assert!(CacheRequest::current().is_same(&request));
                pushed.wait();
                checked.wait();
                request.pop()
            })
        })
        .collect();

    pushed.wait();
    assert_eq!(request.activation_count(), 2);
    assert!(matches!(
        request.set_tree_scope(TreeScope::CHILDREN),
        Err(AutomationError::InStateViolation(_))
    ));
    // This thread never pushed it.
    assert!(CacheRequest::current().is_default());
    checked.wait();

    for worker in workers {
        worker.join().expect("worker panicked").unwrap();
    }
    assert_eq!(request.activation_count(), 0);
    request.set_tree_scope(TreeScope::CHILDREN).unwrap();
}

#[test]
fn concurrent_freezes_converge_on_one_snapshot() {
    let request = Arc::new(CacheRequest::new());
    request.add_property(properties::NAME).unwrap();
    let start = Arc::new(Barrier::new(4));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let request = request.clone();
            let start = start.clone();
            thread::spawn(move || {
                start.wait();
                request.snapshot()
            })
        })
        .collect();
    let snapshots: Vec<_> = handles
        .into_iter()
        .map(|handle| handle.join().expect("freeze panicked"))
        .collect();

    for snapshot in &snapshots[1..] {
        assert!(Arc::ptr_eq(&snapshots[0], snapshot));
    }
}
