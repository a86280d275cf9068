//! Scope Lifecycle Tests
//!
//! Tests for discard, terminal states, activation across threads and
//! retry policy termination through the loop.

use crate::*;
use std::sync::Barrier;
use std::thread;
use std::time::{Duration, Instant};

// =============================================================================
// DISCARD
// =============================================================================

#[test]
fn test_discard_twice_and_after_publish() {
    let (store, coordinator) = setup();
    let x = DatumId::new(RecordId::new(), "x");

    let dropped = coordinator.create_root_scope();
    dropped.run_task(&add_task("lost", &x, 1)).unwrap();
    dropped.discard().unwrap();
    dropped.discard().unwrap();
    assert_eq!(dropped.state(), ScopeState::Discarded);
    assert_eq!(committed_int(&store, &x), None);

    let kept = coordinator.create_root_scope();
    kept.run_task(&add_task("kept", &x, 1)).unwrap();
    assert!(kept.publish().unwrap().succeeded());
    kept.discard().unwrap();
    assert_eq!(kept.state(), ScopeState::Published);
    assert_eq!(committed_int(&store, &x), Some(1));
}

#[test]
fn test_discard_conflicted_scope() {
    let (store, coordinator) = setup();
    let x = DatumId::new(RecordId::new(), "x");
    let scope = coordinator.create_root_scope();
    scope.run_task(&add_task("inc", &x, 1)).unwrap();
    commit(&store, &x, 9);

    let result = scope.publish().unwrap();
    assert_eq!(scope.state(), ScopeState::Conflicted);
    scope.discard().unwrap();

    let err = isoscope::Error::from(scope.rerun_conflicted(&result).unwrap_err());
    assert!(matches!(
        err,
        isoscope::Error::ScopeClosed {
            state: ScopeState::Discarded,
            ..
        }
    ));
    assert_eq!(committed_int(&store, &x), Some(9));
}

#[test]
fn test_children_listing_skips_closed() {
    let (_store, coordinator) = setup();
    let root = coordinator.create_root_scope();
    let a = IsolationScope::nested_from(&root).unwrap();
    let b = IsolationScope::nested_from(&root).unwrap();
    assert_eq!(root.children().len(), 2);

    a.discard().unwrap();
    assert_eq!(root.children(), vec![b.clone()]);
    drop(b);
    assert!(root.children().is_empty());
}

// =============================================================================
// ACTIVATION
// =============================================================================

#[test]
fn test_scopes_are_thread_local() {
    let (_store, coordinator) = setup();
    let scope = coordinator.create_root_scope();

    scope
        .activate(|| {
            let seen_elsewhere = thread::spawn(|| IsolationScope::current().is_none())
                .join()
                .unwrap();
            assert!(seen_elsewhere);
            assert!(IsolationScope::current().is_some());
        })
        .unwrap();
}

#[test]
fn test_second_thread_cannot_activate_active_scope() {
    let (_store, coordinator) = setup();
    let scope = coordinator.create_root_scope();
    let barrier = Arc::new(Barrier::new(2));
    let release = Arc::new(Barrier::new(2));

    let holder = {
        let (scope, barrier, release) = (scope.clone(), barrier.clone(), release.clone());
        thread::spawn(move || {
            scope
                .activate(|| {
                    barrier.wait();
                    release.wait();
                })
                .unwrap();
        })
    };

    barrier.wait();
    let task = add_task("blocked", &DatumId::new(RecordId::new(), "x"), 1);
    let err = scope.run_task(&task).unwrap_err();
    assert!(matches!(
        isoscope::Error::from(err),
        isoscope::Error::ConcurrentActivation { .. }
    ));
    release.wait();
    holder.join().unwrap();

    // Handoff is fine once the other thread is done
    scope.run_task(&task).unwrap();
}

// =============================================================================
// RETRY TERMINATION THROUGH THE LOOP
// =============================================================================

fn always_raced(store: &Arc<VersionedStore>, datum: &DatumId) -> Task {
    let (store, datum) = (Arc::clone(store), datum.clone());
    Task::new("raced", move |ctx| {
        let v = ctx.read_int(&datum)?.unwrap_or(0);
        commit(&store, &datum, v + 1000);
        ctx.write(&datum, v + 1)?;
        Ok(())
    })
}

#[test]
fn test_count_policy_makes_exactly_n_attempts() {
    let (store, coordinator) = setup();
    let x = DatumId::new(RecordId::new(), "x");
    let scope = coordinator.create_root_scope();
    let task = always_raced(&store, &x);

    let outcome = isoscope::orchestrate(&scope, &[task.clone()], &RetryPolicy::attempts(3), &NoopObserver).unwrap();
    assert!(!outcome.succeeded());
    assert_eq!(outcome.attempts(), 3);
    assert_eq!(task.attempt(), 3);
}

#[test]
fn test_deadline_policy_stops_after_deadline() {
    let (store, coordinator) = setup();
    let x = DatumId::new(RecordId::new(), "x");
    let scope = coordinator.create_root_scope();
    let store2 = Arc::clone(&store);
    let x2 = x.clone();
    let slow = Task::new("slow_raced", move |ctx| {
        let v = ctx.read_int(&x2)?.unwrap_or(0);
        thread::sleep(Duration::from_millis(5));
        commit(&store2, &x2, v + 1000);
        ctx.write(&x2, v + 1)?;
        Ok(())
    });

    let started = Instant::now();
    let policy = RetryPolicy::until(started + Duration::from_millis(40));
    let outcome = isoscope::orchestrate(&scope, &[slow], &policy, &NoopObserver).unwrap();

    assert!(!outcome.succeeded());
    assert!(started.elapsed() >= Duration::from_millis(40));
    assert!(outcome.attempts() >= 2);
}
