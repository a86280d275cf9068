//! End-to-end Sibling Conflict Tests
//!
//! Two sibling scopes race on X under a shared parent.

use crate::*;
use std::sync::mpsc;
use std::thread;

// =============================================================================
// SIBLING RACE
// =============================================================================

#[test]
fn test_sibling_race_resolves_to_25() {
    let (store, coordinator) = setup();
    let x = DatumId::new(RecordId::new(), "x");
    commit(&store, &x, 10);

    let parent = coordinator.create_root_scope();
    let scope_a = IsolationScope::nested_from(&parent).unwrap();
    let scope_b = IsolationScope::nested_from(&parent).unwrap();
    let task_a = add_task("a_add_5", &x, 5);
    let task_b = add_task("b_add_10", &x, 10);

    let (a_ran_tx, a_ran_rx) = mpsc::channel();
    let (b_done_tx, b_done_rx) = mpsc::channel();

    let a = {
        let (scope, task) = (scope_a.clone(), task_a.clone());
        thread::spawn(move || {
            scope.run_task(&task).unwrap();
            assert_eq!(
                scope.tentative_writes().values().next(),
                Some(&Some(Value::Int(15)))
            );
            a_ran_tx.send(()).unwrap();
            b_done_rx.recv().unwrap();

            let first = scope.publish().unwrap();
            assert!(!first.succeeded());
            assert_eq!(first.num_conflicts(), 1);
            assert_eq!(first.tasks_to_redo(), &[task.id()]);

            scope.rerun_conflicted(&first).unwrap();
            let second = scope.publish().unwrap();
            assert!(second.succeeded());
        })
    };

    let b = {
        let (scope, task) = (scope_b.clone(), task_b.clone());
        thread::spawn(move || {
            a_ran_rx.recv().unwrap();
            scope.run_task(&task).unwrap();
            assert!(scope.publish().unwrap().succeeded());
            b_done_tx.send(()).unwrap();
        })
    };

    b.join().unwrap();
    a.join().unwrap();

    assert_eq!(task_a.attempt(), 2);
    assert_eq!(task_b.attempt(), 1);
    assert_eq!(parent.tentative_writes().get(&x), Some(&Some(Value::Int(25))));
    assert_eq!(committed_int(&store, &x), Some(10));

    assert!(parent.publish().unwrap().succeeded());
    assert_eq!(committed_int(&store, &x), Some(25));
}

#[test]
fn test_sibling_race_through_orchestrate() {
    let (store, coordinator) = setup();
    let x = DatumId::new(RecordId::new(), "x");
    commit(&store, &x, 10);

    let parent = coordinator.create_root_scope();
    let scope_a = IsolationScope::nested_from(&parent).unwrap();
    let scope_b = IsolationScope::nested_from(&parent).unwrap();

    // B publishes while A's first run is in flight
    let x_a = x.clone();
    let racer = scope_b.clone();
    let x_b = x.clone();
    let task_a = Task::new("a_add_5", move |ctx| {
        let v = ctx.read_int(&x_a)?.unwrap_or(0);
        if ctx.attempt() == 1 {
            let x_b = x_b.clone();
            let racer = racer.clone();
            thread::spawn(move || {
                racer.run_task(&add_task("b_add_10", &x_b, 10)).unwrap();
                assert!(racer.publish().unwrap().succeeded());
            })
            .join()
            .unwrap();
        }
        ctx.write(&x_a, v + 5)?;
        Ok(())
    });

    let stats = ConflictStats::new();
    let outcome = isoscope::orchestrate(&scope_a, &[task_a], &RetryPolicy::attempts(3), &stats).unwrap();

    assert!(outcome.succeeded());
    assert_eq!(outcome.attempts(), 2);
    let snap = stats.snapshot();
    assert_eq!(snap.after_retry, 1);
    assert_eq!(snap.failed_attempts, 1);

    assert!(parent.publish().unwrap().succeeded());
    assert_eq!(committed_int(&store, &x), Some(25));
}

// =============================================================================
// NESTING DEPTH
// =============================================================================

#[test]
fn test_three_level_chain_publishes_upward() {
    let (store, coordinator) = setup();
    let rec = RecordId::new();
    let (x, y) = (DatumId::new(rec, "x"), DatumId::new(rec, "y"));

    let root = coordinator.create_root_scope();
    let mid = IsolationScope::nested_from(&root).unwrap();
    let leaf = IsolationScope::nested_from(&mid).unwrap();
    assert_eq!(leaf.depth(), 2);

    mid.run_task(&add_task("mid_x", &x, 1)).unwrap();
    leaf.run_task(&add_task("leaf_x", &x, 10)).unwrap();
    leaf.run_task(&add_task("leaf_y", &y, 3)).unwrap();

    assert!(leaf.publish().unwrap().succeeded());
    assert_eq!(mid.tentative_writes().get(&x), Some(&Some(Value::Int(11))));
    assert!(mid.publish().unwrap().succeeded());
    assert!(root.publish().unwrap().succeeded());

    assert_eq!(committed_int(&store, &x), Some(11));
    assert_eq!(committed_int(&store, &y), Some(3));
}

#[test]
fn test_nested_conflict_against_parent_write() {
    let (_store, coordinator) = setup();
    let x = DatumId::new(RecordId::new(), "x");

    let root = coordinator.create_root_scope();
    let child = IsolationScope::nested_from(&root).unwrap();
    child.run_task(&add_task("child", &x, 1)).unwrap();

    // The parent changes X after the child read it
    root.run_task(&add_task("parent", &x, 100)).unwrap();

    let result = child.publish().unwrap();
    assert!(!result.succeeded());
    assert_eq!(result.target(), isoscope::PublishTarget::Scope(root.id()));

    child.rerun_conflicted(&result).unwrap();
    assert!(child.publish().unwrap().succeeded());
    assert_eq!(root.tentative_writes().get(&x), Some(&Some(Value::Int(101))));
}
