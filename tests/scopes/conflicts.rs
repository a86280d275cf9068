//! Conflict Detection Tests
//!
//! Tests for conflict precision, survival of uncontested work and
//! untracked conflicts.

use crate::*;
use std::sync::atomic::{AtomicU32, Ordering};

// =============================================================================
// NO-CONFLICT COMMIT
// =============================================================================

#[test]
fn test_unchanged_reads_always_publish() {
    let (store, coordinator) = setup();
    let rec = RecordId::new();
    let fields: Vec<DatumId> = (0..8).map(|i| DatumId::new(rec, format!("f{i}"))).collect();
    for (i, f) in fields.iter().enumerate() {
        commit(&store, f, i as i64);
    }

    let scope = coordinator.create_root_scope();
    for (i, f) in fields.iter().enumerate() {
        scope.run_task(&add_task(&format!("t{i}"), f, 100)).unwrap();
    }

    // Unrelated data may change freely
    commit(&store, &DatumId::new(RecordId::new(), "elsewhere"), 1);

    let result = scope.publish().unwrap();
    assert!(result.succeeded());
    assert_eq!(result.applied_writes(), fields.len());
    for (i, f) in fields.iter().enumerate() {
        assert_eq!(committed_int(&store, f), Some(i as i64 + 100));
    }
}

// =============================================================================
// CONFLICT PRECISION
// =============================================================================

#[test]
fn test_only_tasks_touching_changed_datum_are_redone() {
    let (store, coordinator) = setup();
    let rec = RecordId::new();
    let (d, e, f) = (
        DatumId::new(rec, "d"),
        DatumId::new(rec, "e"),
        DatumId::new(rec, "f"),
    );

    let scope = coordinator.create_root_scope();
    let reads_d = add_task("reads_d", &d, 1);
    let reads_e = add_task("reads_e", &e, 1);
    let reads_f = add_task("reads_f", &f, 1);
    let d2 = d.clone();
    let e2 = e.clone();
    let reads_d_writes_e = Task::new("d_to_e", move |ctx| {
        let v = ctx.read_int(&d2)?.unwrap_or(0);
        ctx.write(&e2, v * 2)?;
        Ok(())
    });

    for task in [&reads_d, &reads_e, &reads_f, &reads_d_writes_e] {
        scope.run_task(task).unwrap();
    }

    commit(&store, &d, 7);

    let result = scope.publish().unwrap();
    assert!(!result.succeeded());
    assert_eq!(result.conflicts().iter().collect::<Vec<_>>(), vec![&d]);
    assert_eq!(
        result.tasks_to_redo(),
        &[reads_d.id(), reads_d_writes_e.id()]
    );
    assert!(!result.tasks_to_redo().contains(&reads_e.id()));
    assert!(!result.tasks_to_redo().contains(&reads_f.id()));
}

#[test]
fn test_write_only_task_is_redone_on_conflict() {
    let (store, coordinator) = setup();
    let rec = RecordId::new();
    let (d, other) = (DatumId::new(rec, "d"), DatumId::new(rec, "other"));

    let scope = coordinator.create_root_scope();
    let reader = add_task("reader", &d, 1);
    let d2 = d.clone();
    let blind_writer = Task::new("blind", move |ctx| {
        ctx.write(&d2, 0)?;
        Ok(())
    });
    let bystander = add_task("bystander", &other, 1);

    scope.run_task(&reader).unwrap();
    scope.run_task(&blind_writer).unwrap();
    scope.run_task(&bystander).unwrap();
    commit(&store, &d, 50);

    let result = scope.publish().unwrap();
    assert_eq!(result.tasks_to_redo(), &[reader.id(), blind_writer.id()]);
}

// =============================================================================
// SURVIVAL OF UNCONTESTED WORK
// =============================================================================

#[test]
fn test_uncontested_writes_survive_verbatim() {
    let (store, coordinator) = setup();
    let rec = RecordId::new();
    let (hot, cold) = (DatumId::new(rec, "hot"), DatumId::new(rec, "cold"));

    let cold_runs = Arc::new(AtomicU32::new(0));
    let (cold2, runs2) = (cold.clone(), cold_runs.clone());
    let cold_task = Task::new("cold", move |ctx| {
        let n = runs2.fetch_add(1, Ordering::SeqCst) + 1;
        ctx.write(&cold2, n as i64 * 1000)?;
        Ok(())
    });
    let hot_task = add_task("hot", &hot, 1);

    let scope = coordinator.create_root_scope();
    scope.run_task(&cold_task).unwrap();
    scope.run_task(&hot_task).unwrap();
    commit(&store, &hot, 41);

    let result = scope.publish().unwrap();
    assert_eq!(result.tasks_to_redo(), &[hot_task.id()]);
    scope.rerun_conflicted(&result).unwrap();
    assert!(scope.publish().unwrap().succeeded());

    assert_eq!(cold_runs.load(Ordering::SeqCst), 1);
    assert_eq!(committed_int(&store, &cold), Some(1000));
    assert_eq!(committed_int(&store, &hot), Some(42));
}

#[test]
fn test_republish_without_rerun_conflicts_again() {
    let (store, coordinator) = setup();
    let x = DatumId::new(RecordId::new(), "x");
    let scope = coordinator.create_root_scope();
    scope.run_task(&add_task("inc", &x, 1)).unwrap();
    commit(&store, &x, 5);

    assert!(!scope.publish().unwrap().succeeded());
    let again = scope.publish().unwrap();
    assert!(!again.succeeded());
    assert_eq!(committed_int(&store, &x), Some(5));
}

// =============================================================================
// UNTRACKED ACCESS
// =============================================================================

#[test]
fn test_ambient_read_conflict_is_unresolvable() {
    let (store, coordinator) = setup();
    let x = DatumId::new(RecordId::new(), "x");
    let scope = coordinator.create_root_scope();

    let seen = scope.activate(|| isoscope::current::read(&x)).unwrap().unwrap();
    assert_eq!(seen, None);
    commit(&store, &x, 1);

    let result = scope.publish().unwrap();
    assert!(!result.succeeded());
    assert!(result.has_untracked_conflicts());
    assert!(!result.is_resolvable());
    assert!(result.tasks_to_redo().is_empty());
}

#[test]
fn test_child_keeps_parent_snapshot_until_parent_publishes() {
    init_tracing();
    let iso = Isolation::builder().retry(RetryPolicy::unconditional()).build();
    let x = DatumId::new(RecordId::new(), "x");
    let outer = iso.root_scope();

    outer
        .activate(|| isoscope::current::read(&x))
        .unwrap()
        .unwrap();
    let mut batch = WriteSet::new();
    batch.insert(x.clone(), Some(Value::Int(3)));
    iso.store().apply_all(&batch);

    // The child validates against what the outer scope already saw
    let inner = outer
        .activate(|| iso.isolated(&[add_task("inner", &x, 1)]))
        .unwrap()
        .unwrap();
    assert!(inner.succeeded());
    assert_eq!(outer.tentative_writes().get(&x), Some(&Some(Value::Int(1))));

    let outcome = isoscope::orchestrate(&outer, &[], iso.retry_policy(), &NoopObserver).unwrap();
    match outcome {
        isoscope::Outcome::GaveUp { reason, last, .. } => {
            assert_eq!(reason, isoscope::GiveUpReason::Unresolvable);
            assert!(last.has_untracked_conflicts());
        }
        other => panic!("expected give-up, got {other:?}"),
    }
    assert_eq!(iso.read_committed(&x).value, Some(Value::Int(3)));
}
