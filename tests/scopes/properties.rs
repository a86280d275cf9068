//! Property Tests
//!
//! Random task plans against a quiet store, and random interference
//! against one scope.

use crate::*;
use proptest::prelude::*;

fn plan() -> impl Strategy<Value = Vec<(usize, i64)>> {
    proptest::collection::vec((0usize..4, -50i64..50), 1..24)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_quiet_store_always_publishes(steps in plan()) {
        let (store, coordinator) = setup();
        let rec = RecordId::new();
        let data: Vec<DatumId> = (0..4).map(|i| DatumId::new(rec, format!("d{i}"))).collect();

        let scope = coordinator.create_root_scope();
        let mut expected = [0i64; 4];
        for (i, (slot, delta)) in steps.iter().enumerate() {
            scope.run_task(&add_task(&format!("s{i}"), &data[*slot], *delta)).unwrap();
            expected[*slot] += delta;
        }

        let result = scope.publish().unwrap();
        prop_assert!(result.succeeded());
        for (datum, want) in data.iter().zip(expected) {
            let got = committed_int(&store, datum);
            if steps.iter().any(|(slot, _)| data[*slot] == *datum) {
                prop_assert_eq!(got, Some(want));
            } else {
                prop_assert_eq!(got, None);
            }
        }
    }

    #[test]
    fn prop_redo_is_exactly_the_touching_tasks(
        steps in plan(),
        changed in proptest::collection::btree_set(0usize..4, 1..4),
    ) {
        let (store, coordinator) = setup();
        let rec = RecordId::new();
        let data: Vec<DatumId> = (0..4).map(|i| DatumId::new(rec, format!("d{i}"))).collect();

        let scope = coordinator.create_root_scope();
        let mut tasks = Vec::new();
        for (i, (slot, delta)) in steps.iter().enumerate() {
            let task = add_task(&format!("s{i}"), &data[*slot], *delta);
            scope.run_task(&task).unwrap();
            tasks.push((task, *slot));
        }
        for slot in &changed {
            commit(&store, &data[*slot], 1_000);
        }

        let touched: Vec<TaskId> = tasks
            .iter()
            .filter(|(_, slot)| changed.contains(slot))
            .map(|(task, _)| task.id())
            .collect();

        let result = scope.publish().unwrap();
        prop_assert_eq!(result.succeeded(), touched.is_empty());
        prop_assert_eq!(result.tasks_to_redo(), touched.as_slice());

        if !touched.is_empty() {
            scope.rerun_conflicted(&result).unwrap();
            prop_assert!(scope.publish().unwrap().succeeded());
        }
    }
}
