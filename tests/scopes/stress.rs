//! Randomized Contention Tests
//!
//! Many threads increment randomly chosen counters through isolated root
//! scopes. With unconditional retry no increment may be lost.

use crate::*;
use rand::seq::SliceRandom;
use rand::Rng;
use std::thread;

const THREADS: usize = 8;
const ROUNDS: usize = 50;
const COUNTERS: usize = 6;

#[test]
fn test_concurrent_increments_are_never_lost() {
    init_tracing();
    let iso = Isolation::builder().retry(RetryPolicy::unconditional()).build();
    let stats = ConflictStats::new();
    let rec = RecordId::new();
    let counters: Vec<DatumId> = (0..COUNTERS).map(|i| DatumId::new(rec, format!("c{i}"))).collect();

    let expected: i64 = thread::scope(|s| {
        let handles: Vec<_> = (0..THREADS)
            .map(|t| {
                let (iso, stats, counters) = (&iso, &stats, &counters);
                s.spawn(move || {
                    let mut rng = rand::thread_rng();
                    let mut increments = 0i64;
                    for round in 0..ROUNDS {
                        let k = rng.gen_range(1..=3);
                        let tasks: Vec<Task> = counters
                            .choose_multiple(&mut rng, k)
                            .map(|c| add_task(&format!("t{t}r{round}{c}"), c, 1))
                            .collect();
                        increments += tasks.len() as i64;
                        iso.isolated_with(iso.retry_policy(), stats, &tasks).unwrap();
                    }
                    increments
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).sum()
    });

    let total: i64 = counters
        .iter()
        .map(|c| iso.read_committed(c).value.and_then(|v| v.as_int()).unwrap_or(0))
        .sum();
    assert_eq!(total, expected);

    let snap = stats.snapshot();
    assert_eq!(snap.successes(), (THREADS * ROUNDS) as u64);
    assert_eq!(iso.metrics().published, (THREADS * ROUNDS) as u64);
}

#[test]
fn test_single_hot_counter_serializes() {
    init_tracing();
    let iso = Isolation::builder().retry(RetryPolicy::unconditional()).build();
    let hot = DatumId::new(RecordId::new(), "hot");

    thread::scope(|s| {
        for t in 0..THREADS {
            let (iso, hot) = (&iso, &hot);
            s.spawn(move || {
                for round in 0..ROUNDS {
                    iso.isolated(&[add_task(&format!("t{t}r{round}"), hot, 1)]).unwrap();
                }
            });
        }
    });

    assert_eq!(
        iso.read_committed(&hot).value,
        Some(Value::Int((THREADS * ROUNDS) as i64))
    );
}

#[test]
fn test_random_sibling_fanout_under_one_parent() {
    let (store, coordinator) = setup();
    let rec = RecordId::new();
    let counters: Vec<DatumId> = (0..COUNTERS).map(|i| DatumId::new(rec, format!("c{i}"))).collect();
    let parent = coordinator.create_root_scope();

    let mut expected = vec![0i64; COUNTERS];
    let mut rng = rand::thread_rng();
    let plan: Vec<Vec<usize>> = (0..THREADS)
        .map(|_| {
            let picks: Vec<usize> = (0..rng.gen_range(1..=COUNTERS))
                .map(|_| rng.gen_range(0..COUNTERS))
                .collect();
            for &p in &picks {
                expected[p] += 1;
            }
            picks
        })
        .collect();

    thread::scope(|s| {
        for (t, picks) in plan.iter().enumerate() {
            let (parent, counters) = (&parent, &counters);
            s.spawn(move || {
                let child = IsolationScope::nested_from(parent).unwrap();
                let tasks: Vec<Task> = picks
                    .iter()
                    .enumerate()
                    .map(|(i, &p)| add_task(&format!("s{t}t{i}"), &counters[p], 1))
                    .collect();
                let outcome =
                    isoscope::orchestrate(&child, &tasks, &RetryPolicy::unconditional(), &NoopObserver).unwrap();
                assert!(outcome.succeeded());
            });
        }
    });

    assert!(parent.publish().unwrap().succeeded());
    for (c, want) in counters.iter().zip(&expected) {
        let got = committed_int(&store, c).unwrap_or(0);
        assert_eq!(got, *want, "counter {c}");
    }
}
