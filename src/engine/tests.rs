//! Engine Scenario Tests
//!
//! End-to-end coverage of the facade: pipelines over every pattern kind,
//! divide-and-conquer at several token budgets, translation-time rejection,
//! and the resource invariants (token pool and store drained back to their
//! starting levels after every balanced run).

use crate::config::Configuration;
use crate::engine::TaskEngine;
use crate::engine::sequential::SequentialExecution;
use crate::error::EngineError;
use crate::patterns::{self, Stage};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

fn engine(workers: usize, tokens: usize) -> TaskEngine {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .try_init();
    TaskEngine::new(Configuration::new(workers, tokens))
}

fn range_generator(range: std::ops::Range<i64>) -> impl FnMut() -> Option<i64> + Send {
    let mut next = range.start;
    let end = range.end;
    move || {
        if next < end {
            let value = next;
            next += 1;
            Some(value)
        } else {
            None
        }
    }
}

fn collector() -> (Arc<Mutex<Vec<i64>>>, Stage) {
    let sink = Arc::new(Mutex::new(Vec::new()));
    let writer = sink.clone();
    let stage = patterns::stage(move |value: i64| {
        writer.lock().unwrap().push(value);
    });
    (sink, stage)
}

fn sorted(values: &Arc<Mutex<Vec<i64>>>) -> Vec<i64> {
    let mut values = values.lock().unwrap().clone();
    values.sort_unstable();
    values
}

// ============================================================
// TEST 1: Identity pipeline
// ============================================================

#[test]
fn test_identity_pipeline_delivers_every_item() {
    let engine = engine(4, 8);
    let (seen, consumer) = collector();

    engine
        .pipeline(
            range_generator(1..4),
            [patterns::stage(|x: i64| x), consumer],
        )
        .expect("pipeline failed");

    assert_eq!(sorted(&seen), vec![1, 2, 3]);
    assert_eq!(engine.scheduler().available_tokens(), 8);
    assert_eq!(engine.scheduler().live_slots(), 0);
}

#[test]
fn test_empty_generator_finishes_clean() {
    let engine = engine(2, 8);
    let (seen, consumer) = collector();

    engine
        .pipeline(range_generator(0..0), [consumer])
        .expect("pipeline failed");

    assert!(seen.lock().unwrap().is_empty());
    assert_eq!(engine.scheduler().available_tokens(), 8);
    assert_eq!(engine.scheduler().live_slots(), 0);
}

// ============================================================
// TEST 2: Farmed double + filter
// ============================================================

#[test]
fn test_farm_and_filter_drop_items_cleanly() {
    let engine = engine(4, 16);
    let (seen, consumer) = collector();

    engine
        .pipeline(
            range_generator(0..10),
            [
                patterns::farm(|x: i64| x * 2),
                patterns::filter(|x: &i64| x % 4 == 0),
                consumer,
            ],
        )
        .expect("pipeline failed");

    assert_eq!(sorted(&seen), vec![0, 4, 8, 12, 16]);
    // Dropped items hand their chain tokens back.
    assert_eq!(engine.scheduler().available_tokens(), 16);
    assert_eq!(engine.scheduler().live_slots(), 0);
}

#[test]
fn test_single_worker_preserves_stream_order() {
    let engine = engine(1, 32);
    let (seen, consumer) = collector();

    engine
        .pipeline(
            range_generator(0..10),
            [
                patterns::farm(|x: i64| x * 2),
                patterns::filter(|x: &i64| x % 4 == 0),
                consumer,
            ],
        )
        .expect("pipeline failed");

    // With one worker every stage drains in stream order.
    assert_eq!(*seen.lock().unwrap(), vec![0, 4, 8, 12, 16]);
}

// ============================================================
// TEST 3: Reduce
// ============================================================

#[test]
fn test_reduce_sums_a_full_window() {
    let engine = engine(4, 256);
    let (seen, consumer) = collector();
    let emissions = Arc::new(AtomicUsize::new(0));

    let counted = emissions.clone();
    engine
        .pipeline(
            range_generator(1..101),
            [
                patterns::reduce(100, 100, 0i64, |a, b| a + b),
                patterns::stage(move |x: i64| {
                    counted.fetch_add(1, Ordering::SeqCst);
                    x
                }),
                consumer,
            ],
        )
        .expect("pipeline failed");

    assert_eq!(sorted(&seen), vec![5050]);
    assert_eq!(emissions.load(Ordering::SeqCst), 1);
    assert_eq!(engine.scheduler().available_tokens(), 256);
    assert_eq!(engine.scheduler().live_slots(), 0);
}

#[test]
fn test_reduce_emits_once_per_window() {
    let engine = engine(4, 64);
    let (seen, consumer) = collector();

    engine
        .pipeline(
            range_generator(1..10),
            [patterns::reduce(3, 3, 0i64, |a, b| a + b), consumer],
        )
        .expect("pipeline failed");

    // Windows: 1+2+3, 4+5+6, 7+8+9.
    assert_eq!(sorted(&seen), vec![6, 15, 24]);
}

// ============================================================
// TEST 4: Iteration
// ============================================================

#[test]
fn test_iteration_runs_to_convergence() {
    let engine = engine(4, 8);
    let (seen, consumer) = collector();
    let applications = Arc::new(AtomicUsize::new(0));

    let counted = applications.clone();
    let mut item = Some(100i64);
    engine
        .pipeline(
            move || item.take(),
            [
                patterns::iterate(
                    move |x: i64| {
                        counted.fetch_add(1, Ordering::SeqCst);
                        x / 2
                    },
                    |x: &i64| *x > 0,
                ),
                consumer,
            ],
        )
        .expect("pipeline failed");

    assert_eq!(*seen.lock().unwrap(), vec![0]);
    // 100 -> 50 -> 25 -> 12 -> 6 -> 3 -> 1 -> 0: seven submissions of the
    // iteration stage before the value reaches the consumer.
    assert_eq!(applications.load(Ordering::SeqCst), 7);
    assert_eq!(engine.scheduler().available_tokens(), 8);
    assert_eq!(engine.scheduler().live_slots(), 0);
}

// ============================================================
// TEST 5: Nested pipelines
// ============================================================

#[test]
fn test_nested_pipeline_splices_into_the_chain() {
    let engine = engine(4, 16);
    let (seen, consumer) = collector();

    engine
        .pipeline(
            range_generator(0..5),
            [
                patterns::pipeline([
                    patterns::stage(|x: i64| x + 1),
                    patterns::stage(|x: i64| x * 2),
                ]),
                consumer,
            ],
        )
        .expect("pipeline failed");

    assert_eq!(sorted(&seen), vec![2, 4, 6, 8, 10]);
}

// ============================================================
// TEST 6: Translation-time rejection
// ============================================================

#[test]
fn test_iteration_over_pipeline_is_rejected_up_front() {
    let engine = engine(2, 8);
    let (seen, consumer) = collector();

    let nested = patterns::iterate_over(
        patterns::pipeline([patterns::stage(|x: i64| x + 1)]),
        |x: &i64| *x > 0,
    );
    let result = engine.pipeline(range_generator(0..3), [nested, consumer]);
    assert!(matches!(result, Err(EngineError::UnsupportedPattern(_))));
    assert!(seen.lock().unwrap().is_empty());

    // The rejected chain registered nothing: the engine still runs.
    let (again, consumer) = collector();
    engine
        .pipeline(range_generator(0..3), [consumer])
        .expect("pipeline failed");
    assert_eq!(sorted(&again), vec![0, 1, 2]);
}

#[test]
fn test_pipeline_must_end_in_a_consumer() {
    let engine = engine(2, 8);
    let result = engine.pipeline(
        range_generator(0..3),
        [patterns::filter(|x: &i64| *x > 0)],
    );
    assert!(matches!(result, Err(EngineError::UnsupportedPattern(_))));
}

#[test]
fn test_empty_chain_is_rejected() {
    let engine = engine(2, 8);
    let result = engine.pipeline(range_generator(0..3), std::iter::empty());
    assert!(matches!(result, Err(EngineError::UnsupportedPattern(_))));
}

// ============================================================
// TEST 7: User callable failure
// ============================================================

#[test]
fn test_panicking_consumer_aborts_the_run() {
    let engine = engine(2, 8);

    let result = engine.pipeline(
        range_generator(0..3),
        [patterns::stage(|x: i64| {
            if x == 1 {
                panic!("cannot handle {x}");
            }
        })],
    );
    match result {
        Err(EngineError::StageFailure(message)) => assert!(message.contains("cannot handle")),
        other => panic!("expected a stage failure, got {other:?}"),
    }
}

// ============================================================
// TEST 8: Divide-and-conquer
// ============================================================

fn summing_divide_conquer(engine: &TaskEngine) -> i64 {
    let input: Vec<i64> = (1..=1024).collect();
    engine
        .divide_conquer(
            input,
            |v: &Vec<i64>| {
                let mid = v.len() / 2;
                vec![v[..mid].to_vec(), v[mid..].to_vec()]
            },
            |v: &Vec<i64>| v.len() <= 1,
            |v: &Vec<i64>| v.first().copied().unwrap_or(0),
            |a, b| a + b,
        )
        .expect("divide_conquer failed")
}

#[test]
fn test_divide_conquer_sum_fully_parallel() {
    let engine = engine(4, 4096);
    assert_eq!(summing_divide_conquer(&engine), 524_800);
    assert_eq!(engine.scheduler().available_tokens(), 4096);
    assert_eq!(engine.scheduler().live_slots(), 0);
}

#[test]
fn test_divide_conquer_sum_with_tiny_token_pool() {
    let engine = engine(4, 4);
    assert_eq!(summing_divide_conquer(&engine), 524_800);
    assert_eq!(engine.scheduler().available_tokens(), 4);
    assert_eq!(engine.scheduler().live_slots(), 0);
}

#[test]
fn test_divide_conquer_sum_with_no_tokens_at_all() {
    // The first divide step finds no budget and solves the whole problem
    // with the sequential policy.
    let engine = engine(2, 0);
    assert_eq!(summing_divide_conquer(&engine), 524_800);
    assert_eq!(engine.scheduler().available_tokens(), 0);
    assert_eq!(engine.scheduler().live_slots(), 0);
}

#[test]
fn test_divide_conquer_matches_the_sequential_policy() {
    let engine = engine(4, 64);
    let parallel = summing_divide_conquer(&engine);

    let sequential = SequentialExecution
        .divide_conquer(
            (1..=1024).collect::<Vec<i64>>(),
            &|v: &Vec<i64>| {
                let mid = v.len() / 2;
                vec![v[..mid].to_vec(), v[mid..].to_vec()]
            },
            &|v: &Vec<i64>| v.len() <= 1,
            &|v: &Vec<i64>| v.first().copied().unwrap_or(0),
            &|a, b| a + b,
        )
        .expect("sequential divide_conquer failed");

    assert_eq!(parallel, sequential);
}

#[test]
fn test_malformed_divide_is_reported() {
    let engine = engine(2, 64);
    let result = engine.divide_conquer(
        vec![1i64, 2],
        |v: &Vec<i64>| vec![v.clone()],
        |v: &Vec<i64>| v.len() <= 1,
        |v: &Vec<i64>| v.first().copied().unwrap_or(0),
        |a: i64, b: i64| a + b,
    );
    assert!(matches!(result, Err(EngineError::MalformedDivide(1))));
}

#[test]
fn test_base_case_input_skips_division() {
    let engine = engine(2, 8);
    let result = engine
        .divide_conquer(
            vec![7i64],
            |_: &Vec<i64>| panic!("divide must not run on a base case"),
            |v: &Vec<i64>| v.len() <= 1,
            |v: &Vec<i64>| v.first().copied().unwrap_or(0),
            |a, b| a + b,
        )
        .expect("divide_conquer failed");
    assert_eq!(result, 7);
}

// ============================================================
// TEST 9: Ordering flag
// ============================================================

#[test]
fn test_ordering_flag_round_trip() {
    let mut engine = engine(1, 4);
    assert!(!engine.is_ordered());
    engine.enable_ordering();
    assert!(engine.is_ordered());
    engine.disable_ordering();
    assert!(!engine.is_ordered());
}

// ============================================================
// TEST 10: Sequential policy details
// ============================================================

#[test]
fn test_sequential_policy_respects_predicate_priority() {
    // The predicate accepts everything, so divide must never be consulted.
    let result = SequentialExecution
        .divide_conquer(
            10i64,
            &|_: &i64| panic!("divide must not run"),
            &|_: &i64| true,
            &|x: &i64| *x,
            &|a, b| a + b,
        )
        .expect("divide_conquer failed");
    assert_eq!(result, 10);
}

#[test]
fn test_sequential_policy_rejects_short_division() {
    let result = SequentialExecution.divide_conquer(
        4i64,
        &|_: &i64| Vec::new(),
        &|x: &i64| *x <= 1,
        &|x: &i64| *x,
        &|a, b| a + b,
    );
    assert!(matches!(result, Err(EngineError::MalformedDivide(0))));
}
