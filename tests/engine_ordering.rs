//! Scheduling properties checked over generated topologies: dependency
//! ordering, one terminal outcome per step, worker-pool bounds, layer
//! barriers, and the run deadline.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde_json::{json, Value};
use stepline::{
    event_channel, EngineEvent, EventReceiver, RunStatus, StepError, StepFailureKind, StepOutcome,
    WorkflowBuilder, WorkflowDefinition, WorkflowRunner, WorkflowStep,
};

mod common;

const LAYERS: usize = 4;
const WIDTH: usize = 5;

fn seed_input() -> HashMap<String, Value> {
    HashMap::from([("seed".to_string(), json!(0))])
}

fn drain(rx: &mut EventReceiver) -> Vec<EngineEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Generates a layered DAG where every step draws 1..=3 inputs from the
/// previous layer. Returns the definition plus the edge list and the set
/// of steps whose handler was rigged to fail.
fn random_dag(rng_seed: u64, failure_rate: f64) -> (WorkflowDefinition, Vec<(String, String)>, HashSet<String>) {
    let mut rng = StdRng::seed_from_u64(rng_seed);
    let mut builder: WorkflowBuilder = WorkflowDefinition::builder("generated").input("seed");
    let mut edges: Vec<(String, String)> = Vec::new();
    let mut failing: HashSet<String> = HashSet::new();
    let mut previous: Vec<String> = Vec::new();

    for layer in 0..LAYERS {
        let mut current = Vec::new();
        for slot in 0..WIDTH {
            let name = format!("s{}_{}", layer, slot);
            let step_inputs: Vec<String> = if layer == 0 {
                vec!["seed".to_string()]
            } else {
                let picks = rng.gen_range(1..=3.min(previous.len()));
                previous
                    .choose_multiple(&mut rng, picks)
                    .cloned()
                    .collect()
            };
            for input in &step_inputs {
                if input != "seed" {
                    edges.push((input.clone(), name.clone()));
                }
            }

            let fail = failure_rate > 0.0 && rng.gen_bool(failure_rate);
            if fail {
                failing.insert(name.clone());
            }
            builder = builder.step(
                WorkflowStep::transform(name.clone())
                    .inputs(step_inputs)
                    .handler_fn(move |_| async move {
                        if fail {
                            Err(StepError::failure("injected"))
                        } else {
                            Ok(json!(1))
                        }
                    }),
            );
            current.push(name);
        }
        previous = current;
    }

    (builder.build().unwrap(), edges, failing)
}

#[tokio::test]
async fn test_generated_dag_trace_respects_every_edge() {
    common::init_tracing();
    let (definition, edges, _) = random_dag(7, 0.0);

    let (tx, mut rx) = event_channel();
    let runner = WorkflowRunner::new(definition).events(tx);
    let result = runner.run(seed_input()).await.unwrap();
    assert!(result.status.is_completed());

    let events = drain(&mut rx);
    let started: HashMap<&str, usize> = events
        .iter()
        .enumerate()
        .filter_map(|(i, e)| match e {
            EngineEvent::StepStarted { step, .. } => Some((step.as_str(), i)),
            _ => None,
        })
        .collect();
    let finished: HashMap<&str, usize> = events
        .iter()
        .enumerate()
        .filter_map(|(i, e)| match e {
            EngineEvent::StepFinished { step, .. } => Some((step.as_str(), i)),
            _ => None,
        })
        .collect();

    for (ancestor, descendant) in &edges {
        assert!(
            finished[ancestor.as_str()] < started[descendant.as_str()],
            "{} finished at {} but {} started at {}",
            ancestor,
            finished[ancestor.as_str()],
            descendant,
            started[descendant.as_str()]
        );
    }

    // One terminal outcome per step, no more.
    assert_eq!(finished.len(), LAYERS * WIDTH);
    assert_eq!(result.outcomes.len(), LAYERS * WIDTH);
}

#[tokio::test]
async fn test_injected_failures_still_settle_every_step() {
    common::init_tracing();
    let (definition, edges, failing) = random_dag(42, 0.25);
    let step_names: Vec<String> = definition.steps().iter().map(|s| s.name.clone()).collect();

    let mut inputs_of: HashMap<&str, Vec<&str>> = HashMap::new();
    for (ancestor, descendant) in &edges {
        inputs_of
            .entry(descendant.as_str())
            .or_default()
            .push(ancestor.as_str());
    }

    let result = WorkflowRunner::new(definition).run(seed_input()).await.unwrap();

    // Replay the propagation rules over the edge list and compare.
    let mut expected: HashMap<&str, &str> = HashMap::new();
    for name in &step_names {
        let blocked = inputs_of
            .get(name.as_str())
            .map(|ins| ins.iter().any(|i| expected[i] != "completed"))
            .unwrap_or(false);
        let verdict = if blocked {
            "not_run"
        } else if failing.contains(name.as_str()) {
            "failed"
        } else {
            "completed"
        };
        expected.insert(name.as_str(), verdict);
    }

    assert_eq!(result.outcomes.len(), LAYERS * WIDTH);
    for name in &step_names {
        let actual = match result.outcome(name).unwrap() {
            StepOutcome::Completed { .. } => "completed",
            StepOutcome::Failed { .. } => "failed",
            StepOutcome::NotRun => "not_run",
            StepOutcome::Skipped { .. } => "skipped",
        };
        assert_eq!(actual, expected[name.as_str()], "step {}", name);
    }

    let any_ran_and_failed = expected.values().any(|v| *v == "failed");
    assert_eq!(result.status.is_failed(), any_ran_and_failed);
}

#[tokio::test]
async fn test_worker_pool_honors_the_concurrency_cap() {
    common::init_tracing();
    let in_flight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let mut builder = WorkflowDefinition::builder("bounded")
        .input("seed")
        .max_concurrency(2);
    for slot in 0..6 {
        let in_flight = Arc::clone(&in_flight);
        let peak = Arc::clone(&peak);
        builder = builder.step(
            WorkflowStep::transform(format!("job_{}", slot))
                .input("seed")
                .handler_fn(move |_| {
                    let in_flight = Arc::clone(&in_flight);
                    let peak = Arc::clone(&peak);
                    async move {
                        let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        in_flight.fetch_sub(1, Ordering::SeqCst);
                        Ok(json!(null))
                    }
                }),
        );
    }

    let result = WorkflowRunner::new(builder.build().unwrap())
        .run(seed_input())
        .await
        .unwrap();

    assert!(result.status.is_completed());
    assert!(
        peak.load(Ordering::SeqCst) <= 2,
        "observed {} concurrent handlers",
        peak.load(Ordering::SeqCst)
    );
}

#[tokio::test]
async fn test_layers_are_strict_barriers() {
    common::init_tracing();
    let definition = WorkflowDefinition::builder("barrier")
        .input("seed")
        .step(
            WorkflowStep::transform("fast")
                .input("seed")
                .handler_fn(|_| async { Ok(json!("fast")) }),
        )
        .step(
            WorkflowStep::transform("slow")
                .input("seed")
                .handler_fn(|_| async {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok(json!("slow"))
                }),
        )
        .step(
            WorkflowStep::transform("child_of_fast")
                .input("fast")
                .handler_fn(|_| async { Ok(json!("child")) }),
        )
        .build()
        .unwrap();

    let (tx, mut rx) = event_channel();
    let runner = WorkflowRunner::new(definition).events(tx);
    let result = runner.run(seed_input()).await.unwrap();
    assert!(result.status.is_completed());

    let events = drain(&mut rx);
    let slow_finished = events
        .iter()
        .position(|e| matches!(e, EngineEvent::StepFinished { step, .. } if step == "slow"))
        .unwrap();
    let child_started = events
        .iter()
        .position(|e| matches!(e, EngineEvent::StepStarted { step, .. } if step == "child_of_fast"))
        .unwrap();

    // The next layer waits for the whole previous layer, not just its own
    // ancestors.
    assert!(slow_finished < child_started);
}

#[tokio::test]
async fn test_run_deadline_times_out_the_run() {
    common::init_tracing();
    let definition = WorkflowDefinition::builder("deadline")
        .input("seed")
        .run_timeout(Duration::from_millis(100))
        .step(
            WorkflowStep::transform("quick")
                .input("seed")
                .handler_fn(|_| async { Ok(json!("done")) }),
        )
        .step(
            WorkflowStep::transform("stubborn")
                .input("seed")
                .timeout(Duration::from_millis(200))
                .handler_fn(|_| async {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Ok(json!("never"))
                }),
        )
        .step(
            WorkflowStep::transform("after")
                .input("stubborn")
                .handler_fn(|_| async { Ok(json!("never")) }),
        )
        .build()
        .unwrap();

    let started = std::time::Instant::now();
    let result = WorkflowRunner::new(definition)
        .run(seed_input())
        .await
        .unwrap();

    assert!(matches!(result.status, RunStatus::TimedOut));
    assert!(started.elapsed() < Duration::from_secs(5));

    assert!(result.outcome("quick").unwrap().is_completed());
    // A handler that never looks at the signal is not torn down by the
    // engine; it runs on until its own attempt timeout fells it.
    let stubborn = result.outcome("stubborn").unwrap();
    assert!(stubborn.is_failed());
    assert_eq!(stubborn.failure().unwrap().kind, StepFailureKind::Timeout);
    assert!(result.outcome("after").unwrap().is_not_run());
}

#[tokio::test]
async fn test_compliant_handler_observes_cancellation() {
    common::init_tracing();
    let observed = Arc::new(AtomicBool::new(false));
    let observed_in = Arc::clone(&observed);

    let definition = WorkflowDefinition::builder("wind-down")
        .input("seed")
        .run_timeout(Duration::from_millis(100))
        .step(
            WorkflowStep::transform("cooperative")
                .input("seed")
                .handler_fn(move |inputs| {
                    let observed = Arc::clone(&observed_in);
                    async move {
                        let cancel = inputs.cancellation().clone();
                        tokio::select! {
                            _ = cancel.cancelled() => {
                                observed.store(true, Ordering::SeqCst);
                                Err(StepError::Cancelled)
                            }
                            _ = tokio::time::sleep(Duration::from_secs(30)) => Ok(json!("finished")),
                        }
                    }
                }),
        )
        .build()
        .unwrap();

    let started = std::time::Instant::now();
    let result = WorkflowRunner::new(definition)
        .run(seed_input())
        .await
        .unwrap();

    assert!(matches!(result.status, RunStatus::TimedOut));
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(observed.load(Ordering::SeqCst));

    let outcome = result.outcome("cooperative").unwrap();
    assert!(outcome.is_failed());
    let failure = outcome.failure().unwrap();
    assert_eq!(failure.kind, StepFailureKind::Cancelled);
    assert_eq!(failure.attempts, 1);
}

#[tokio::test]
async fn test_deadline_lets_in_flight_work_settle() {
    common::init_tracing();
    let definition = WorkflowDefinition::builder("straggler")
        .input("seed")
        .run_timeout(Duration::from_millis(100))
        .step(
            WorkflowStep::transform("wraps_up")
                .input("seed")
                .handler_fn(|_| async {
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    Ok(json!("made it"))
                }),
        )
        .step(
            WorkflowStep::transform("next_layer")
                .input("wraps_up")
                .handler_fn(|_| async { Ok(json!("never")) }),
        )
        .build()
        .unwrap();

    let result = WorkflowRunner::new(definition)
        .run(seed_input())
        .await
        .unwrap();

    assert!(matches!(result.status, RunStatus::TimedOut));
    // The attempt in flight at the deadline finishes and publishes its
    // value; only steps never dispatched settle as NotRun.
    assert_eq!(result.value("wraps_up"), Some(&json!("made it")));
    assert!(result.outcome("next_layer").unwrap().is_not_run());
}
