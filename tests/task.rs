use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use taskweave::{Engine, Relation, State, Task, count_tasks};

const TASK_VALUE: &str = "value";
const TASK_ERROR_MESSAGE: &str = "error";

fn engine() -> Engine {
    Engine::builder()
        .workers(4)
        .build()
        .expect("engine should start")
}

fn success_task() -> Task<String> {
    Task::value("success", TASK_VALUE.to_string())
}

fn failure_task() -> Task<String> {
    Task::failure("failure", TASK_ERROR_MESSAGE)
}

#[test]
fn map() {
    let engine = engine();
    let task = success_task().map(|s| s.len());

    let r = engine.run_and_wait("map", &task, Some(Duration::from_secs(5)));
    assert!(task.is_done(), "Task should be done after run_and_wait");
    assert_eq!(r.unwrap(), TASK_VALUE.len());
    assert_eq!(task.get().unwrap(), TASK_VALUE.len());
    assert_eq!(count_tasks(&task.trace()), 2, "map adds one node over the source");
}

#[test]
fn map_failure_propagates_without_invoking_f() {
    let engine = engine();
    let mapped = Arc::new(AtomicBool::new(false));
    let mapped_cl = Arc::clone(&mapped);
    let task = failure_task().map(move |s| {
        mapped_cl.store(true, Ordering::Relaxed);
        s.len()
    });

    let r = engine.run_and_wait("no_recover", &task, Some(Duration::from_secs(5)));
    let err = r.expect_err("should have failed");
    assert_eq!(
        err.cause().unwrap().to_string(),
        TASK_ERROR_MESSAGE,
        "The original failure should be the cause"
    );
    assert!(!mapped.load(Ordering::Relaxed), "f should never run on failure");
    assert!(task.is_failed());
    assert_eq!(count_tasks(&task.trace()), 2);
}

#[test]
fn flat_map() {
    let engine = engine();
    let task =
        success_task().and_then(|s| Task::callable("strlenstr", move || s.len().to_string()));

    let r = engine.run_and_wait("flat_map", &task, Some(Duration::from_secs(5)));
    assert_eq!(r.unwrap(), TASK_VALUE.len().to_string());
    assert_eq!(
        count_tasks(&task.trace()),
        3,
        "flatMap adds its own node plus the delegated task"
    );
}

#[test]
fn inspect_consumer_sees_the_value() {
    let engine = engine();
    let seen = Arc::new(Mutex::new(None));
    let seen_cl = Arc::clone(&seen);
    let task = success_task().inspect(move |s| {
        *seen_cl.lock().unwrap() = Some(s.clone());
    });

    let r = engine.run_and_wait("inspect", &task, Some(Duration::from_secs(5)));
    assert_eq!(r.unwrap(), TASK_VALUE);
    assert_eq!(seen.lock().unwrap().as_deref(), Some(TASK_VALUE));
    assert_eq!(count_tasks(&task.trace()), 2);
}

#[test]
fn and_yields_the_second_tasks_value() {
    let engine = engine();
    let task = success_task().and(Task::callable("life", || 42));

    let r = engine.run_and_wait("and", &task, Some(Duration::from_secs(5)));
    assert_eq!(r.unwrap(), 42);
    assert_eq!(count_tasks(&task.trace()), 3);
}

#[test]
fn and_skips_the_second_task_on_failure() {
    let engine = engine();
    let next = Task::callable("life", || 42);
    let task = failure_task().and(next.clone());

    let r = engine.run_and_wait("and_failure", &task, Some(Duration::from_secs(5)));
    let err = r.expect_err("should have failed");
    assert_eq!(err.cause().unwrap().to_string(), TASK_ERROR_MESSAGE);
    assert_eq!(next.state(), State::Pending, "untaken branch must never start");
    assert_eq!(
        count_tasks(&task.trace()),
        3,
        "the untaken branch still appears as a potential child"
    );
}

#[test]
fn recover_success_passes_through() {
    let engine = engine();
    let task = success_task().map(|s| s.len() as i64).recover(|_| -1);

    let r = engine.run_and_wait("recover_success", &task, Some(Duration::from_secs(5)));
    assert_eq!(r.unwrap(), TASK_VALUE.len() as i64);
    assert_eq!(count_tasks(&task.trace()), 3);
}

#[test]
fn recover_failure_substitutes() {
    let engine = engine();
    let task = failure_task().map(|s| s.len() as i64).recover(|_| -1);

    let r = engine.run_and_wait("recover_failure", &task, Some(Duration::from_secs(5)));
    assert_eq!(r.unwrap(), -1);
    assert_eq!(count_tasks(&task.trace()), 3);
}

#[test]
fn recover_with_success_skips_recovery() {
    let engine = engine();
    let task = success_task()
        .recover_with(|_| Task::failure("recover failure", "recover failed!"));

    let r = engine.run_and_wait("recover_with_success", &task, Some(Duration::from_secs(5)));
    assert_eq!(r.unwrap(), TASK_VALUE);
    assert_eq!(count_tasks(&task.trace()), 2, "recovery task is never created");
}

#[test]
fn recover_with_failing_recovery_is_final() {
    let engine = engine();
    let task = failure_task()
        .recover_with(|_| Task::failure("recover failure", "recover failed!"));

    let r = engine.run_and_wait("recover_with_failure", &task, Some(Duration::from_secs(5)));
    let err = r.expect_err("should have failed");
    assert_eq!(
        err.cause().unwrap().to_string(),
        "recover failed!",
        "The recovery failure replaces the original error"
    );
    assert_eq!(count_tasks(&task.trace()), 3);
}

#[test]
fn recover_with_recovered() {
    let engine = engine();
    let task = failure_task()
        .recover_with(|_| Task::callable("recover success", || "recovered".to_string()));

    let r = engine.run_and_wait("recover_with_recovered", &task, Some(Duration::from_secs(5)));
    assert_eq!(r.unwrap(), "recovered");
    assert_eq!(count_tasks(&task.trace()), 3);
}

#[test]
fn with_attempt_success() {
    let engine = engine();
    let task = success_task().map(|s| s.len()).with_attempt();

    let r = engine.run_and_wait("attempt_success", &task, Some(Duration::from_secs(5)));
    let attempt = r.unwrap();
    assert!(!attempt.is_failed());
    assert_eq!(attempt.get(), Some(&TASK_VALUE.len()));
    assert_eq!(count_tasks(&task.trace()), 3);
}

#[test]
fn with_attempt_failure() {
    let engine = engine();
    let task = failure_task().map(|s| s.len()).with_attempt();

    let r = engine.run_and_wait("attempt_failure", &task, Some(Duration::from_secs(5)));
    let attempt = r.unwrap();
    assert!(attempt.is_failed(), "The attempt should capture the failure");
    assert_eq!(attempt.error().unwrap().to_string(), TASK_ERROR_MESSAGE);
    assert_eq!(count_tasks(&task.trace()), 3);
}

#[test]
fn inspect_err_observes_without_altering() {
    let engine = engine();
    let observed = Arc::new(Mutex::new(None));

    let observed_cl = Arc::clone(&observed);
    let success = success_task().inspect_err(move |e| {
        *observed_cl.lock().unwrap() = Some(e.to_string());
    });
    let r = engine.run_and_wait("on_failure_success", &success, Some(Duration::from_secs(5)));
    assert_eq!(r.unwrap(), TASK_VALUE);
    assert!(observed.lock().unwrap().is_none(), "no error to observe on success");
    assert_eq!(count_tasks(&success.trace()), 2);

    let observed_cl = Arc::clone(&observed);
    let failure = failure_task().inspect_err(move |e| {
        *observed_cl.lock().unwrap() = Some(e.to_string());
    });
    let r = engine.run_and_wait("on_failure_failure", &failure, Some(Duration::from_secs(5)));
    assert!(r.is_err(), "should have failed");
    assert!(failure.is_failed());
    assert_eq!(
        observed.lock().unwrap().as_deref(),
        Some(TASK_ERROR_MESSAGE),
        "consumer should see the original error"
    );
    assert_eq!(count_tasks(&failure.trace()), 2);
}

#[test]
fn with_timeout_source_wins() {
    let engine = engine();
    let task = success_task()
        .and(Task::delayed_value("delayed", 0, Duration::from_millis(30)))
        .with_timeout(Duration::from_millis(500));

    let r = engine.run_and_wait("timeout_success", &task, Some(Duration::from_secs(5)));
    assert_eq!(r.unwrap(), 0);
    assert_eq!(
        count_tasks(&task.trace()),
        5,
        "one timeout adds a timer node and a race node"
    );
}

#[test]
fn with_timeout_twice_source_wins() {
    let engine = engine();
    let task = success_task()
        .and(Task::delayed_value("delayed", 0, Duration::from_millis(30)))
        .with_timeout(Duration::from_millis(500))
        .with_timeout(Duration::from_millis(5000));

    let r = engine.run_and_wait("timeout_twice_success", &task, Some(Duration::from_secs(5)));
    assert_eq!(r.unwrap(), 0);
    assert_eq!(count_tasks(&task.trace()), 7, "each application adds two nodes");
}

#[test]
fn with_timeout_timer_wins() {
    let engine = engine();
    let source = success_task().and(Task::delayed_value(
        "delayed",
        0,
        Duration::from_millis(300),
    ));
    let task = source.with_timeout(Duration::from_millis(50));

    let r = engine.run_and_wait("timeout_failure", &task, Some(Duration::from_secs(5)));
    let err = r.expect_err("should have timed out");
    assert!(
        err.cause().unwrap().is_timeout(),
        "cause should be the timeout sentinel"
    );
    assert_eq!(count_tasks(&task.trace()), 5);
}

#[test]
fn with_timeout_twice_timer_wins() {
    let engine = engine();
    let task = success_task()
        .and(Task::delayed_value(
            "delayed",
            0,
            Duration::from_millis(300),
        ))
        .with_timeout(Duration::from_millis(5000))
        .with_timeout(Duration::from_millis(50));

    let r = engine.run_and_wait("timeout_twice_failure", &task, Some(Duration::from_secs(5)));
    let err = r.expect_err("should have timed out");
    assert!(err.cause().unwrap().is_timeout());
    assert_eq!(count_tasks(&task.trace()), 7);
}

#[test]
fn timed_out_source_keeps_running() {
    let engine = engine();
    let source = Task::delayed_value("slow", 7, Duration::from_millis(150));
    let task = source.with_timeout(Duration::from_millis(30));

    let r = engine.run_and_wait("timeout_discards", &task, Some(Duration::from_secs(5)));
    assert!(r.expect_err("should have timed out").cause().unwrap().is_timeout());

    // The losing branch is not cancelled by the race; it completes on its own.
    assert!(source.wait(Some(Duration::from_secs(5))), "source should still finish");
    assert_eq!(source.get().unwrap(), 7);
    assert!(
        task.error().unwrap().is_timeout(),
        "the race result must not adopt the late value"
    );
}

#[test]
fn race_trace_promotes_only_the_winner() {
    let engine = engine();
    let task = Task::delayed_value("slow", 7, Duration::from_millis(300))
        .with_timeout(Duration::from_millis(30));

    let r = engine.run_and_wait("race_edges", &task, Some(Duration::from_secs(5)));
    assert!(r.expect_err("should time out").cause().unwrap().is_timeout());

    let trace = task.trace();
    let edges = trace.root().edges();
    let timer = edges
        .iter()
        .find(|(_, n)| n.name() == "timeout")
        .expect("race node links the timer branch");
    let source = edges
        .iter()
        .find(|(_, n)| n.name() == "slow")
        .expect("race node links the source branch");
    assert_eq!(timer.0, Relation::ParentOf, "the winning branch is promoted");
    assert_eq!(
        source.0,
        Relation::PotentialParentOf,
        "the losing branch stays potential"
    );
}

#[test]
fn side_effect_does_not_block_completion() {
    let engine = engine();
    let fast_main = success_task();
    let slow_side_effect = Task::delayed_value(
        "slooow",
        "slooow".to_string(),
        Duration::from_millis(5100),
    );
    let side_cl = slow_side_effect.clone();
    let partial = fast_main.with_side_effect(move |_| side_cl.clone());

    let r = engine.run_and_wait("side_effect_partial", &partial, Some(Duration::from_secs(5)));
    assert_eq!(r.unwrap(), TASK_VALUE);
    assert!(fast_main.is_done());
    assert!(partial.is_done());
    assert!(
        !slow_side_effect.is_done(),
        "the composition must not wait for the side effect"
    );
}

#[test]
fn side_effect_runs_to_completion() {
    let engine = engine();
    let fast_main = success_task();
    let side = Task::delayed_value("slow", "slow".to_string(), Duration::from_millis(50));
    let side_cl = side.clone();
    let full = fast_main.with_side_effect(move |_| side_cl.clone());

    let r = engine.run_and_wait("side_effect_full", &full, Some(Duration::from_secs(5)));
    assert_eq!(r.unwrap(), TASK_VALUE);
    assert!(side.wait(Some(Duration::from_secs(5))), "side effect still completes");
    assert!(side.is_done());
    assert_eq!(
        count_tasks(&full.trace()),
        3,
        "the side-effect subtree is attached once submitted"
    );
}

#[test]
fn side_effect_never_starts_on_failure() {
    let engine = engine();
    let side = success_task();
    let side_cl = side.clone();
    let task = failure_task().with_side_effect(move |_| side_cl.clone());

    let r = engine.run_and_wait("side_effect_failure", &task, Some(Duration::from_secs(5)));
    assert!(r.is_err(), "should have failed");
    assert!(task.is_failed());
    assert!(!side.wait(Some(Duration::from_millis(50))));
    assert!(!side.is_done(), "side effect must not run when the source fails");
    assert_eq!(count_tasks(&task.trace()), 2, "no side-effect subtree was created");
}

#[test]
fn cancel_pending_composition() {
    let engine = engine();
    let cancel_main = Task::delayed_value(
        "canceled",
        "canceled".to_string(),
        Duration::from_millis(6000),
    );
    let fast_side_effect = success_task();
    let side_cl = fast_side_effect.clone();
    let composed = cancel_main.with_side_effect(move |_| side_cl.clone());

    // Delay the composition so it can be cancelled before the engine runs it.
    let delayed_start =
        Task::delayed_value("gate", 0, Duration::from_millis(50)).and(composed.clone());
    engine.run(&delayed_start);

    assert!(
        cancel_main.cancel("canceled"),
        "cancel should win while the task is pending"
    );
    assert!(composed.wait(Some(Duration::from_secs(5))));
    assert!(composed.is_done());
    assert_eq!(composed.state(), State::Cancelled, "cancellation propagates");
    assert!(!fast_side_effect.wait(Some(Duration::from_millis(10))));
    assert!(!fast_side_effect.is_done(), "side effect never starts");
}

#[test]
fn cancel_running_task_fails_and_outcome_is_natural() {
    let engine = engine();
    let task = Task::delayed_value("slow", 5, Duration::from_millis(100));
    engine.run(&task);

    // Let the engine start the task before attempting cancellation.
    while task.state() == State::Pending {
        std::thread::sleep(Duration::from_millis(1));
    }
    assert!(!task.cancel("too late"), "a running task cannot be cancelled");

    let r = engine.run_and_wait("natural", &task, Some(Duration::from_secs(5)));
    assert_eq!(r.unwrap(), 5, "the natural outcome is unchanged");
    assert_eq!(task.state(), State::Done);
}

#[test]
fn panicking_computation_resolves_failed() {
    let engine = Engine::builder()
        .workers(1)
        .build()
        .expect("engine should start");
    let task: Task<String> = Task::callable("boom", || panic!("kaboom"));

    let r = engine.run_and_wait("boom", &task, Some(Duration::from_secs(5)));
    let err = r.expect_err("should have failed");
    assert!(task.is_failed(), "a panicking computation must resolve Failed");
    assert_eq!(
        err.cause().unwrap().to_string(),
        "kaboom",
        "the panic message should be the cause"
    );

    // The unwind must not take the worker down with it; the same
    // single-worker engine keeps running tasks afterwards.
    let healthy = Task::callable("healthy", || 1);
    let r = engine.run_and_wait("healthy", &healthy, Some(Duration::from_secs(5)));
    assert_eq!(r.unwrap(), 1, "the engine should survive a panicking task");
}

#[test]
fn panicking_consumer_fails_the_composition() {
    let engine = engine();
    let task = success_task().inspect(|_| panic!("consumer failed"));

    let r = engine.run_and_wait("inspect_panic", &task, Some(Duration::from_secs(5)));
    let err = r.expect_err("should have failed");
    assert!(task.is_failed());
    assert_eq!(
        err.cause().unwrap().to_string(),
        "consumer failed",
        "a consumer panic becomes this task's failure"
    );
}

#[test]
fn repeated_submission_is_a_no_op() {
    let engine = engine();
    let runs = Arc::new(Mutex::new(0));
    let runs_cl = Arc::clone(&runs);
    let task = Task::callable("once", move || {
        *runs_cl.lock().unwrap() += 1;
        "ran".to_string()
    });

    engine.run(&task);
    engine.run(&task);
    let r = engine.run_and_wait("once", &task, Some(Duration::from_secs(5)));
    assert_eq!(r.unwrap(), "ran");
    assert_eq!(*runs.lock().unwrap(), 1, "the computation runs exactly once");
}
