//! Task failures, fail_fast and starvation.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use hri::core::{Callable, Task};
use hri::orchestration::{MaxCycles, Never, OrchestratorEvent, StopReason};
use hri::Error;

use crate::fixtures::{constant, drain_events, failing, harness, sense_infer_act, RecordingAgent};

fn failing_infer_graph() -> Vec<Task> {
    vec![
        Task::one_shot("sense", "agent", constant("sense", json!("obs1"))).outputs(["obs"]),
        Task::one_shot("infer", "agent", failing("infer", 1, 1))
            .inputs(["obs"])
            .outputs(["cmd"]),
        Task::one_shot("act", "agent", Callable::capability("act", 1, 0)).inputs(["cmd"]),
    ]
}

/// Test: Failure without fail_fast
/// Given infer failing on every call
/// When three cycles run
/// Then the loop keeps going, cmd stays absent and act never runs
#[tokio::test]
async fn test_failure_is_isolated() {
    let agent = RecordingAgent::new("agent");
    let (builder, _rx) = harness(Arc::clone(&agent));
    let mut orch = builder.tasks(failing_infer_graph()).build().unwrap();

    let report = orch.run(MaxCycles(3)).await.unwrap();

    assert_eq!(report.cycles, 3);
    assert_eq!(report.stop_reason, StopReason::Condition);
    assert!(!report.final_state.contains_key("cmd"));
    assert_eq!(report.final_state["obs"], json!("obs1"));
    assert!(agent.args_of("act").is_empty());

    let cycles: Vec<u64> = report
        .failures()
        .map(|e| match e {
            Error::TaskExecution { task, cycle, inputs, .. } => {
                assert_eq!(task, "infer");
                assert!(inputs.contains("obs1"));
                *cycle
            }
            other => panic!("unexpected error {other}"),
        })
        .collect();
    assert_eq!(cycles, vec![1, 2, 3]);
    assert_eq!(report.stats("act").unwrap().skipped, 3);
}

/// Test: fail_fast on a one-shot failure
/// Given infer failing and fail_fast set
/// When the run starts
/// Then it drains in the first cycle without running act
#[tokio::test]
async fn test_fail_fast_drains_immediately() {
    let agent = RecordingAgent::new("agent");
    let (builder, mut rx) = harness(Arc::clone(&agent));
    let mut orch = builder
        .tasks(failing_infer_graph())
        .fail_fast(true)
        .build()
        .unwrap();

    let report = orch.run(Never).await.unwrap();

    assert_eq!(report.cycles, 1);
    assert_eq!(
        report.stop_reason,
        StopReason::TaskFailed {
            task: "infer".to_string()
        }
    );
    assert!(report.stop_reason.is_fatal());
    assert_eq!(report.stats("act").unwrap().skipped, 0);
    assert!(agent.calls().is_empty());

    let failed = drain_events(&mut rx)
        .into_iter()
        .any(|e| matches!(e, OrchestratorEvent::TaskFailed { ref task, cycle: 1, .. } if task == "infer"));
    assert!(failed);
}

/// Test: fail_fast on a continuous worker failure
/// Given a continuous listener that always fails
/// When run with no stop condition
/// Then the run drains with WorkerFailed
#[tokio::test]
async fn test_worker_failure_with_fail_fast() {
    let agent = RecordingAgent::new("agent");
    let (builder, _rx) = harness(Arc::clone(&agent));
    let mut orch = builder
        .task(Task::continuous("listen", "agent", failing("listen", 0, 1)).outputs(["heard"]))
        .task(Task::one_shot("plan", "agent", Callable::capability("plan", 1, 0)).inputs(["heard"]))
        .fail_fast(true)
        .build()
        .unwrap();

    let report = orch.run(Never).await.unwrap();

    assert_eq!(
        report.stop_reason,
        StopReason::WorkerFailed {
            task: "listen".to_string()
        }
    );
    assert!(report.stats("listen").unwrap().failures >= 1);
    assert!(report.leaked.is_empty());
}

/// Test: Worker failures without fail_fast are reported, not fatal
#[tokio::test]
async fn test_worker_failure_without_fail_fast() {
    let agent = RecordingAgent::new("agent");
    let (builder, _rx) = harness(Arc::clone(&agent));
    let mut orch = builder
        .task(
            Task::continuous("listen", "agent", failing("listen", 0, 1))
                .outputs(["heard"])
                .interval(Duration::from_millis(2)),
        )
        .task(Task::one_shot("plan", "agent", Callable::capability("plan", 1, 0)).inputs(["heard"]))
        .cycle_interval(Duration::from_millis(10))
        .build()
        .unwrap();

    let report = orch.run(MaxCycles(5)).await.unwrap();

    assert_eq!(report.stop_reason, StopReason::Condition);
    assert!(report.stats("listen").unwrap().failures >= 1);
    assert_eq!(report.stats("plan").unwrap().runs, 0);
}

/// Test: Panics are caught at the task boundary
#[tokio::test]
async fn test_panic_is_task_failure() {
    let agent = RecordingAgent::new("agent");
    let (builder, _rx) = harness(Arc::clone(&agent));
    let mut orch = builder
        .task(Task::one_shot(
            "grip",
            "agent",
            Callable::new("grip", 0, 0, |_, _| async {
                if true {
                    panic!("gripper jammed");
                }
                Ok(serde_json::Value::Null)
            }),
        ))
        .build()
        .unwrap();

    let report = orch.run(MaxCycles(2)).await.unwrap();

    assert_eq!(report.stats("grip").unwrap().failures, 2);
    let message = report.failures().next().unwrap().to_string();
    assert!(message.contains("gripper jammed"));
}

/// Test: Starvation is reported per cycle
/// Given sense always failing, so obs is never written
/// When infer's readiness deadline has passed
/// Then each further skipped cycle reports TaskStarved naming the missing channel
#[tokio::test]
async fn test_starvation_reported() {
    let agent = RecordingAgent::new("agent");
    for _ in 0..10 {
        agent.reply("sense", Err(Error::agent("agent", "sense", "camera offline")));
    }
    let (builder, mut rx) = harness(Arc::clone(&agent));
    let mut tasks = sense_infer_act();
    tasks[1] = tasks[1].clone().readiness_timeout(Duration::from_millis(1));
    let mut orch = builder
        .tasks(tasks)
        .cycle_interval(Duration::from_millis(5))
        .build()
        .unwrap();

    let report = orch.run(MaxCycles(4)).await.unwrap();

    let infer = report.stats("infer").unwrap();
    assert_eq!(infer.skipped, 4);
    assert!(infer.starved >= 3);
    assert_eq!(report.starvations().count() as u64, infer.starved);
    assert_eq!(report.stop_reason, StopReason::Condition);

    let starved = report.starvations().next().unwrap();
    assert!(matches!(starved, Error::TaskStarved { task, missing, .. }
        if task == "infer" && missing == &vec!["obs".to_string()]));

    let events = drain_events(&mut rx);
    assert!(events
        .iter()
        .any(|e| matches!(e, OrchestratorEvent::TaskStarved { task, .. } if task == "infer")));
}

/// Test: Starvation limit
/// Given a starvation limit of 2
/// When infer starves for a third consecutive cycle
/// Then the run drains with StopReason::Starved
#[tokio::test]
async fn test_starvation_limit_is_fatal() {
    let agent = RecordingAgent::new("agent");
    for _ in 0..10 {
        agent.reply("sense", Err(Error::agent("agent", "sense", "camera offline")));
    }
    let (builder, _rx) = harness(Arc::clone(&agent));
    let mut tasks = sense_infer_act();
    tasks[1] = tasks[1].clone().readiness_timeout(Duration::from_millis(1));
    let mut orch = builder
        .tasks(tasks)
        .cycle_interval(Duration::from_millis(5))
        .starvation_limit(2)
        .build()
        .unwrap();

    let report = orch.run(Never).await.unwrap();

    assert_eq!(
        report.stop_reason,
        StopReason::Starved {
            task: "infer".to_string()
        }
    );
    assert_eq!(report.stats("infer").unwrap().starved, 3);
    assert!((3..=4).contains(&report.cycles));
}
