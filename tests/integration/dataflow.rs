//! Cycle ordering, readiness and same-cycle visibility.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use hri::core::{Callable, Task};
use hri::orchestration::{MaxCycles, OrchestratorEvent, StopReason};
use hri::Error;

use crate::fixtures::{counter, drain_events, harness, sense_infer_act, RecordingAgent};

/// Test: sense -> infer -> act in one cycle
/// Given sense returning "obs1" and infer returning "cmd1"
/// When one cycle runs
/// Then infer sees "obs1" and act sees "cmd1" in that same cycle
#[tokio::test]
async fn test_sense_infer_act_same_cycle() {
    let agent = RecordingAgent::new("agent");
    agent.reply("sense", Ok(json!("obs1")));
    agent.reply("infer", Ok(json!("cmd1")));

    let (builder, mut rx) = harness(Arc::clone(&agent));
    let mut orch = builder.tasks(sense_infer_act()).build().unwrap();
    let report = orch.run(MaxCycles(1)).await.unwrap();

    assert_eq!(report.cycles, 1);
    assert_eq!(agent.args_of("infer"), vec![vec![json!("obs1")]]);
    assert_eq!(agent.args_of("act"), vec![vec![json!("cmd1")]]);
    assert_eq!(report.final_state["obs"], json!("obs1"));
    assert_eq!(report.final_state["cmd"], json!("cmd1"));
    assert!(report.is_clean());

    let completed: Vec<String> = drain_events(&mut rx)
        .into_iter()
        .filter_map(|e| match e {
            OrchestratorEvent::TaskCompleted { task, cycle: 1 } => Some(task),
            _ => None,
        })
        .collect();
    assert_eq!(completed, vec!["sense", "infer", "act"]);
}

/// Test: Agents are called in topological order every cycle
#[tokio::test]
async fn test_call_order_repeats_each_cycle() {
    let agent = RecordingAgent::new("agent");
    let (builder, _rx) = harness(Arc::clone(&agent));
    let mut orch = builder.tasks(sense_infer_act()).build().unwrap();
    orch.run(MaxCycles(2)).await.unwrap();

    let order: Vec<String> = agent.calls().into_iter().map(|c| c.capability).collect();
    assert_eq!(order, vec!["sense", "infer", "act", "sense", "infer", "act"]);
}

/// Test: State reads are idempotent
/// Given sense succeeding once, then failing
/// When infer runs in two cycles
/// Then it sees the same stale value both times
#[tokio::test]
async fn test_state_reads_are_not_consumed() {
    let agent = RecordingAgent::new("agent");
    agent.reply("sense", Ok(json!("obs1")));
    agent.reply("sense", Err(Error::agent("agent", "sense", "camera offline")));

    let (builder, _rx) = harness(Arc::clone(&agent));
    let mut orch = builder
        .tasks(sense_infer_act())
        .task(Task::one_shot("audit", "agent", Callable::capability("audit", 1, 0)).inputs(["obs"]))
        .build()
        .unwrap();
    let report = orch.run(MaxCycles(2)).await.unwrap();

    assert_eq!(agent.args_of("infer"), vec![vec![json!("obs1")], vec![json!("obs1")]]);
    // Two readers of one state channel in the same cycle see the same value.
    assert_eq!(agent.args_of("audit"), vec![vec![json!("obs1")], vec![json!("obs1")]]);
    assert_eq!(report.stats("sense").unwrap().failures, 1);
}

/// Test: A task never runs before its inputs exist
/// Given a one-shot consumer of a continuous producer's queue
/// When the first cycle starts before the producer has run
/// Then the consumer is skipped in cycle 1 and later sees the first value
#[tokio::test]
async fn test_first_cycle_skip_is_silent() {
    let agent = RecordingAgent::new("agent");
    let (builder, mut rx) = harness(Arc::clone(&agent));
    let watcher = Arc::clone(&agent);
    let mut orch = builder
        .task(
            Task::continuous("ticker", "agent", counter("tick"))
                .outputs(["tick"])
                .interval(Duration::from_millis(1)),
        )
        .task(Task::one_shot("log", "agent", Callable::capability("log", 1, 0)).inputs(["tick"]))
        .build()
        .unwrap();

    let report = orch
        .run(move |_cycles: u64| watcher.args_of("log").len() >= 3)
        .await
        .unwrap();

    assert_eq!(report.stop_reason, StopReason::Condition);
    assert_eq!(agent.args_of("log")[0], vec![json!(1)]);
    assert_eq!(report.starvations().count(), 0);

    let first_log_event = drain_events(&mut rx).into_iter().find(|e| {
        matches!(
            e,
            OrchestratorEvent::TaskSkipped { task, .. } | OrchestratorEvent::TaskCompleted { task, .. }
                if task == "log"
        )
    });
    assert!(matches!(
        first_log_event,
        Some(OrchestratorEvent::TaskSkipped { cycle: 1, .. })
    ));
}

/// Test: Multi-output tasks split their return value
#[tokio::test]
async fn test_multiple_outputs_are_split() {
    let agent = RecordingAgent::new("agent");
    agent.reply("plan", Ok(json!([{"x": 0.1}, "moving"])));

    let (builder, _rx) = harness(Arc::clone(&agent));
    let mut orch = builder
        .task(Task::one_shot("plan", "agent", Callable::capability("plan", 0, 2)).outputs(["motion", "speech"]))
        .task(Task::one_shot("speak", "agent", Callable::capability("say", 1, 0)).inputs(["speech"]))
        .build()
        .unwrap();
    let report = orch.run(MaxCycles(1)).await.unwrap();

    assert_eq!(report.final_state["motion"], json!({"x": 0.1}));
    assert_eq!(agent.args_of("say"), vec![vec![json!("moving")]]);
}
