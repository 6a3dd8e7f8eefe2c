//! Stop requests, draining and leaked workers.

use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use serde_json::json;

use hri::core::{Callable, Task};
use hri::orchestration::{MaxCycles, Never, OrchestratorEvent, Phase, StopHandle, StopReason};
use hri::Error;

use crate::fixtures::{counter, drain_events, harness, sleeping, RecordingAgent};

/// Test: Stop requested mid-cycle
/// Given a slow first task that requests a stop while it runs
/// When the stop arrives
/// Then the slow task completes, the later task never starts,
///   and the producer worker exits cleanly
#[tokio::test]
async fn test_stop_mid_cycle_finishes_current_task() {
    let agent = RecordingAgent::new("agent");
    let (builder, mut rx) = harness(Arc::clone(&agent));

    let handle: Arc<OnceLock<StopHandle>> = Arc::new(OnceLock::new());
    let slot = Arc::clone(&handle);
    let slow = Callable::new("slow", 0, 1, move |_, _| {
        let slot = Arc::clone(&slot);
        async move {
            if let Some(stop) = slot.get() {
                stop.stop();
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(json!("done"))
        }
    });

    let mut orch = builder
        .task(
            Task::continuous("ticker", "agent", counter("tick"))
                .outputs(["tick"])
                .interval(Duration::from_millis(5)),
        )
        .task(Task::one_shot("slow", "agent", slow).outputs(["result"]))
        .task(Task::one_shot("after", "agent", Callable::capability("after", 1, 0)).inputs(["result"]))
        .task(Task::one_shot("log", "agent", Callable::capability("log", 1, 0)).inputs(["tick"]))
        .build()
        .unwrap();
    let _ = handle.set(orch.stop_handle());

    let report = orch.run(Never).await.unwrap();

    assert_eq!(report.stop_reason, StopReason::Requested);
    assert_eq!(report.cycles, 1);
    assert_eq!(report.final_state["result"], json!("done"));
    assert!(agent.args_of("after").is_empty());
    assert_eq!(report.stats("slow").unwrap().runs, 1);
    assert!(report.leaked.is_empty());
    assert_eq!(orch.phase(), Phase::Stopped);

    let events = drain_events(&mut rx);
    assert!(events
        .iter()
        .any(|e| matches!(e, OrchestratorEvent::WorkerExited { task } if task == "ticker")));
}

/// Test: Worker that ignores cancellation
/// Given a continuous task stuck in a long call
/// When the orchestration drains with a 50ms shutdown timeout
/// Then run returns promptly, naming the worker as leaked
#[tokio::test]
async fn test_stuck_worker_is_reported_and_detached() {
    let agent = RecordingAgent::new("agent");
    let (builder, mut rx) = harness(Arc::clone(&agent));
    let mut orch = builder
        .task(Task::continuous("camera", "agent", sleeping("camera", Duration::from_secs(30))).outputs(["frame"]))
        .task(Task::one_shot("detect", "agent", Callable::capability("detect", 1, 0)).inputs(["frame"]))
        .shutdown_timeout(Duration::from_millis(50))
        .build()
        .unwrap();

    let started = Instant::now();
    let report = orch.run(MaxCycles(2)).await.unwrap();

    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(report.leaked, vec!["camera".to_string()]);
    assert!(!report.is_clean());

    let timeouts: Vec<&Error> = report.shutdown_timeouts().collect();
    assert_eq!(timeouts.len(), 1);
    assert!(matches!(timeouts[0], Error::ShutdownTimeout { task, timeout }
        if task == "camera" && *timeout == Duration::from_millis(50)));

    let events = drain_events(&mut rx);
    assert!(events
        .iter()
        .any(|e| matches!(e, OrchestratorEvent::WorkerLeaked { task } if task == "camera")));
    assert!(!events
        .iter()
        .any(|e| matches!(e, OrchestratorEvent::WorkerExited { task } if task == "camera")));
}

/// Test: Stop from another tokio task
/// Given a run with no stop condition
/// When a separate task calls stop() after a few milliseconds
/// Then the run drains with StopReason::Requested
#[tokio::test]
async fn test_external_stop_request() {
    let agent = RecordingAgent::new("agent");
    let (builder, _rx) = harness(Arc::clone(&agent));
    let mut orch = builder
        .task(Task::one_shot("sense", "agent", counter("sense")).outputs(["obs"]))
        .cycle_interval(Duration::from_millis(1))
        .build()
        .unwrap();

    let stop = orch.stop_handle();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        stop.stop();
    });

    let report = orch.run(Never).await.unwrap();

    assert_eq!(report.stop_reason, StopReason::Requested);
    assert!(!report.stop_reason.is_fatal());
    assert!(report.cycles >= 1);
    assert_eq!(report.stats("sense").unwrap().runs, report.cycles);
}

/// Test: Stop interrupts the pause between cycles
/// Given a ten second cycle interval
/// When stop is requested during the pause
/// Then the run ends without waiting out the interval
#[tokio::test]
async fn test_stop_interrupts_cycle_interval() {
    let agent = RecordingAgent::new("agent");
    let (builder, _rx) = harness(Arc::clone(&agent));
    let mut orch = builder
        .task(Task::one_shot("sense", "agent", counter("sense")).outputs(["obs"]))
        .cycle_interval(Duration::from_secs(10))
        .build()
        .unwrap();

    let stop = orch.stop_handle();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        stop.stop();
    });

    let started = Instant::now();
    let report = orch.run(Never).await.unwrap();

    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(report.cycles, 1);
    assert_eq!(report.stop_reason, StopReason::Requested);
}

/// Test: A stop before run drains without running a cycle
#[tokio::test]
async fn test_stop_before_run() {
    let agent = RecordingAgent::new("agent");
    let (builder, _rx) = harness(Arc::clone(&agent));
    let mut orch = builder
        .task(Task::one_shot("sense", "agent", Callable::capability("sense", 0, 1)).outputs(["obs"]))
        .build()
        .unwrap();

    orch.stop_handle().stop();
    let report = orch.run(Never).await.unwrap();

    assert_eq!(report.cycles, 0);
    assert_eq!(report.stop_reason, StopReason::Requested);
    assert!(agent.calls().is_empty());
}
