//! The simulated robot loop, driven the way the binary drives it.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use hri::channel::Overflow;
use hri::config::Config;
use hri::orchestration::{Never, OrchestrationBuilder, StopReason};
use hri::sim::{hri_agents, hri_tasks, ConsoleAgent, ListenMode, SimRobot};

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}

/// Test: Scripted session
/// Given three spoken instructions
/// When the loop runs until the script is exhausted
/// Then every instruction moves the arm once, in order
#[tokio::test]
async fn test_scripted_session_moves_arm() {
    let console = Arc::new(ConsoleAgent::from_script(
        "audio_agent",
        "move left 5 cm;grab;raise 10 cm",
    ));
    let robot = Arc::new(SimRobot::new("robot"));
    let exhausted = Arc::clone(&console);

    let mut orch = OrchestrationBuilder::new()
        .agents(hri_agents(console, Arc::clone(&robot)))
        .tasks(hri_tasks(ListenMode::PerCycle))
        .build()
        .unwrap();

    let report = orch
        .run(move |_cycles: u64| exhausted.is_exhausted())
        .await
        .unwrap();

    assert_eq!(report.cycles, 3);
    assert_eq!(report.stop_reason, StopReason::Condition);
    assert!(report.is_clean());
    assert_eq!(robot.moves(), 3);

    let pose = robot.pose();
    assert!(close(pose.y, 0.05));
    assert!(close(pose.z, 0.1));
    assert_eq!(report.final_state["instruction"], "raise 10 cm");
    assert_eq!(report.final_state["observation"]["frame"], 3);
    assert_eq!(report.stats("robot_task").unwrap().runs, 3);
}

/// Test: Unparseable instruction
/// Given an instruction the planner does not understand
/// When that cycle runs
/// Then language_task fails, the loop continues, and the robot does not
///   execute the previous motion a second time
#[tokio::test]
async fn test_bad_instruction_is_isolated() {
    let console = Arc::new(ConsoleAgent::from_script("audio_agent", "move left 5 cm;sing"));
    let robot = Arc::new(SimRobot::new("robot"));
    let exhausted = Arc::clone(&console);

    let mut orch = OrchestrationBuilder::new()
        .agents(hri_agents(console, Arc::clone(&robot)))
        .tasks(hri_tasks(ListenMode::PerCycle))
        .build()
        .unwrap();

    let report = orch
        .run(move |_cycles: u64| exhausted.is_exhausted())
        .await
        .unwrap();

    assert_eq!(report.cycles, 2);
    assert_eq!(report.stats("language_task").unwrap().failures, 1);
    let message = report.failures().next().unwrap().to_string();
    assert!(message.contains("no motion"));
    assert!(message.contains("sing"));

    assert_eq!(robot.moves(), 1);
    assert!(close(robot.pose().y, 0.05));
    let arm = report.stats("robot_task").unwrap();
    assert_eq!(arm.runs, 1);
    assert_eq!(arm.skipped, 1);
    assert_eq!(arm.starved, 0);
}

/// Test: Continuous listener
/// Given instructions arriving on a line channel
/// When audio_task runs on its own worker
/// Then each queued instruction moves the arm exactly once
#[tokio::test]
async fn test_continuous_listener_drives_arm() {
    let (tx, rx) = crossbeam_channel::unbounded();
    tx.send("move left 5 cm".to_string()).unwrap();
    tx.send("raise 5 cm".to_string()).unwrap();

    let shutdown = CancellationToken::new();
    let console = Arc::new(ConsoleAgent::from_receiver("audio_agent", rx).with_shutdown(shutdown.clone()));
    let robot = Arc::new(SimRobot::new("robot"));
    let watcher = Arc::clone(&robot);

    let mut orch = OrchestrationBuilder::new()
        .agents(hri_agents(console, Arc::clone(&robot)))
        .tasks(hri_tasks(ListenMode::Continuous))
        .cycle_interval(Duration::from_millis(5))
        .shutdown_timeout(Duration::from_millis(500))
        .cancel_on_drain(shutdown)
        .build()
        .unwrap();

    let report = orch
        .run(move |_cycles: u64| watcher.moves() >= 2)
        .await
        .unwrap();

    assert_eq!(report.stop_reason, StopReason::Condition);
    assert_eq!(report.stats("language_task").unwrap().runs, 2);
    // Each motion is popped once, so nothing is repeated.
    assert_eq!(robot.moves(), 2);
    let pose = robot.pose();
    assert!(close(pose.y, 0.05));
    assert!(close(pose.z, 0.05));
    assert!(report.leaked.is_empty());
    assert_eq!(report.shutdown_timeouts().count(), 0);
    drop(tx);
}

/// Test: Idle listener at shutdown
/// Given a continuous listener whose input stays open but silent
/// When a stop is requested shortly after the run starts
/// Then the listener gives up its read, both workers exit, and nothing is
///   reported as leaked or failed
#[tokio::test]
async fn test_idle_listener_exits_on_stop() {
    let (tx, rx) = crossbeam_channel::unbounded::<String>();
    let shutdown = CancellationToken::new();
    let console = Arc::new(ConsoleAgent::from_receiver("audio_agent", rx).with_shutdown(shutdown.clone()));
    let robot = Arc::new(SimRobot::new("robot"));

    let mut orch = OrchestrationBuilder::new()
        .agents(hri_agents(console, Arc::clone(&robot)))
        .tasks(hri_tasks(ListenMode::Continuous))
        .cycle_interval(Duration::from_millis(5))
        .shutdown_timeout(Duration::from_millis(1000))
        .cancel_on_drain(shutdown)
        .build()
        .unwrap();

    let stop = orch.stop_handle();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        stop.stop();
    });

    let started = Instant::now();
    let report = orch.run(Never).await.unwrap();

    assert_eq!(report.stop_reason, StopReason::Requested);
    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(report.leaked.is_empty());
    assert!(report.is_clean());
    assert_eq!(robot.moves(), 0);
    drop(tx);
}

/// Test: Settings from a config file
/// Given a TOML file with fail_fast, max_cycles and a channel override
/// When it is loaded and handed to the builder
/// Then the orchestration uses those settings
#[tokio::test]
async fn test_config_file_is_applied() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("hri.toml");
    std::fs::write(
        &path,
        r#"
            fail_fast = true
            max_cycles = 2
            shutdown_timeout_ms = 50

            [channels.instruction]
            capacity = 4
            overflow = "unbounded"
        "#,
    )
    .unwrap();
    let config = Config::load_from(&path).unwrap();

    // Queue settings only apply once the listener is continuous.
    let continuous = OrchestrationBuilder::new()
        .agents(hri_agents(
            Arc::new(ConsoleAgent::from_script("audio_agent", "left")),
            Arc::new(SimRobot::new("robot")),
        ))
        .tasks(hri_tasks(ListenMode::Continuous))
        .config(config.clone())
        .build()
        .unwrap();
    assert!(continuous.config().fail_fast);
    let queues = continuous.queues();
    let instruction = queues.config("instruction").unwrap();
    assert_eq!(instruction.capacity, 4);
    assert_eq!(instruction.overflow, Overflow::Unbounded);

    let console = Arc::new(ConsoleAgent::from_script("audio_agent", "left;right;up;down"));
    let robot = Arc::new(SimRobot::new("robot"));
    let mut orch = OrchestrationBuilder::new()
        .agents(hri_agents(console, Arc::clone(&robot)))
        .tasks(hri_tasks(ListenMode::PerCycle))
        .config(config)
        .build()
        .unwrap();
    assert!(orch.queues().config("instruction").is_none());

    let report = orch.run(Never).await.unwrap();
    assert_eq!(report.cycles, 2);
    assert_eq!(report.stop_reason, StopReason::MaxCycles { cycles: 2 });
    assert_eq!(robot.moves(), 2);
    assert!(close(robot.pose().y, 0.0));
}

/// Test: Saving then loading a config keeps its settings
#[test]
fn test_config_save_and_reload() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("hri.toml");

    let mut config = Config::default();
    config.max_cycles = Some(7);
    config.starvation_limit = Some(2);
    config.save_to(&path).unwrap();

    let loaded = Config::load_from(&path).unwrap();
    assert_eq!(loaded.max_cycles, Some(7));
    assert_eq!(loaded.starvation_limit, Some(2));
    assert!(!loaded.fail_fast);
}
