//! Simulated agents for running the perceive-think-act loop without hardware.
//!
//! [`hri_tasks`] declares the classic four-task graph:
//!
//! ```text
//! capture_image ─ observation ─┐
//!                              ├─> language_task ─ motion ─> robot_task
//! audio_task ─── instruction ──┘
//! ```

mod console;
mod planner;
mod robot;

use std::sync::Arc;

pub use console::ConsoleAgent;
pub use planner::KeywordPlanner;
pub use robot::{HandControl, SimRobot};

use crate::agent::AgentRegistry;
use crate::core::task::{Callable, Task};

/// How the instruction source and the arm are scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenMode {
    /// Once per cycle, like the other tasks. The arm only moves on a motion
    /// it has not executed yet.
    PerCycle,
    /// Listener and arm on their own workers. Instructions and motions are
    /// queued, so each motion is executed once.
    Continuous,
}

/// Agents keyed the way [`hri_tasks`] refers to them.
pub fn hri_agents(console: Arc<ConsoleAgent>, robot: Arc<SimRobot>) -> AgentRegistry {
    let mut agents = AgentRegistry::new();
    agents.insert("audio_agent", console);
    agents.insert(
        "language_agent",
        Arc::new(KeywordPlanner::new("language_agent")),
    );
    agents.insert("robot", robot);
    agents
}

pub fn hri_tasks(listen: ListenMode) -> Vec<Task> {
    let listen_callable = Callable::capability("listen", 0, 1);
    let do_callable = Callable::capability("do", 1, 0);
    let (audio_task, robot_task) = match listen {
        ListenMode::PerCycle => (
            Task::one_shot("audio_task", "audio_agent", listen_callable),
            Task::one_shot("robot_task", "robot", do_callable).only_fresh(),
        ),
        ListenMode::Continuous => (
            Task::continuous("audio_task", "audio_agent", listen_callable),
            Task::continuous("robot_task", "robot", do_callable),
        ),
    };

    vec![
        Task::one_shot("capture_image", "robot", Callable::capability("capture", 0, 1))
            .outputs(["observation"]),
        audio_task.outputs(["instruction"]),
        Task::one_shot(
            "language_task",
            "language_agent",
            Callable::capability("act_and_parse", 2, 1),
        )
        .inputs(["instruction", "observation"])
        .outputs(["motion"]),
        robot_task.inputs(["motion"]),
    ]
}
