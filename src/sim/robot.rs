//! Simulated arm with a camera.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::agent::{unknown_capability, Agent};
use crate::channel::Value;
use crate::error::{Error, Result};
use crate::{hlog_debug, util};

/// End-effector command: position and orientation deltas plus gripper state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct HandControl {
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    #[serde(default)]
    pub z: f64,
    #[serde(default)]
    pub roll: f64,
    #[serde(default)]
    pub pitch: f64,
    #[serde(default)]
    pub yaw: f64,
    /// 0.0 open, 1.0 closed.
    #[serde(default)]
    pub grasp: f64,
}

impl HandControl {
    /// Largest absolute translation or rotation component.
    pub fn magnitude(&self) -> f64 {
        [self.x, self.y, self.z, self.roll, self.pitch, self.yaw]
            .iter()
            .fold(0.0_f64, |m, v| m.max(v.abs()))
    }
}

#[derive(Debug, Default)]
struct ArmState {
    pose: HandControl,
    frames: u64,
    moves: u64,
}

/// A robot that "captures" synthetic frames and integrates motion commands.
///
/// Capabilities:
/// - `capture()` -> `{"frame", "image", "pose"}`
/// - `do(motion)` -> new pose; rejects moves larger than `max_step`
pub struct SimRobot {
    name: String,
    state: Mutex<ArmState>,
    max_step: f64,
    settle: Duration,
}

impl SimRobot {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: Mutex::new(ArmState::default()),
            max_step: 0.3,
            settle: Duration::ZERO,
        }
    }

    /// Simulated actuation time for each `do`.
    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    pub fn pose(&self) -> HandControl {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).pose
    }

    pub fn moves(&self) -> u64 {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).moves
    }

    fn capture(&self) -> Value {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.frames += 1;
        json!({
            "frame": state.frames,
            "image": format!("frame-{:04}.png", state.frames),
            "pose": state.pose,
        })
    }

    async fn act(&self, args: Vec<Value>) -> Result<Value> {
        let raw = args
            .into_iter()
            .next()
            .ok_or_else(|| Error::agent(&self.name, "do", "missing motion argument"))?;
        let motion: HandControl = serde_json::from_value(raw)
            .map_err(|e| Error::agent(&self.name, "do", format!("bad motion: {}", e)))?;
        if motion.magnitude() > self.max_step {
            return Err(Error::agent(
                &self.name,
                "do",
                format!("step {:.3} exceeds limit {}", motion.magnitude(), self.max_step),
            ));
        }

        if !self.settle.is_zero() {
            let settle = self.settle;
            util::blocking(move || {
                std::thread::sleep(settle);
                Ok(())
            })
            .await?;
        }

        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.pose.x += motion.x;
        state.pose.y += motion.y;
        state.pose.z += motion.z;
        state.pose.roll += motion.roll;
        state.pose.pitch += motion.pitch;
        state.pose.yaw += motion.yaw;
        state.pose.grasp = motion.grasp;
        state.moves += 1;
        hlog_debug!("{}: moved to {:?}", self.name, state.pose);
        Ok(json!(state.pose))
    }
}

#[async_trait]
impl Agent for SimRobot {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> Vec<&'static str> {
        vec!["capture", "do"]
    }

    async fn invoke(&self, capability: &str, args: Vec<Value>) -> Result<Value> {
        match capability {
            "capture" => Ok(self.capture()),
            "do" => self.act(args).await,
            other => Err(unknown_capability(self, other)),
        }
    }
}
