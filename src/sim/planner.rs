//! Keyword planner standing in for a language model.
//!
//! Turns a short instruction such as "move left 5 cm and grab" into a
//! [`HandControl`]. Every component is clamped to the step limit.

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use serde_json::json;

use crate::agent::{unknown_capability, Agent};
use crate::channel::Value;
use crate::error::{Error, Result};
use crate::sim::robot::HandControl;

/// A distance like "5cm", "0.1 m" or "12 mm".
static DISTANCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(\d+(?:\.\d+)?)\s*(mm|cm|m)\b").unwrap()
});

/// Default step when the instruction has no distance, in metres.
const DEFAULT_STEP: f64 = 0.05;

const DIRECTIONS: &[(&str, Axis, f64)] = &[
    ("forward", Axis::X, 1.0),
    ("ahead", Axis::X, 1.0),
    ("back", Axis::X, -1.0),
    ("left", Axis::Y, 1.0),
    ("right", Axis::Y, -1.0),
    ("up", Axis::Z, 1.0),
    ("raise", Axis::Z, 1.0),
    ("down", Axis::Z, -1.0),
    ("lower", Axis::Z, -1.0),
];

const GRASP_WORDS: &[&str] = &["grab", "grasp", "pick", "close"];
const RELEASE_WORDS: &[&str] = &["release", "drop", "open", "let go"];

#[derive(Debug, Clone, Copy)]
enum Axis {
    X,
    Y,
    Z,
}

/// Capabilities:
/// - `act_and_parse(instruction, observation)` -> `HandControl` JSON
/// - `act(instruction)` -> short text reply
pub struct KeywordPlanner {
    name: String,
    context: String,
    max_step: f64,
}

impl KeywordPlanner {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            context: "you are a robot. Your movement should always be smaller than 0.3".to_string(),
            max_step: 0.3,
        }
    }

    pub fn with_max_step(mut self, max_step: f64) -> Self {
        self.max_step = max_step;
        self
    }

    pub fn context(&self) -> &str {
        &self.context
    }

    /// Parse one instruction into a motion.
    pub fn plan(&self, instruction: &str) -> Result<HandControl> {
        let text = instruction.to_lowercase();
        let step = DISTANCE_RE
            .captures(&text)
            .and_then(|c| {
                let amount: f64 = c[1].parse().ok()?;
                let scale = match &c[2] {
                    "mm" => 0.001,
                    "cm" => 0.01,
                    _ => 1.0,
                };
                Some(amount * scale)
            })
            .unwrap_or(DEFAULT_STEP)
            .min(self.max_step);

        let mut motion = HandControl::default();
        let mut understood = false;
        for word in text.split(|c: char| !c.is_alphanumeric()) {
            if let Some((_, axis, sign)) = DIRECTIONS.iter().find(|(w, _, _)| *w == word) {
                let delta = sign * step;
                match axis {
                    Axis::X => motion.x = delta,
                    Axis::Y => motion.y = delta,
                    Axis::Z => motion.z = delta,
                }
                understood = true;
            }
        }
        if GRASP_WORDS.iter().any(|w| text.contains(w)) {
            motion.grasp = 1.0;
            understood = true;
        } else if RELEASE_WORDS.iter().any(|w| text.contains(w)) {
            motion.grasp = 0.0;
            understood = true;
        }

        if !understood {
            return Err(Error::agent(
                &self.name,
                "act_and_parse",
                format!("no motion in instruction {:?}", instruction),
            ));
        }
        Ok(motion)
    }
}

#[async_trait]
impl Agent for KeywordPlanner {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> Vec<&'static str> {
        vec!["act", "act_and_parse"]
    }

    async fn invoke(&self, capability: &str, args: Vec<Value>) -> Result<Value> {
        let instruction = args.first().and_then(Value::as_str).unwrap_or_default();
        match capability {
            "act_and_parse" => Ok(json!(self.plan(instruction)?)),
            "act" => Ok(json!(format!("ok: {}", instruction))),
            other => Err(unknown_capability(self, other)),
        }
    }
}
