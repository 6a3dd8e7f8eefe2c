pub mod agent;
pub mod channel;
pub mod config;
pub mod core;
pub mod error;
pub mod log;
pub mod orchestration;
pub mod sim;
pub mod util;

pub use agent::{Agent, AgentRef, AgentRegistry};
pub use error::{Error, Result};
pub use orchestration::{OrchestrationBuilder, Orchestrator, RunReport};
