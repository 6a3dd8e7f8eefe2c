//! Core domain models: task declarations and the task graph.

pub mod dag;
pub mod task;

pub use dag::{ChannelRoute, InputSource, TaskGraph};
pub use task::{Callable, Task, TaskFuture, TaskMode, TaskOptions};
