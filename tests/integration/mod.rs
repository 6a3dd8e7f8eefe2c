//! Integration test suite for hri.
//!
//! These tests drive complete orchestrations through the public API: build,
//! run for a number of cycles, and inspect the run report, the events and
//! what the agents were called with.
//!
//! # Test Categories
//!
//! - `registration`: graph validation before any agent runs
//! - `dataflow`: cycle ordering and same-cycle visibility
//! - `queues`: continuous producers, FIFO order and overflow
//! - `failures`: task errors, fail_fast and starvation
//! - `shutdown`: stop requests, draining and leaked workers
//! - `end_to_end`: the simulated robot loop and config files


mod dataflow;
mod failures;
mod shutdown;
mod end_to_end;
