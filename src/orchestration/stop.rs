//! Stop conditions and the external stop signal.

use tokio_util::sync::CancellationToken;

/// Polled once per cycle, before the cycle starts.
pub trait StopCondition: Send {
    /// `cycles` is the number of cycles completed so far.
    fn should_stop(&mut self, cycles: u64) -> bool;
}

/// Stop after a fixed number of cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaxCycles(pub u64);

impl StopCondition for MaxCycles {
    fn should_stop(&mut self, cycles: u64) -> bool {
        cycles >= self.0
    }
}

/// Never stop on its own; only a [`StopHandle`] or a fatal error ends the run.
#[derive(Debug, Clone, Copy, Default)]
pub struct Never;

impl StopCondition for Never {
    fn should_stop(&mut self, _cycles: u64) -> bool {
        false
    }
}

impl<F> StopCondition for F
where
    F: FnMut(u64) -> bool + Send,
{
    fn should_stop(&mut self, cycles: u64) -> bool {
        self(cycles)
    }
}

/// Cloneable handle that asks a running orchestration to stop.
///
/// Stopping is cooperative: the task currently executing finishes, no
/// further tasks start, then the run drains.
#[derive(Debug, Clone, Default)]
pub struct StopHandle {
    token: CancellationToken,
}

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.token.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once `stop` has been called.
    pub async fn stopped(&self) {
        self.token.cancelled().await;
    }
}
