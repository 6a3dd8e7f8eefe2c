//! Instruction source standing in for speech capture.

use std::collections::VecDeque;
use std::io::BufRead;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use async_trait::async_trait;
use crossbeam_channel::{Receiver, RecvTimeoutError};
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::agent::{unknown_capability, Agent};
use crate::channel::Value;
use crate::error::{Error, Result};
use crate::{hlog_debug, util};

enum Source {
    Script(Mutex<VecDeque<String>>),
    Lines(Receiver<String>),
}

/// Capability `listen()` -> the next instruction as a string.
///
/// Scripted consoles hand out a fixed list. Stdin consoles read lines from a
/// background thread and wait for the next one, polling so that the blocking
/// read never outlives the runtime. A pending `listen` gives up once the
/// shutdown token fires; hand the same token to
/// [`OrchestrationBuilder::cancel_on_drain`](crate::orchestration::OrchestrationBuilder::cancel_on_drain)
/// so a continuous listener exits when the run drains.
pub struct ConsoleAgent {
    name: String,
    source: Source,
    exhausted: AtomicBool,
    poll: Duration,
    shutdown: CancellationToken,
}

impl ConsoleAgent {
    pub fn scripted<I, S>(name: &str, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let lines: VecDeque<String> = lines
            .into_iter()
            .map(Into::into)
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .collect();
        let exhausted = AtomicBool::new(lines.is_empty());
        Self {
            name: name.to_string(),
            source: Source::Script(Mutex::new(lines)),
            exhausted,
            poll: Duration::from_millis(200),
            shutdown: CancellationToken::new(),
        }
    }

    /// Parse a `;`-separated script such as `"move left;grab"`.
    pub fn from_script(name: &str, script: &str) -> Self {
        Self::scripted(name, script.split(';'))
    }

    /// Read instructions from stdin, one per line.
    pub fn stdin(name: &str) -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        thread::spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else { break };
                if tx.send(line).is_err() {
                    break;
                }
            }
        });
        Self::from_receiver(name, rx)
    }

    pub fn from_receiver(name: &str, rx: Receiver<String>) -> Self {
        Self {
            name: name.to_string(),
            source: Source::Lines(rx),
            exhausted: AtomicBool::new(false),
            poll: Duration::from_millis(200),
            shutdown: CancellationToken::new(),
        }
    }

    /// Stop waiting for input once `token` is cancelled.
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    /// No more instructions will arrive.
    pub fn is_exhausted(&self) -> bool {
        self.exhausted.load(Ordering::SeqCst)
    }

    async fn listen(&self) -> Result<Value> {
        match &self.source {
            Source::Script(lines) => {
                let mut lines = lines.lock().unwrap_or_else(|e| e.into_inner());
                let next = lines.pop_front();
                if lines.is_empty() {
                    self.exhausted.store(true, Ordering::SeqCst);
                }
                next.map(|l| json!(l))
                    .ok_or_else(|| Error::agent(&self.name, "listen", "script exhausted"))
            }
            Source::Lines(rx) => loop {
                if self.shutdown.is_cancelled() {
                    return Err(Error::agent(&self.name, "listen", "shutting down"));
                }
                let rx = rx.clone();
                let poll = self.poll;
                let received = tokio::select! {
                    biased;
                    _ = self.shutdown.cancelled() => {
                        hlog_debug!("{}: listen interrupted by shutdown", self.name);
                        return Err(Error::agent(&self.name, "listen", "shutting down"));
                    }
                    r = util::blocking_with_timeout(poll * 2, move || Ok(rx.recv_timeout(poll))) => r?,
                };
                match received {
                    Ok(line) if line.trim().is_empty() => continue,
                    Ok(line) => {
                        hlog_debug!("{}: heard {:?}", self.name, line);
                        return Ok(json!(line.trim()));
                    }
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => {
                        self.exhausted.store(true, Ordering::SeqCst);
                        return Err(Error::agent(&self.name, "listen", "input closed"));
                    }
                }
            },
        }
    }
}

#[async_trait]
impl Agent for ConsoleAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> Vec<&'static str> {
        vec!["listen"]
    }

    async fn invoke(&self, capability: &str, _args: Vec<Value>) -> Result<Value> {
        match capability {
            "listen" => self.listen().await,
            other => Err(unknown_capability(self, other)),
        }
    }
}
