//! Session deadline.
//!
//! A session owns exactly one deadline. Guarded reads and writes race it;
//! once it passes, the pending I/O is abandoned and the session ends, which
//! drops (closes) the connection. Rearming replaces the previous deadline.

use crate::error::{Result, SyncError};
use std::future::Future;
use std::time::Duration;
use tokio::time::{self, Instant};
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Waiting for the client's next message
    Idle,
    /// Streaming one file to the client
    Transfer,
}

#[derive(Debug)]
pub struct TimeoutGuard {
    idle: Duration,
    transfer: Duration,
    phase: Phase,
    deadline: Option<Instant>,
}

impl TimeoutGuard {
    pub fn new(idle: Duration, transfer: Duration) -> Self {
        Self {
            idle,
            transfer,
            phase: Phase::Idle,
            deadline: None,
        }
    }

    pub fn arm_idle(&mut self) {
        self.arm(Phase::Idle);
    }

    pub fn arm_transfer(&mut self) {
        self.arm(Phase::Transfer);
    }

    fn arm(&mut self, phase: Phase) {
        let duration = self.duration(phase);
        self.phase = phase;
        self.deadline = Some(Instant::now() + duration);
        trace!("Deadline set to {:?} ({:?})", duration, phase);
    }

    /// Release the deadline; guarded I/O then waits indefinitely.
    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn duration(&self, phase: Phase) -> Duration {
        match phase {
            Phase::Idle => self.idle,
            Phase::Transfer => self.transfer,
        }
    }

    /// Run `fut` against the current deadline.
    pub async fn run<F, T>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match self.deadline {
            None => fut.await,
            Some(deadline) => match time::timeout_at(deadline, fut).await {
                Ok(result) => result,
                Err(_) => Err(SyncError::Timeout(self.duration(self.phase))),
            },
        }
    }
}
