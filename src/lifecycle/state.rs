//! Engine state machine.
//!
//! # State Transitions
//! ```text
//! Created → Starting: start() / serve()
//! Starting → Running: listener ready
//! Starting → Created: bind failed
//! Stopping → Stopped: bind failed after stop()
//! Starting | Running → Stopping: stop()
//! Stopping | Running → Stopped: server loop finished
//! ```

use std::fmt;

use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Created,
    Starting,
    Running,
    Stopping,
    Stopped,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EngineState::Created => "created",
            EngineState::Starting => "starting",
            EngineState::Running => "running",
            EngineState::Stopping => "stopping",
            EngineState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Observable engine state. Transitions are checked under the channel lock.
#[derive(Debug)]
pub struct Lifecycle {
    tx: watch::Sender<EngineState>,
}

impl Lifecycle {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(EngineState::Created);
        Self { tx }
    }

    pub fn state(&self) -> EngineState {
        *self.tx.borrow()
    }

    /// Move `from` → `to`. Returns false (and changes nothing) when the current
    /// state is not one of `from`.
    fn transition(&self, from: &[EngineState], to: EngineState) -> bool {
        self.tx.send_if_modified(|state| {
            if from.contains(state) {
                *state = to;
                true
            } else {
                false
            }
        })
    }

    /// Claim the engine for serving. Fails with the current state if already claimed.
    pub fn begin_start(&self) -> Result<(), EngineState> {
        if self.transition(&[EngineState::Created], EngineState::Starting) {
            Ok(())
        } else {
            Err(self.state())
        }
    }

    /// Undo a failed start. A stop requested meanwhile completes instead.
    pub fn abort_start(&self) {
        if !self.transition(&[EngineState::Starting], EngineState::Created) {
            self.transition(&[EngineState::Stopping], EngineState::Stopped);
        }
    }

    pub fn mark_running(&self) -> bool {
        self.transition(&[EngineState::Starting], EngineState::Running)
    }

    /// Request a stop. Returns false when there is nothing to stop.
    pub fn begin_stop(&self) -> bool {
        self.transition(
            &[EngineState::Starting, EngineState::Running],
            EngineState::Stopping,
        )
    }

    pub fn mark_stopped(&self) {
        self.transition(
            &[EngineState::Starting, EngineState::Running, EngineState::Stopping],
            EngineState::Stopped,
        );
    }

    /// Resolve once the state satisfies `predicate`.
    pub async fn wait_until(&self, predicate: impl Fn(EngineState) -> bool) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|state| predicate(*state)).await;
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}
