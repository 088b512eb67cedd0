//! Delayed-action coordination.
//!
//! A handler that finishes asynchronously gets a [`Continuation`]. Resuming it
//! sends a message back to the session, which the host delivers by calling
//! `Session::pump`. Until then the session holds the half-finished command and
//! queues incoming keys.

use std::fmt;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use tracing::debug;

use crate::host::EditorHost;

/// Work to run on the host when a continuation is delivered
pub type DelayedEffect = Box<dyn FnOnce(&mut dyn EditorHost) + Send>;

struct DelayedMessage {
    token: u64,
    effect: Option<DelayedEffect>,
}

/// Completion signal for one delayed action. Single use.
pub struct Continuation {
    token: u64,
    tx: Sender<DelayedMessage>,
}

impl fmt::Debug for Continuation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Continuation").field("token", &self.token).finish()
    }
}

impl Continuation {
    pub fn token(&self) -> u64 {
        self.token
    }

    /// Signal completion
    pub fn resume(self) {
        self.send(None);
    }

    /// Signal completion, running `effect` on the host before the command
    /// is finished
    pub fn resume_with(self, effect: impl FnOnce(&mut dyn EditorHost) + Send + 'static) {
        self.send(Some(Box::new(effect)));
    }

    fn send(self, effect: Option<DelayedEffect>) {
        let message = DelayedMessage {
            token: self.token,
            effect,
        };
        if self.tx.send(message).is_err() {
            debug!(token = self.token, "continuation resumed after its session ended");
        }
    }
}

/// A delivered continuation
pub struct Resumed {
    pub token: u64,
    pub effect: Option<DelayedEffect>,
}

/// Tracks the single live delayed action of a session
pub struct DelayedCoordinator {
    tx: Sender<DelayedMessage>,
    rx: Receiver<DelayedMessage>,
    next_token: u64,
    live: Option<u64>,
}

impl Default for DelayedCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for DelayedCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DelayedCoordinator")
            .field("live", &self.live)
            .finish()
    }
}

impl DelayedCoordinator {
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self {
            tx,
            rx,
            next_token: 1,
            live: None,
        }
    }

    /// Start a delayed action and hand out its continuation
    pub fn begin(&mut self) -> Continuation {
        let token = self.next_token;
        self.next_token += 1;
        self.live = Some(token);
        Continuation {
            token,
            tx: self.tx.clone(),
        }
    }

    pub fn is_pending(&self) -> bool {
        self.live.is_some()
    }

    /// Take the live action's continuation if it has fired. Messages for
    /// abandoned actions are dropped.
    pub fn poll(&mut self) -> Option<Resumed> {
        while let Ok(message) = self.rx.try_recv() {
            if let Some(resumed) = self.accept(message) {
                return Some(resumed);
            }
        }
        None
    }

    /// Block up to `timeout` for the live action's continuation
    pub fn wait(&mut self, timeout: Duration) -> Option<Resumed> {
        self.live?;
        loop {
            match self.rx.recv_timeout(timeout) {
                Ok(message) => {
                    if let Some(resumed) = self.accept(message) {
                        return Some(resumed);
                    }
                }
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                    return None
                }
            }
        }
    }

    fn accept(&mut self, message: DelayedMessage) -> Option<Resumed> {
        if self.live != Some(message.token) {
            debug!(token = message.token, "ignoring stale continuation");
            return None;
        }
        self.live = None;
        Some(Resumed {
            token: message.token,
            effect: message.effect,
        })
    }

    /// Forget the live action. Returns whether there was one.
    pub fn abandon(&mut self) -> bool {
        self.live.take().is_some()
    }
}
