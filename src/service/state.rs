use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Externally visible session phase, derived from [`SessionFlags`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Active,
    /// Active, and results do not end the session.
    Autodiscovering,
}

impl SessionState {
    pub fn label(self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Active => "active",
            SessionState::Autodiscovering => "autodiscovering",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Flags shared between the control surface and the session loop.
///
/// `complete` is true whenever no session owns the buffer stream. `epoch`
/// counts started sessions; capture events carry the epoch they belong to.
#[derive(Debug)]
pub(crate) struct SessionFlags {
    complete: AtomicBool,
    autodiscovery: AtomicBool,
    loop_running: AtomicBool,
    epoch: AtomicU64,
}

impl SessionFlags {
    pub(crate) fn new(autodiscovery: bool) -> Self {
        Self {
            complete: AtomicBool::new(true),
            autodiscovery: AtomicBool::new(autodiscovery),
            loop_running: AtomicBool::new(false),
            epoch: AtomicU64::new(0),
        }
    }

    pub(crate) fn is_complete(&self) -> bool {
        self.complete.load(Ordering::Acquire)
    }

    pub(crate) fn set_complete(&self, complete: bool) {
        self.complete.store(complete, Ordering::Release);
    }

    pub(crate) fn autodiscovery(&self) -> bool {
        self.autodiscovery.load(Ordering::Acquire)
    }

    pub(crate) fn set_autodiscovery(&self, enabled: bool) {
        self.autodiscovery.store(enabled, Ordering::Release);
    }

    pub(crate) fn loop_running(&self) -> bool {
        self.loop_running.load(Ordering::Acquire)
    }

    pub(crate) fn set_loop_running(&self, running: bool) {
        self.loop_running.store(running, Ordering::Release);
    }

    pub(crate) fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    /// Advance to a new session epoch and return it.
    pub(crate) fn next_epoch(&self) -> u64 {
        self.epoch.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub(crate) fn state(&self) -> SessionState {
        if self.is_complete() {
            SessionState::Idle
        } else if self.autodiscovery() {
            SessionState::Autodiscovering
        } else {
            SessionState::Active
        }
    }
}
