//! Session Lifecycle Types
//!
//! A session moves through a single forward path:
//!
//! ```text
//! Starting ──(page opened)──► Running ──(stop)──► Stopping ──(page closed)──► Stopped
//!     │                                                                         ▲
//!     └──────────────(open failed, or stopped before ready)─────────────────────┘
//! ```
//!
//! `Stopped` is terminal. A stopped session is discarded and never reused.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::feed::{FeedKey, PriceSample};

/// Process-unique session identifier.
///
/// Distinguishes successive sessions for the same key, so that a late
/// release aimed at a discarded session can never touch its replacement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Upstream resource is being acquired.
    Starting,
    /// Poll loop is active.
    Running,
    /// Stop requested; loop exits at its next checkpoint.
    Stopping,
    /// Resource released. Terminal.
    Stopped,
}

impl SessionState {
    /// Lowercase label for logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
        }
    }

    /// Whether a stop request still has something to do.
    #[must_use]
    pub const fn is_live(self) -> bool {
        matches!(self, Self::Starting | Self::Running)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of one registered session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    /// Session identifier.
    pub id: SessionId,
    /// Feed the session polls.
    pub key: FeedKey,
    /// Current lifecycle state.
    pub state: SessionState,
    /// Outstanding subscriber handles.
    pub subscriber_count: usize,
    /// Samples published since start.
    pub samples_published: u64,
    /// Samples published while no receiver was attached.
    pub samples_unobserved: u64,
    /// Receivers attached to the session's fan-out.
    pub receivers: usize,
    /// Polls that failed since start.
    pub poll_failures: u64,
    /// Most recent published sample, if any.
    pub last_sample: Option<PriceSample>,
    /// When the session was created.
    pub started_at: DateTime<Utc>,
}
