//! Crash point injection for exercising recovery
//!
//! Each session carries a configured [`CrashPoint`]. The transaction engine
//! checks it at fixed places in the protocol and, on a match, simulates a
//! node failure: the session goes inactive, drops its volatile state and
//! schedules a respawn.
//!
//! Unlike a process abort, the simulated crash keeps the decision log
//! intact, which is exactly what the termination protocol relies on.
//!
//! # Usage
//!
//! ```ignore
//! use twopc::crash_point::CrashPoint;
//!
//! let point: CrashPoint = "afterVoteSend".parse()?;
//! assert!(point.triggers(CrashPoint::AfterVoteSend));
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The protocol point after which a node simulates a crash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CrashPoint {
    /// Never crash
    #[default]
    None,
    /// After the PREPARE broadcast (coordinator) or the PREPARE/ABORT
    /// record write (participant)
    AfterPrepareWrite,
    /// After the participant sent its vote
    AfterVoteSend,
    /// After the COMMIT/ABORT decision record is written, before it is
    /// broadcast or acknowledged
    AfterCommitAbortWrite,
    /// After the decision was broadcast (coordinator) or acknowledged
    /// (participant)
    AfterResult,
}

impl CrashPoint {
    /// Returns the wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            CrashPoint::None => "none",
            CrashPoint::AfterPrepareWrite => "afterPrepareWrite",
            CrashPoint::AfterVoteSend => "afterVoteSend",
            CrashPoint::AfterCommitAbortWrite => "afterCommitAbortWrite",
            CrashPoint::AfterResult => "afterResult",
        }
    }

    /// Whether a node configured with `self` crashes on reaching `reached`.
    ///
    /// `None` never triggers, not even against itself.
    #[inline]
    pub fn triggers(&self, reached: CrashPoint) -> bool {
        *self != CrashPoint::None && *self == reached
    }
}

impl fmt::Display for CrashPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error returned for an unrecognised crash point name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownCrashPoint(pub String);

impl fmt::Display for UnknownCrashPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown crash point '{}'", self.0)
    }
}

impl std::error::Error for UnknownCrashPoint {}

impl FromStr for CrashPoint {
    type Err = UnknownCrashPoint;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        points::all()
            .iter()
            .copied()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| UnknownCrashPoint(s.to_string()))
    }
}

/// All defined crash points
pub mod points {
    use super::CrashPoint;

    /// Get all crash points, in protocol order
    pub fn all() -> &'static [CrashPoint] {
        &[
            CrashPoint::None,
            CrashPoint::AfterPrepareWrite,
            CrashPoint::AfterVoteSend,
            CrashPoint::AfterCommitAbortWrite,
            CrashPoint::AfterResult,
        ]
    }
}
