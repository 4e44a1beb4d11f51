//! `naopose-types` – shared value types for the NAOqi pose bridge.
//!
//! Every crate in the workspace speaks in terms of these types: the
//! connection parameters of the NAOqi broker, the loose firmware version,
//! the body-pose goal and its actionlib terminal state, the outcome of a
//! worker run, and the single [`BridgeError`] enum.

pub mod version;

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use version::NaoqiVersion;

/// Default NAOqi broker address.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default NAOqi broker port.
pub const DEFAULT_PORT: u16 = 9559;

/// Host/port of the NAOqi parent broker.  Immutable once the node is up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionParams {
    pub host: String,
    pub port: u16,
}

impl Default for ConnectionParams {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
        }
    }
}

impl fmt::Display for ConnectionParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Goal of the `naoqi_bridge_msgs/BodyPose` action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BodyPoseGoal {
    pub pose_name: String,
}

impl BodyPoseGoal {
    pub fn new(pose_name: impl Into<String>) -> Self {
        Self {
            pose_name: pose_name.into(),
        }
    }
}

/// Goal state as reported by `actionlib_msgs/GoalStatus`.
///
/// The discriminants are the numeric status codes used on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum GoalState {
    Pending = 0,
    Active = 1,
    Preempted = 2,
    Succeeded = 3,
    Aborted = 4,
    Rejected = 5,
    Preempting = 6,
    Recalling = 7,
    Recalled = 8,
    Lost = 9,
}

impl GoalState {
    /// Decode a wire status code.  Unknown codes map to [`GoalState::Lost`].
    pub fn from_code(code: u64) -> Self {
        match code {
            0 => GoalState::Pending,
            1 => GoalState::Active,
            2 => GoalState::Preempted,
            3 => GoalState::Succeeded,
            4 => GoalState::Aborted,
            5 => GoalState::Rejected,
            6 => GoalState::Preempting,
            7 => GoalState::Recalling,
            8 => GoalState::Recalled,
            _ => GoalState::Lost,
        }
    }

    pub fn code(self) -> u8 {
        self as u8
    }

    /// `true` once the server will not report any further transition.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            GoalState::Preempted
                | GoalState::Succeeded
                | GoalState::Aborted
                | GoalState::Rejected
                | GoalState::Recalled
                | GoalState::Lost
        )
    }
}

impl fmt::Display for GoalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GoalState::Pending => "PENDING",
            GoalState::Active => "ACTIVE",
            GoalState::Preempted => "PREEMPTED",
            GoalState::Succeeded => "SUCCEEDED",
            GoalState::Aborted => "ABORTED",
            GoalState::Rejected => "REJECTED",
            GoalState::Preempting => "PREEMPTING",
            GoalState::Recalling => "RECALLING",
            GoalState::Recalled => "RECALLED",
            GoalState::Lost => "LOST",
        };
        f.write_str(name)
    }
}

/// How a worker run ended.  The binary turns this into the process exit
/// status; nothing below `main` terminates the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The pose goal was submitted and the wait returned.
    Completed,
    /// The version-capable module could not be reached.
    VersionUnavailable,
    /// The action endpoint never showed up.
    ActionServerUnavailable,
    /// The goal ended in a non-success state and strict mode is on.
    GoalFailed(GoalState),
    /// Shutdown was requested before the run finished.
    Cancelled,
}

impl RunOutcome {
    pub fn exit_code(self) -> i32 {
        match self {
            RunOutcome::Completed => 0,
            RunOutcome::VersionUnavailable => 1,
            RunOutcome::ActionServerUnavailable => 2,
            RunOutcome::GoalFailed(_) => 3,
            RunOutcome::Cancelled => 130,
        }
    }
}

/// Error type shared by every layer of the bridge.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BridgeError {
    #[error("could not create proxy to \"{module}\": {reason}")]
    ConnectionFailed { module: String, reason: String },

    #[error("required module \"{0}\" is unreachable")]
    CriticalDependencyUnavailable(String),

    #[error("invalid version string: {0}")]
    VersionParse(String),

    #[error("action server \"{endpoint}\" not available after {waited:?}")]
    ActionServerUnavailable { endpoint: String, waited: Duration },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("invalid node name: {0:?}")]
    InvalidNodeName(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("operation cancelled by shutdown")]
    Cancelled,
}

impl BridgeError {
    /// Map an error that escaped the worker onto a run outcome.
    pub fn outcome(&self) -> RunOutcome {
        match self {
            BridgeError::CriticalDependencyUnavailable(_) => RunOutcome::VersionUnavailable,
            BridgeError::ActionServerUnavailable { .. } => RunOutcome::ActionServerUnavailable,
            BridgeError::Cancelled => RunOutcome::Cancelled,
            _ => RunOutcome::VersionUnavailable,
        }
    }
}
