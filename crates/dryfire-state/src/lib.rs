//! Scoring and session state: the ring target, per-session statistics, and
//! the events and status records handed to UI collaborators.

pub mod error;
pub mod remote;
pub mod session;
pub mod target;

pub use error::{SessionError, TargetError};
pub use remote::{RemoteStatus, StartCommand};
pub use session::{HitEvent, ScoreEngine, ScoreOutcome, SessionPhase, SessionStats, SessionSummary};
pub use target::Target;
