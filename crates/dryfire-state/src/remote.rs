//! Status and command records in the shape the remote-control client polls.

use crate::{ScoreEngine, SessionError, SessionPhase};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteStatus {
    pub running: bool,
    pub status: SessionPhase,
    pub shots: u32,
    pub shots_goal: u32,
    pub last_score: Option<i32>,
    pub total_score: i64,
    pub avg_score: f64,
}

impl From<&ScoreEngine> for RemoteStatus {
    fn from(engine: &ScoreEngine) -> Self {
        let stats = engine.stats();
        Self {
            running: engine.phase() == SessionPhase::Running,
            status: engine.phase(),
            shots: stats.shots_fired,
            shots_goal: engine.goal(),
            last_score: engine.last_score(),
            total_score: stats.total_score,
            avg_score: stats.avg_score,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartCommand {
    pub shots: u32,
}

impl StartCommand {
    pub fn parse(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn validate(&self) -> Result<u32, SessionError> {
        if self.shots == 0 {
            return Err(SessionError::ZeroGoal);
        }
        Ok(self.shots)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Target;
    use nalgebra::Point2;

    #[test]
    fn test_status_json_shape() {
        let mut engine = ScoreEngine::new(Target::default());
        engine.start(10).unwrap();
        engine.record(Point2::new(450.0, 600.0), 5);

        let json = serde_json::to_value(RemoteStatus::from(&engine)).unwrap();
        assert_eq!(json["running"], true);
        assert_eq!(json["status"], "running");
        assert_eq!(json["shots"], 1);
        assert_eq!(json["shots_goal"], 10);
        assert_eq!(json["last_score"], 10);
        assert_eq!(json["total_score"], 10);
        assert_eq!(json["avg_score"], 10.0);
    }

    #[test]
    fn test_idle_status() {
        let engine = ScoreEngine::new(Target::default());
        let json = serde_json::to_value(RemoteStatus::from(&engine)).unwrap();
        assert_eq!(json["running"], false);
        assert_eq!(json["status"], "idle");
        assert!(json["last_score"].is_null());
    }

    #[test]
    fn test_start_command() {
        let cmd = StartCommand::parse(r#"{"shots": 5}"#).unwrap();
        assert_eq!(cmd.validate(), Ok(5));
        let cmd = StartCommand::parse(r#"{"shots": 0}"#).unwrap();
        assert_eq!(cmd.validate(), Err(SessionError::ZeroGoal));
        assert!(StartCommand::parse(r#"{"shots": -1}"#).is_err());
    }
}
