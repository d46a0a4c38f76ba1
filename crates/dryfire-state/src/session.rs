use crate::{SessionError, Target};
use nalgebra::Point2;
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionPhase {
    #[default]
    Idle,
    Running,
    Finished,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionStats {
    pub shots_fired: u32,
    pub total_score: i64,
    pub avg_score: f64,
}

impl SessionStats {
    fn record(&mut self, score: i32) {
        self.shots_fired += 1;
        self.total_score += score as i64;
        self.avg_score = self.total_score as f64 / self.shots_fired as f64;
    }
}

/// One accepted flash.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HitEvent {
    pub target_point: Point2<f64>,
    pub score: i32,
    /// Milliseconds since the session started.
    pub timestamp_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub shots: u32,
    pub total: i64,
    pub avg: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoreOutcome {
    pub hit: HitEvent,
    pub stats: SessionStats,
    /// Present only on the hit that reaches the goal.
    pub summary: Option<SessionSummary>,
}

/// Scores hits against the target and tracks one session.
#[derive(Debug, Clone)]
pub struct ScoreEngine {
    target: Target,
    phase: SessionPhase,
    goal: u32,
    stats: SessionStats,
    last_score: Option<i32>,
}

impl ScoreEngine {
    pub fn new(target: Target) -> Self {
        Self {
            target,
            phase: SessionPhase::Idle,
            goal: 0,
            stats: SessionStats::default(),
            last_score: None,
        }
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn goal(&self) -> u32 {
        self.goal
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    pub fn last_score(&self) -> Option<i32> {
        self.last_score
    }

    /// Reset the statistics and start scoring toward `goal` shots.
    pub fn start(&mut self, goal: u32) -> Result<(), SessionError> {
        if goal == 0 {
            return Err(SessionError::ZeroGoal);
        }
        self.goal = goal;
        self.stats = SessionStats::default();
        self.last_score = None;
        self.phase = SessionPhase::Running;
        info!("Session started, goal {} shot(s)", goal);
        Ok(())
    }

    /// Stop scoring and clear the statistics.
    pub fn stop(&mut self) {
        if self.phase == SessionPhase::Running {
            info!("Session stopped after {} shot(s)", self.stats.shots_fired);
        }
        self.phase = SessionPhase::Idle;
        self.stats = SessionStats::default();
        self.last_score = None;
    }

    /// Score one target-plane hit. Returns `None` unless a session is running.
    pub fn record(&mut self, target_point: Point2<f64>, timestamp_ms: u64) -> Option<ScoreOutcome> {
        if self.phase != SessionPhase::Running {
            return None;
        }

        let score = self.target.score(target_point);
        self.stats.record(score);
        self.last_score = Some(score);
        info!(
            "Hit {}/{} at ({:.1}, {:.1}) scored {}",
            self.stats.shots_fired, self.goal, target_point.x, target_point.y, score
        );

        let summary = (self.stats.shots_fired >= self.goal).then(|| {
            self.phase = SessionPhase::Finished;
            let summary = SessionSummary {
                shots: self.stats.shots_fired,
                total: self.stats.total_score,
                avg: self.stats.avg_score,
            };
            info!("Session finished: total {}, avg {:.2}", summary.total, summary.avg);
            summary
        });

        Some(ScoreOutcome {
            hit: HitEvent {
                target_point,
                score,
                timestamp_ms,
            },
            stats: self.stats,
            summary,
        })
    }
}
