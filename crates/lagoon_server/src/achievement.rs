//! Achievements and their unlock conditions.
//!
//! Unlock conditions are data, not code: each one is a [`Predicate`] tree
//! deserialized from the store and evaluated against the facts of a score.
//! The set of predicate forms is closed, so a malformed condition fails at
//! load time instead of at evaluation time.

use serde::{Deserialize, Serialize};

use crate::mode::GameMode;
use crate::store::AchievementRow;

/// The facts about a submitted score that unlock conditions may inspect.
#[derive(Debug, Clone, Copy)]
pub struct ScoreFacts {
    pub mode: GameMode,
    /// Accuracy in percent, 0.0 to 100.0.
    pub accuracy: f64,
    pub max_combo: u32,
    pub total_hits: u32,
    /// No misses and no dropped combo.
    pub perfect: bool,
}

/// A structured unlock condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Predicate {
    ModeIs(GameMode),
    AccuracyAtLeast(f64),
    ComboAtLeast(u32),
    TotalHitsAtLeast(u32),
    PerfectClear,
    All(Vec<Predicate>),
    Any(Vec<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    /// Evaluates this condition against a score.
    pub fn evaluate(&self, facts: &ScoreFacts) -> bool {
        match self {
            Self::ModeIs(mode) => facts.mode == *mode,
            Self::AccuracyAtLeast(min) => facts.accuracy >= *min,
            Self::ComboAtLeast(min) => facts.max_combo >= *min,
            Self::TotalHitsAtLeast(min) => facts.total_hits >= *min,
            Self::PerfectClear => facts.perfect,
            Self::All(preds) => preds.iter().all(|p| p.evaluate(facts)),
            Self::Any(preds) => preds.iter().any(|p| p.evaluate(facts)),
            Self::Not(pred) => !pred.evaluate(facts),
        }
    }
}

/// An achievement definition.
#[derive(Debug, Clone)]
pub struct Achievement {
    pub id: u32,
    pub name: String,
    pub description: String,
    pub condition: Predicate,
}

impl Achievement {
    /// Whether a score unlocks this achievement.
    pub fn unlocked_by(&self, facts: &ScoreFacts) -> bool {
        self.condition.evaluate(facts)
    }
}

impl From<AchievementRow> for Achievement {
    fn from(row: AchievementRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            description: row.description,
            condition: row.condition,
        }
    }
}
