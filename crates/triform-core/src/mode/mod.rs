//! Mode selection: choose graph, table, or vector for an analytical intent.
//!
//! Scoring sits behind the [`ScoringStrategy`] trait. The default
//! [`RubricStrategy`] is a fixed, explainable rubric and a pure function of
//! its inputs; alternative strategies (for example a model-backed one) plug
//! in through the same interface.

pub mod rubric;

use triform_types::mode::{DataCharacteristics, ModeScores, ModeSelection, ModeSignal};

pub use rubric::RubricStrategy;

/// Scores the three modes for an intent and a data profile.
pub trait ScoringStrategy: Send + Sync {
    /// Name recorded in every selection this strategy produces.
    fn name(&self) -> &str;

    /// Independent per-mode scores plus the signals that produced them.
    fn score(
        &self,
        intent: &str,
        characteristics: &DataCharacteristics,
    ) -> (ModeScores, Vec<ModeSignal>);
}

/// Picks the primary mode from a strategy's scores.
pub struct ModeSelector {
    strategy: Box<dyn ScoringStrategy>,
}

impl ModeSelector {
    pub fn new<S: ScoringStrategy + 'static>(strategy: S) -> Self {
        Self {
            strategy: Box::new(strategy),
        }
    }

    pub fn strategy_name(&self) -> &str {
        self.strategy.name()
    }

    /// Score all modes and select the arg-max (ties: graph, table, vector).
    pub fn select(&self, intent: &str, characteristics: &DataCharacteristics) -> ModeSelection {
        let (scores, signals) = self.strategy.score(intent, characteristics);
        let primary = scores.arg_max();
        tracing::debug!(
            strategy = self.strategy.name(),
            primary = %primary,
            graph = scores.graph,
            table = scores.table,
            vector = scores.vector,
            "mode selected"
        );
        ModeSelection {
            primary,
            scores,
            signals,
            strategy: self.strategy.name().to_string(),
        }
    }
}

impl Default for ModeSelector {
    fn default() -> Self {
        Self::new(RubricStrategy)
    }
}

impl std::fmt::Debug for ModeSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModeSelector")
            .field("strategy", &self.strategy.name())
            .finish()
    }
}
