// =============================================================================
// Conflict resolver — weighted bullish vs bearish vote with dissent tracking
// =============================================================================

use serde::Serialize;
use tracing::debug;

use crate::runtime_config::ConflictParams;
use crate::types::Direction;

/// One source's directional vote, weighted by source quality.
#[derive(Debug, Clone, Serialize)]
pub struct DirectionalVote {
    pub source: String,
    pub weight: f64,
    pub direction: Direction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WinningDirection {
    Bullish,
    Bearish,
    Tie,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Resolution {
    /// No dissent among directional votes.
    Agreed,
    /// The proposed side lost (or tied) and the override is off.
    ConflictRejected,
    /// Dissent exists but the trade proceeds with reduced confidence.
    DissentAccepted,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConflictOutcome {
    pub can_trade: bool,
    pub winning_direction: WinningDirection,
    pub resolution: Resolution,
    pub bullish_weight: f64,
    pub bearish_weight: f64,
    /// Sources on the losing side.
    pub dissenting_sources: Vec<String>,
    /// Subtracted from decision confidence when dissent is accepted [0, 1].
    pub confidence_penalty: f64,
    /// Human-readable impact line for the decision log.
    pub impact: String,
}

/// Resolve a directional conflict for a proposed trade direction.
pub fn resolve(
    votes: &[DirectionalVote],
    proposed: Direction,
    params: &ConflictParams,
) -> ConflictOutcome {
    let bullish_weight: f64 = votes
        .iter()
        .filter(|v| v.direction == Direction::Bullish)
        .map(|v| v.weight)
        .sum();
    let bearish_weight: f64 = votes
        .iter()
        .filter(|v| v.direction == Direction::Bearish)
        .map(|v| v.weight)
        .sum();

    let winning_direction = if (bullish_weight - bearish_weight).abs() < f64::EPSILON {
        WinningDirection::Tie
    } else if bullish_weight > bearish_weight {
        WinningDirection::Bullish
    } else {
        WinningDirection::Bearish
    };

    let losing_direction = match winning_direction {
        WinningDirection::Bullish => Some(Direction::Bearish),
        WinningDirection::Bearish => Some(Direction::Bullish),
        WinningDirection::Tie => None,
    };

    let dissenting_sources: Vec<String> = match losing_direction {
        Some(losing) => votes
            .iter()
            .filter(|v| v.direction == losing)
            .map(|v| v.source.clone())
            .collect(),
        // On a tie every directional vote is contested.
        None => votes
            .iter()
            .filter(|v| v.direction != Direction::Neutral)
            .map(|v| v.source.clone())
            .collect(),
    };

    let proposed_wins = matches!(
        (winning_direction, proposed),
        (WinningDirection::Bullish, Direction::Bullish)
            | (WinningDirection::Bearish, Direction::Bearish)
    );

    let outcome = if dissenting_sources.is_empty() && proposed_wins {
        ConflictOutcome {
            can_trade: true,
            winning_direction,
            resolution: Resolution::Agreed,
            bullish_weight,
            bearish_weight,
            dissenting_sources,
            confidence_penalty: 0.0,
            impact: "all directional sources agree".to_string(),
        }
    } else if proposed_wins {
        let impact = format!(
            "dissent from [{}]; proceeding with winning side ({:.2} vs {:.2})",
            dissenting_sources.join(", "),
            bullish_weight.max(bearish_weight),
            bullish_weight.min(bearish_weight)
        );
        ConflictOutcome {
            can_trade: true,
            winning_direction,
            resolution: Resolution::DissentAccepted,
            bullish_weight,
            bearish_weight,
            dissenting_sources,
            confidence_penalty: 0.10,
            impact,
        }
    } else if params.allow_conflict_override {
        let impact = format!(
            "proposed {proposed} lost the vote ({bullish_weight:.2} bullish vs {bearish_weight:.2} bearish); override enabled"
        );
        ConflictOutcome {
            can_trade: true,
            winning_direction,
            resolution: Resolution::DissentAccepted,
            bullish_weight,
            bearish_weight,
            dissenting_sources,
            confidence_penalty: 0.20,
            impact,
        }
    } else {
        let impact = format!(
            "proposed {proposed} lost the vote ({bullish_weight:.2} bullish vs {bearish_weight:.2} bearish)"
        );
        ConflictOutcome {
            can_trade: false,
            winning_direction,
            resolution: Resolution::ConflictRejected,
            bullish_weight,
            bearish_weight,
            dissenting_sources,
            confidence_penalty: 0.0,
            impact,
        }
    };

    debug!(
        proposed = %proposed,
        winning = ?outcome.winning_direction,
        resolution = ?outcome.resolution,
        bullish = format!("{bullish_weight:.2}"),
        bearish = format!("{bearish_weight:.2}"),
        "conflict resolved"
    );

    outcome
}
