//! Bayesian Knowledge Tracing over per-skill mastery beliefs.
//!
//! The four-parameter update conditions the mastery belief on one observed
//! outcome, then applies the learning transition. Prediction scales the
//! expected-correct probability by the challenge difficulty relative to the
//! nominal band, which gives `calculate_optimal_difficulty` a monotone
//! function to bisect.

use chrono::Utc;

use crate::config::{ConfidenceParams, DifficultySearch, MasteryParams};
use crate::error::{EngineError, Result};
use crate::types::{ActivityResult, CompetencyLevel, DifficultyFeedback, MasteryStatus};

pub fn validate_unit(name: &str, value: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&value) || value.is_nan() {
        return Err(EngineError::InvalidParameter(format!(
            "{name} must lie in [0, 1]"
        )));
    }
    Ok(())
}

fn validate_competency(level: &CompetencyLevel) -> Result<()> {
    validate_unit("mastery_probability", level.mastery_probability)?;
    validate_unit("prior_knowledge", level.prior_knowledge)?;
    validate_unit("learning_rate", level.learning_rate)?;
    validate_unit("slip_probability", level.slip_probability)?;
    validate_unit("guess_probability", level.guess_probability)?;
    Ok(())
}

/// Evidence-volume/consistency confidence: grows with attempts, damped by the
/// dispersion of observed outcomes (Bernoulli variance normalized to [0, 1]).
pub fn confidence_score(
    total_attempts: u32,
    correct_attempts: u32,
    params: &ConfidenceParams,
) -> f64 {
    if total_attempts == 0 {
        return 0.0;
    }
    let n = total_attempts as f64;
    let attempt_factor = n / (n + params.attempt_scale);
    let accuracy = correct_attempts as f64 / n;
    let dispersion = 4.0 * accuracy * (1.0 - accuracy);
    (attempt_factor * (1.0 - params.dispersion_damping * dispersion)).clamp(0.0, 1.0)
}

/// One BKT step: posterior via Bayes' rule on the observed outcome, then the
/// learning transition. Pure; persistence is the caller's concern.
pub fn update_competency(
    level: &CompetencyLevel,
    result: &ActivityResult,
    confidence: &ConfidenceParams,
) -> Result<CompetencyLevel> {
    validate_competency(level)?;
    validate_unit("score", result.score)?;

    let p = level.mastery_probability;
    let slip = level.slip_probability;
    let guess = level.guess_probability;

    let posterior = if result.success {
        let denom = p * (1.0 - slip) + (1.0 - p) * guess;
        if denom <= f64::EPSILON {
            p
        } else {
            p * (1.0 - slip) / denom
        }
    } else {
        let denom = p * slip + (1.0 - p) * (1.0 - guess);
        if denom <= f64::EPSILON {
            p
        } else {
            p * slip / denom
        }
    };

    let next = posterior + (1.0 - posterior) * level.learning_rate;

    let mut updated = level.clone();
    updated.mastery_probability = next.clamp(0.0, 1.0);
    updated.total_attempts = level.total_attempts.saturating_add(1);
    if result.success {
        updated.correct_attempts = level.correct_attempts.saturating_add(1);
    }
    updated.confidence_level =
        confidence_score(updated.total_attempts, updated.correct_attempts, confidence);
    updated.last_updated = Utc::now();
    Ok(updated)
}

/// Expected success probability at the given challenge difficulty.
/// Monotone decreasing in difficulty: the base rate is scaled by
/// `1 + band_center - difficulty`, then clamped.
pub fn predict_success(
    level: &CompetencyLevel,
    challenge_difficulty: f64,
    search: &DifficultySearch,
) -> Result<f64> {
    validate_competency(level)?;
    validate_unit("challenge_difficulty", challenge_difficulty)?;

    let p = level.mastery_probability;
    let base = p * (1.0 - level.slip_probability) + (1.0 - p) * level.guess_probability;
    let band_factor = 1.0 + search.band_center - challenge_difficulty;
    Ok((base * band_factor).clamp(0.0, 1.0))
}

pub fn predict_performance(
    level: &CompetencyLevel,
    challenge_difficulty: f64,
    search: &DifficultySearch,
    confidence: &ConfidenceParams,
) -> Result<(f64, f64)> {
    let success = predict_success(level, challenge_difficulty, search)?;
    let conf = confidence_score(level.total_attempts, level.correct_attempts, confidence);
    Ok((success, conf))
}

/// Bisects difficulty in [0, 1] until the predicted success probability is
/// within tolerance of the target, or the iteration bound is exhausted.
/// Deterministic for identical inputs.
pub fn calculate_optimal_difficulty(
    level: &CompetencyLevel,
    target_success_rate: f64,
    search: &DifficultySearch,
) -> Result<f64> {
    validate_unit("target_success_rate", target_success_rate)?;

    let mut lo = 0.0_f64;
    let mut hi = 1.0_f64;
    let mut mid = (lo + hi) / 2.0;

    for _ in 0..search.max_iterations {
        mid = (lo + hi) / 2.0;
        let predicted = predict_success(level, mid, search)?;
        if (predicted - target_success_rate).abs() <= search.tolerance {
            return Ok(mid);
        }
        if predicted > target_success_rate {
            // easier than the target band, push difficulty up
            lo = mid;
        } else {
            hi = mid;
        }
    }

    Ok(mid)
}

pub fn mastery_status(level: &CompetencyLevel, mastery: &MasteryParams) -> MasteryStatus {
    if level.total_attempts == 0 {
        MasteryStatus::Unassessed
    } else if level.mastery_probability >= mastery.mastery_threshold {
        MasteryStatus::Mastered
    } else {
        MasteryStatus::Learning
    }
}

/// Folds perceived-vs-estimated difficulty agreement into the confidence
/// level. Mastery probability is never altered by feedback.
pub fn apply_difficulty_feedback(
    level: &CompetencyLevel,
    feedback: &DifficultyFeedback,
    params: &ConfidenceParams,
) -> Result<CompetencyLevel> {
    validate_unit("perceived_difficulty", feedback.perceived_difficulty)?;
    validate_unit("estimated_difficulty", feedback.estimated_difficulty)?;
    validate_unit("observed_success_rate", feedback.observed_success_rate)?;

    let gap = (feedback.perceived_difficulty - feedback.estimated_difficulty).abs();
    let agreement = 1.0 - gap;
    let factor = 1.0 + params.feedback_gain * (agreement - 0.5) * 2.0;

    let mut updated = level.clone();
    updated.confidence_level = (level.confidence_level * factor).clamp(0.0, 1.0);
    updated.last_updated = Utc::now();
    Ok(updated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BktParams;
    use std::collections::HashSet;

    fn default_level() -> CompetencyLevel {
        CompetencyLevel::unassessed("l1", "s1", &BktParams::default())
    }

    fn result_with(success: bool) -> ActivityResult {
        ActivityResult {
            learner_id: "l1".to_string(),
            challenge_id: "c1".to_string(),
            skills: HashSet::from(["s1".to_string()]),
            success,
            score: if success { 1.0 } else { 0.0 },
            attempts: 1,
            time_spent_minutes: 10,
        }
    }

    #[test]
    fn worked_example_single_correct_observation() {
        // prior 0.1, lr 0.3, slip 0.1, guess 0.2:
        // posterior = 0.09 / 0.27 = 1/3, next = 1/3 + 2/3 * 0.3
        let updated = update_competency(
            &default_level(),
            &result_with(true),
            &ConfidenceParams::default(),
        )
        .unwrap();
        assert!((updated.mastery_probability - 0.5333).abs() < 0.001);
        assert_eq!(updated.total_attempts, 1);
        assert_eq!(updated.correct_attempts, 1);
    }

    #[test]
    fn correct_never_decreases_incorrect_never_increases() {
        let level = default_level();
        let up = update_competency(&level, &result_with(true), &ConfidenceParams::default())
            .unwrap();
        assert!(up.mastery_probability >= level.mastery_probability);

        let mut high = default_level();
        high.mastery_probability = 0.8;
        high.learning_rate = 0.0;
        let down = update_competency(&high, &result_with(false), &ConfidenceParams::default())
            .unwrap();
        assert!(down.mastery_probability <= high.mastery_probability);
    }

    #[test]
    fn rejects_out_of_range_parameters() {
        let mut level = default_level();
        level.slip_probability = 1.2;
        let err = update_competency(&level, &result_with(true), &ConfidenceParams::default())
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidParameter(_)));
    }

    #[test]
    fn degenerate_denominator_keeps_belief() {
        let mut level = default_level();
        level.mastery_probability = 0.0;
        level.guess_probability = 0.0;
        level.learning_rate = 0.0;
        let updated = update_competency(&level, &result_with(true), &ConfidenceParams::default())
            .unwrap();
        assert!((updated.mastery_probability - 0.0).abs() < 1e-12);
    }

    #[test]
    fn prediction_is_monotone_in_difficulty() {
        let mut level = default_level();
        level.mastery_probability = 0.6;
        let search = DifficultySearch::default();
        let mut previous = f64::INFINITY;
        for step in 0..=10 {
            let d = step as f64 / 10.0;
            let p = predict_success(&level, d, &search).unwrap();
            assert!(p <= previous + 1e-12, "success must not rise with difficulty");
            assert!((0.0..=1.0).contains(&p));
            previous = p;
        }
    }

    #[test]
    fn optimal_difficulty_is_deterministic_and_converges() {
        let mut level = default_level();
        level.mastery_probability = 0.6;
        let search = DifficultySearch::default();

        let first = calculate_optimal_difficulty(&level, 0.7, &search).unwrap();
        let second = calculate_optimal_difficulty(&level, 0.7, &search).unwrap();
        assert_eq!(first, second);

        let predicted = predict_success(&level, first, &search).unwrap();
        assert!((predicted - 0.7).abs() <= search.tolerance + 1e-9);
    }

    #[test]
    fn unreachable_target_exhausts_at_boundary() {
        // default prior 0.1 cannot reach a 0.99 success rate at any difficulty
        let level = default_level();
        let search = DifficultySearch::default();
        let d = calculate_optimal_difficulty(&level, 0.99, &search).unwrap();
        assert!(d < 1e-6, "search should drive toward the easiest difficulty");
    }

    #[test]
    fn confidence_grows_with_consistent_evidence() {
        let params = ConfidenceParams::default();
        assert_eq!(confidence_score(0, 0, &params), 0.0);
        let few = confidence_score(2, 2, &params);
        let many = confidence_score(20, 20, &params);
        assert!(many > few);

        let consistent = confidence_score(10, 10, &params);
        let mixed = confidence_score(10, 5, &params);
        assert!(consistent > mixed);
    }

    #[test]
    fn status_follows_threshold() {
        let mastery = MasteryParams::default();
        let mut level = default_level();
        assert_eq!(mastery_status(&level, &mastery), MasteryStatus::Unassessed);

        level.total_attempts = 3;
        level.mastery_probability = 0.6;
        assert_eq!(mastery_status(&level, &mastery), MasteryStatus::Learning);

        level.mastery_probability = 0.97;
        assert_eq!(mastery_status(&level, &mastery), MasteryStatus::Mastered);
    }

    #[test]
    fn feedback_recalibrates_confidence_only() {
        let mut level = default_level();
        level.confidence_level = 0.5;
        level.mastery_probability = 0.4;

        let aligned = DifficultyFeedback {
            perceived_difficulty: 0.5,
            estimated_difficulty: 0.5,
            completion_time_minutes: 12,
            observed_success_rate: 0.7,
        };
        let up = apply_difficulty_feedback(&level, &aligned, &ConfidenceParams::default())
            .unwrap();
        assert!(up.confidence_level > level.confidence_level);
        assert!((up.mastery_probability - level.mastery_probability).abs() < 1e-12);

        let divergent = DifficultyFeedback {
            perceived_difficulty: 0.9,
            estimated_difficulty: 0.1,
            completion_time_minutes: 12,
            observed_success_rate: 0.2,
        };
        let down = apply_difficulty_feedback(&level, &divergent, &ConfidenceParams::default())
            .unwrap();
        assert!(down.confidence_level < level.confidence_level);
    }
}
