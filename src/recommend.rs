//! Multi-criteria challenge scoring and sequencing.
//!
//! Candidates that satisfy prerequisites and the time budget are ranked by a
//! weighted sum of five sub-scores, each normalized to [0, 1]. Scoring is
//! pure: identical competency snapshots and candidate sets always produce the
//! same ranking.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use crate::bkt;
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::types::{
    AdaptationContext, AdaptiveRecommendation, ChallengeMetadata, ChallengeSequence,
    ChallengeType, CompetencyLevel,
};

#[derive(Debug, Clone, Copy)]
struct ScoreParts {
    competency: f64,
    goal: f64,
    difficulty: f64,
    time: f64,
    variety: f64,
}

struct ScoredCandidate {
    challenge: ChallengeMetadata,
    score: f64,
    optimal_difficulty: f64,
    confidence: f64,
    parts: ScoreParts,
    goal_matches: usize,
}

pub struct AdaptiveEngine {
    config: EngineConfig,
}

impl AdaptiveEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    pub fn generate_recommendations(
        &self,
        learner_id: &str,
        competencies: &HashMap<String, CompetencyLevel>,
        candidates: &[ChallengeMetadata],
        goals: &[String],
        time_available_minutes: Option<u32>,
        preferred_difficulty: Option<f64>,
        recent_types: &HashSet<ChallengeType>,
    ) -> Result<ChallengeSequence> {
        if let Some(preferred) = preferred_difficulty {
            bkt::validate_unit("preferred_difficulty", preferred)?;
        }

        let mut scored = Vec::new();
        for candidate in candidates {
            if !self.prerequisites_met(competencies, candidate) {
                continue;
            }
            if let Some(budget) = time_available_minutes {
                if candidate.estimated_duration_minutes > budget {
                    continue;
                }
            }
            scored.push(self.score_candidate(
                learner_id,
                competencies,
                candidate,
                goals,
                time_available_minutes,
                preferred_difficulty,
                recent_types,
            )?);
        }

        if scored.is_empty() {
            return Err(EngineError::NoEligibleChallenges);
        }

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| {
                    b.confidence
                        .partial_cmp(&a.confidence)
                        .unwrap_or(Ordering::Equal)
                })
                .then_with(|| {
                    a.challenge
                        .estimated_duration_minutes
                        .cmp(&b.challenge.estimated_duration_minutes)
                })
                .then_with(|| a.challenge.id.cmp(&b.challenge.id))
        });

        let context = AdaptationContext {
            goals: goals.to_vec(),
            time_available_minutes,
            preferred_difficulty,
            competency_count: competencies.len(),
        };

        let mut recommendations = scored
            .into_iter()
            .map(|c| self.into_recommendation(c, goals, time_available_minutes));
        let primary = recommendations
            .next()
            .ok_or(EngineError::NoEligibleChallenges)?;
        let alternatives: Vec<_> = recommendations
            .take(self.config.sequencing.alternatives)
            .collect();

        Ok(ChallengeSequence::new(
            learner_id,
            primary,
            alternatives,
            context,
            self.config.sequencing.ttl_secs,
        ))
    }

    fn prerequisites_met(
        &self,
        competencies: &HashMap<String, CompetencyLevel>,
        candidate: &ChallengeMetadata,
    ) -> bool {
        candidate.prerequisites.iter().all(|skill| {
            competencies
                .get(skill)
                .map(|c| c.mastery_probability >= self.config.mastery.prerequisite_floor)
                .unwrap_or(false)
        })
    }

    fn level_for(
        &self,
        competencies: &HashMap<String, CompetencyLevel>,
        learner_id: &str,
        skill: &str,
    ) -> CompetencyLevel {
        competencies
            .get(skill)
            .cloned()
            .unwrap_or_else(|| CompetencyLevel::unassessed(learner_id, skill, &self.config.bkt))
    }

    #[allow(clippy::too_many_arguments)]
    fn score_candidate(
        &self,
        learner_id: &str,
        competencies: &HashMap<String, CompetencyLevel>,
        candidate: &ChallengeMetadata,
        goals: &[String],
        time_available_minutes: Option<u32>,
        preferred_difficulty: Option<f64>,
        recent_types: &HashSet<ChallengeType>,
    ) -> Result<ScoredCandidate> {
        let scoring = &self.config.scoring;

        let (optimal_difficulty, confidence) = if candidate.skills.is_empty() {
            (self.config.search.band_center, 0.0)
        } else {
            let mut optimal_sum = 0.0;
            let mut confidence_sum = 0.0;
            for skill in &candidate.skills {
                let level = self.level_for(competencies, learner_id, skill);
                optimal_sum += bkt::calculate_optimal_difficulty(
                    &level,
                    self.config.search.target_success_rate,
                    &self.config.search,
                )?;
                confidence_sum += level.confidence_level;
            }
            let n = candidate.skills.len() as f64;
            (optimal_sum / n, confidence_sum / n)
        };

        let competency = gaussian_closeness(
            candidate.difficulty_level,
            optimal_difficulty,
            scoring.alignment_sigma,
        );

        let goal_matches = candidate
            .skills
            .iter()
            .filter(|skill| goals.iter().any(|g| g == *skill))
            .count();
        let goal = if goals.is_empty() || candidate.skills.is_empty() {
            0.5
        } else {
            goal_matches as f64 / candidate.skills.len() as f64
        };

        let difficulty_target = preferred_difficulty.unwrap_or(optimal_difficulty);
        let difficulty = gaussian_closeness(
            candidate.difficulty_level,
            difficulty_target,
            scoring.alignment_sigma,
        );

        let time = match time_available_minutes {
            None => 1.0,
            Some(budget) if budget == 0 => 0.0,
            Some(budget) => {
                let ratio = candidate.estimated_duration_minutes as f64 / budget as f64;
                ((1.0 - ratio) / (1.0 - scoring.time_comfort_ratio)).clamp(0.0, 1.0)
            }
        };

        let variety = if recent_types.contains(&candidate.challenge_type) {
            0.0
        } else {
            1.0
        };

        let parts = ScoreParts {
            competency,
            goal,
            difficulty,
            time,
            variety,
        };
        let w = &scoring.weights;
        let score = (w.competency * parts.competency
            + w.goal * parts.goal
            + w.difficulty * parts.difficulty
            + w.time * parts.time
            + w.variety * parts.variety)
            .clamp(0.0, 1.0);

        Ok(ScoredCandidate {
            challenge: candidate.clone(),
            score,
            optimal_difficulty,
            confidence,
            parts,
            goal_matches,
        })
    }

    fn into_recommendation(
        &self,
        candidate: ScoredCandidate,
        goals: &[String],
        time_available_minutes: Option<u32>,
    ) -> AdaptiveRecommendation {
        let reasoning = self.reasoning_for(&candidate, goals, time_available_minutes);
        AdaptiveRecommendation {
            recommendation_score: candidate.score,
            optimal_difficulty: candidate.optimal_difficulty,
            reasoning,
            challenge: candidate.challenge,
        }
    }

    fn reasoning_for(
        &self,
        candidate: &ScoredCandidate,
        goals: &[String],
        time_available_minutes: Option<u32>,
    ) -> String {
        let w = &self.config.scoring.weights;
        let parts = &candidate.parts;
        let contributions = [
            (w.competency * parts.competency, 0),
            (w.goal * parts.goal, 1),
            (w.difficulty * parts.difficulty, 2),
            (w.time * parts.time, 3),
            (w.variety * parts.variety, 4),
        ];
        let dominant = contributions
            .iter()
            .max_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal))
            .map(|(_, idx)| *idx)
            .unwrap_or(0);

        match dominant {
            0 => format!(
                "difficulty {:.2} sits close to the optimal {:.2} for the skills it develops",
                candidate.challenge.difficulty_level, candidate.optimal_difficulty
            ),
            1 => format!(
                "develops {} of your {} stated goals",
                candidate.goal_matches,
                goals.len()
            ),
            2 => format!(
                "matches the requested difficulty around {:.2}",
                candidate.challenge.difficulty_level
            ),
            3 => match time_available_minutes {
                Some(budget) => format!(
                    "its {} minutes fit comfortably within the {} available",
                    candidate.challenge.estimated_duration_minutes, budget
                ),
                None => "fits without any time pressure".to_string(),
            },
            _ => format!(
                "adds variety with a {} challenge you have not tried recently",
                candidate.challenge.challenge_type.as_str()
            ),
        }
    }
}

fn gaussian_closeness(value: f64, center: f64, sigma: f64) -> f64 {
    let sigma = sigma.max(1e-6);
    let distance = value - center;
    (-distance.powi(2) / (2.0 * sigma.powi(2))).exp()
}
