use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::BktParams;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChallengeType {
    Quiz,
    Scenario,
    Simulation,
    CaseStudy,
    Project,
}

impl ChallengeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Quiz => "quiz",
            Self::Scenario => "scenario",
            Self::Simulation => "simulation",
            Self::CaseStudy => "casestudy",
            Self::Project => "project",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "quiz" => Some(Self::Quiz),
            "scenario" => Some(Self::Scenario),
            "simulation" => Some(Self::Simulation),
            "casestudy" | "case_study" => Some(Self::CaseStudy),
            "project" => Some(Self::Project),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MasteryStatus {
    Unassessed,
    Learning,
    Mastered,
}

/// Per-(learner, skill) mastery belief. Created lazily on first evidence,
/// mutated only by the BKT update, never deleted. `version` is the
/// optimistic-concurrency stamp bumped by the store on every committed write.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompetencyLevel {
    pub learner_id: String,
    pub skill_id: String,
    pub mastery_probability: f64,
    pub confidence_level: f64,
    pub prior_knowledge: f64,
    pub learning_rate: f64,
    pub slip_probability: f64,
    pub guess_probability: f64,
    pub total_attempts: u32,
    pub correct_attempts: u32,
    pub last_updated: DateTime<Utc>,
    pub version: u64,
}

impl CompetencyLevel {
    pub fn unassessed(learner_id: &str, skill_id: &str, defaults: &BktParams) -> Self {
        Self {
            learner_id: learner_id.to_string(),
            skill_id: skill_id.to_string(),
            mastery_probability: defaults.prior_knowledge,
            confidence_level: 0.0,
            prior_knowledge: defaults.prior_knowledge,
            learning_rate: defaults.learning_rate,
            slip_probability: defaults.slip_probability,
            guess_probability: defaults.guess_probability,
            total_attempts: 0,
            correct_attempts: 0,
            last_updated: Utc::now(),
            version: 0,
        }
    }
}

/// Challenge descriptor owned by the content-management collaborator.
/// Immutable once published; this crate only reads it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeMetadata {
    pub id: String,
    pub difficulty_level: f64,
    pub skills: HashSet<String>,
    pub estimated_duration_minutes: u32,
    pub challenge_type: ChallengeType,
    pub prerequisites: HashSet<String>,
}

/// One completed activity. Triggers exactly one competency update per
/// addressed skill.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityResult {
    pub learner_id: String,
    pub challenge_id: String,
    pub skills: HashSet<String>,
    pub success: bool,
    pub score: f64,
    pub attempts: u32,
    pub time_spent_minutes: u32,
}

/// Learner-perceived vs. system-estimated difficulty. Recalibrates
/// `confidence_level` only; mastery is never touched by feedback.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DifficultyFeedback {
    pub perceived_difficulty: f64,
    pub estimated_difficulty: f64,
    pub completion_time_minutes: u32,
    pub observed_success_rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdaptiveRecommendation {
    pub challenge: ChallengeMetadata,
    pub recommendation_score: f64,
    pub reasoning: String,
    pub optimal_difficulty: f64,
}

/// Snapshot of the inputs a sequence was generated from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdaptationContext {
    pub goals: Vec<String>,
    pub time_available_minutes: Option<u32>,
    pub preferred_difficulty: Option<f64>,
    pub competency_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeSequence {
    pub learner_id: String,
    pub sequence_id: Uuid,
    pub primary: AdaptiveRecommendation,
    pub alternatives: Vec<AdaptiveRecommendation>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub adaptation_context: AdaptationContext,
}

impl ChallengeSequence {
    pub fn new(
        learner_id: &str,
        primary: AdaptiveRecommendation,
        alternatives: Vec<AdaptiveRecommendation>,
        adaptation_context: AdaptationContext,
        ttl_secs: u64,
    ) -> Self {
        let created_at = Utc::now();
        // expires_at must lie strictly after created_at
        let ttl = Duration::seconds((ttl_secs.max(1)) as i64);
        Self {
            learner_id: learner_id.to_string(),
            sequence_id: Uuid::new_v4(),
            primary,
            alternatives,
            created_at,
            expires_at: created_at + ttl,
            adaptation_context,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}
