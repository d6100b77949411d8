//! Facade wiring the BKT tracker, the adaptive scorer, the competency store
//! and the recommendation cache together.
//!
//! Requests for different learners run fully in parallel. Within one learner,
//! competency writes go through compare-and-swap with bounded retries so
//! concurrent submissions never lose an update, and the cache entry is
//! invalidated only after every write has committed.

use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;

use crate::bkt;
use crate::cache::RecommendationCache;
use crate::config::{EngineConfig, RetryConfig};
use crate::error::{EngineError, Result};
use crate::recommend::AdaptiveEngine;
use crate::store::{CandidateFilter, CompetencyStore, ContentCatalog};
use crate::types::{
    ActivityResult, ChallengeSequence, ChallengeType, CompetencyLevel, DifficultyFeedback,
    MasteryStatus,
};

const RECENT_TYPE_WINDOW: usize = 10;

pub struct LearningEngine {
    store: Arc<dyn CompetencyStore>,
    catalog: Arc<dyn ContentCatalog>,
    cache: Arc<dyn RecommendationCache>,
    adaptive: AdaptiveEngine,
    config: EngineConfig,
    recent_types: Mutex<HashMap<String, VecDeque<ChallengeType>>>,
}

impl LearningEngine {
    pub fn new(
        store: Arc<dyn CompetencyStore>,
        catalog: Arc<dyn ContentCatalog>,
        cache: Arc<dyn RecommendationCache>,
        config: EngineConfig,
    ) -> Self {
        Self {
            adaptive: AdaptiveEngine::new(config.clone()),
            store,
            catalog,
            cache,
            config,
            recent_types: Mutex::new(HashMap::new()),
        }
    }

    /// Applies one BKT update per addressed skill, persists the new levels,
    /// then invalidates the learner's cached sequence. Unknown challenge ids
    /// are rejected before any write. Once accepted the
    /// updates run to completion; there is no cancellation point between the
    /// read and the committed write of a skill.
    pub async fn submit_activity_result(
        &self,
        result: &ActivityResult,
        feedback: Option<&DifficultyFeedback>,
    ) -> Result<Vec<CompetencyLevel>> {
        if result.skills.is_empty() {
            return Err(EngineError::InvalidParameter(
                "activity result must address at least one skill".to_string(),
            ));
        }
        bkt::validate_unit("score", result.score)?;

        // resolve the challenge before any competency write so an unknown id
        // rejects the whole submission
        let challenge = with_store_retries(&self.config.retry, || {
            self.catalog.get_challenge(&result.challenge_id)
        })
        .await?
        .ok_or_else(|| EngineError::ChallengeNotFound(result.challenge_id.clone()))?;

        let mut skills: Vec<&String> = result.skills.iter().collect();
        skills.sort();

        let mut updated_levels = Vec::with_capacity(skills.len());
        for skill in skills {
            updated_levels.push(self.update_skill(result, skill, feedback).await?);
        }

        self.record_attempted_type(&result.learner_id, challenge.challenge_type);

        // invalidation is ordered strictly after the competency writes commit
        with_store_retries(&self.config.retry, || {
            self.cache.invalidate(&result.learner_id)
        })
        .await?;

        tracing::debug!(
            learner_id = %result.learner_id,
            challenge_id = %result.challenge_id,
            skills = updated_levels.len(),
            "competencies updated, cached sequence invalidated"
        );
        Ok(updated_levels)
    }

    /// Returns the cached sequence while it is fresh, otherwise regenerates
    /// through the adaptive scorer. Generation has no side effects until the
    /// sequence is cached, so callers may cancel freely.
    pub async fn get_recommendations(
        &self,
        learner_id: &str,
        goals: &[String],
        time_available_minutes: Option<u32>,
        preferred_difficulty: Option<f64>,
    ) -> Result<ChallengeSequence> {
        if let Some(preferred) = preferred_difficulty {
            bkt::validate_unit("preferred_difficulty", preferred)?;
        }

        match self.cache.get(learner_id).await {
            Ok(Some(sequence)) if !sequence.is_expired(Utc::now()) => {
                tracing::debug!(learner_id, sequence_id = %sequence.sequence_id, "serving cached sequence");
                return Ok(sequence);
            }
            Ok(_) => {}
            Err(err) => {
                tracing::warn!(learner_id, error = %err, "cache read failed, regenerating");
            }
        }

        let competencies = with_store_retries(&self.config.retry, || {
            self.store.list_competencies(learner_id)
        })
        .await?;
        let by_skill: HashMap<String, CompetencyLevel> = competencies
            .into_iter()
            .map(|c| (c.skill_id.clone(), c))
            .collect();

        let filter = CandidateFilter {
            skills: None,
            max_duration_minutes: time_available_minutes,
            challenge_type: None,
        };
        let candidates =
            with_store_retries(&self.config.retry, || self.catalog.get_candidates(&filter))
                .await?;

        let recent = self
            .recent_types
            .lock()
            .get(learner_id)
            .map(|history| history.iter().copied().collect::<HashSet<_>>())
            .unwrap_or_default();

        let sequence = self.adaptive.generate_recommendations(
            learner_id,
            &by_skill,
            &candidates,
            goals,
            time_available_minutes,
            preferred_difficulty,
            &recent,
        )?;

        if let Err(err) = self.cache.put(&sequence).await {
            tracing::warn!(learner_id, error = %err, "failed to cache generated sequence");
        }
        tracing::debug!(
            learner_id,
            sequence_id = %sequence.sequence_id,
            alternatives = sequence.alternatives.len(),
            "generated recommendation sequence"
        );
        Ok(sequence)
    }

    pub async fn get_optimal_difficulty(
        &self,
        learner_id: &str,
        skill_id: &str,
        target_success_rate: Option<f64>,
    ) -> Result<f64> {
        let level = self.load_or_default(learner_id, skill_id).await?;
        let target = target_success_rate.unwrap_or(self.config.search.target_success_rate);
        bkt::calculate_optimal_difficulty(&level, target, &self.config.search)
    }

    pub async fn get_mastery_status(
        &self,
        learner_id: &str,
        skill_id: &str,
    ) -> Result<MasteryStatus> {
        let level = self.load_or_default(learner_id, skill_id).await?;
        Ok(bkt::mastery_status(&level, &self.config.mastery))
    }

    /// Recalibrates confidence from learner-perceived difficulty and drops
    /// the cached sequence. Mastery probability is untouched.
    pub async fn submit_difficulty_feedback(
        &self,
        learner_id: &str,
        skill_id: &str,
        feedback: &DifficultyFeedback,
    ) -> Result<CompetencyLevel> {
        let retry = self.config.retry.clone();
        let mut saved = None;
        for attempt in 0..=retry.cas_retries {
            let current = self.load_or_default(learner_id, skill_id).await?;
            let updated = bkt::apply_difficulty_feedback(&current, feedback, &self.config.confidence)?;
            match with_store_retries(&retry, || {
                self.store.put_competency(&updated, current.version)
            })
            .await
            {
                Ok(level) => {
                    saved = Some(level);
                    break;
                }
                Err(EngineError::StaleCompetencyWrite) if attempt < retry.cas_retries => {
                    tracing::debug!(learner_id, skill_id, attempt, "stale feedback write, retrying");
                }
                Err(err) => return Err(err),
            }
        }
        let level = saved.ok_or(EngineError::StaleCompetencyWrite)?;

        with_store_retries(&retry, || self.cache.invalidate(learner_id)).await?;
        Ok(level)
    }

    async fn update_skill(
        &self,
        result: &ActivityResult,
        skill: &str,
        feedback: Option<&DifficultyFeedback>,
    ) -> Result<CompetencyLevel> {
        let retry = self.config.retry.clone();
        for attempt in 0..=retry.cas_retries {
            let current = self.load_or_default(&result.learner_id, skill).await?;

            let mut updated = bkt::update_competency(&current, result, &self.config.confidence)?;
            if let Some(fb) = feedback {
                updated = bkt::apply_difficulty_feedback(&updated, fb, &self.config.confidence)?;
            }

            match with_store_retries(&retry, || {
                self.store.put_competency(&updated, current.version)
            })
            .await
            {
                Ok(saved) => return Ok(saved),
                Err(EngineError::StaleCompetencyWrite) if attempt < retry.cas_retries => {
                    tracing::debug!(
                        learner_id = %result.learner_id,
                        skill,
                        attempt,
                        "stale competency write, retrying with fresh state"
                    );
                }
                Err(err) => return Err(err),
            }
        }
        Err(EngineError::StaleCompetencyWrite)
    }

    async fn load_or_default(&self, learner_id: &str, skill_id: &str) -> Result<CompetencyLevel> {
        let existing = with_store_retries(&self.config.retry, || {
            self.store.get_competency(learner_id, skill_id)
        })
        .await?;
        Ok(existing
            .unwrap_or_else(|| CompetencyLevel::unassessed(learner_id, skill_id, &self.config.bkt)))
    }

    fn record_attempted_type(&self, learner_id: &str, challenge_type: ChallengeType) {
        let mut recent = self.recent_types.lock();
        let history = recent.entry(learner_id.to_string()).or_default();
        history.push_back(challenge_type);
        while history.len() > RECENT_TYPE_WINDOW {
            history.pop_front();
        }
    }
}

/// Bounded exponential backoff around transient store failures. Validation
/// and conflict errors pass through untouched.
async fn with_store_retries<T, F, Fut>(retry: &RetryConfig, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut delay = Duration::from_millis(retry.backoff_base_ms.max(1));
    let mut attempt = 1u32;
    loop {
        match op().await {
            Err(EngineError::Persistence(message)) if attempt < retry.store_attempts => {
                tracing::warn!(attempt, error = %message, "store operation failed, backing off");
                tokio::time::sleep(delay).await;
                delay = delay.saturating_mul(2);
                attempt += 1;
            }
            other => return other,
        }
    }
}
