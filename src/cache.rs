//! Per-learner recommendation cache. A read past `expires_at` counts as a
//! miss and evicts the entry, so an expired sequence is never handed back.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rand::Rng;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{EngineError, Result};
use crate::types::ChallengeSequence;

const TTL_JITTER_RATIO: f64 = 0.1;

pub mod keys {
    pub fn sequence_key(learner_id: &str) -> String {
        format!("recs:{}:sequence", learner_id)
    }
}

#[async_trait]
pub trait RecommendationCache: Send + Sync {
    async fn get(&self, learner_id: &str) -> Result<Option<ChallengeSequence>>;

    async fn put(&self, sequence: &ChallengeSequence) -> Result<()>;

    async fn invalidate(&self, learner_id: &str) -> Result<()>;
}

#[derive(Default)]
pub struct InMemoryRecommendationCache {
    sequences: Mutex<HashMap<String, ChallengeSequence>>,
}

impl InMemoryRecommendationCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecommendationCache for InMemoryRecommendationCache {
    async fn get(&self, learner_id: &str) -> Result<Option<ChallengeSequence>> {
        let mut sequences = self.sequences.lock();
        match sequences.get(learner_id) {
            Some(sequence) if sequence.is_expired(Utc::now()) => {
                sequences.remove(learner_id);
                Ok(None)
            }
            Some(sequence) => Ok(Some(sequence.clone())),
            None => Ok(None),
        }
    }

    async fn put(&self, sequence: &ChallengeSequence) -> Result<()> {
        let mut sequences = self.sequences.lock();
        sequences.insert(sequence.learner_id.clone(), sequence.clone());
        Ok(())
    }

    async fn invalidate(&self, learner_id: &str) -> Result<()> {
        let mut sequences = self.sequences.lock();
        sequences.remove(learner_id);
        Ok(())
    }
}

/// Redis-backed cache so several service instances can share sequences
/// through the persistence boundary.
#[derive(Clone)]
pub struct RedisRecommendationCache {
    connection: MultiplexedConnection,
}

impl RedisRecommendationCache {
    pub fn new(connection: MultiplexedConnection) -> Self {
        Self { connection }
    }

    pub async fn connect(redis_url: &str) -> std::result::Result<Self, redis::RedisError> {
        let client = redis::Client::open(redis_url)?;
        let connection = client.get_multiplexed_tokio_connection().await?;
        Ok(Self::new(connection))
    }

    pub async fn is_connected(&self) -> bool {
        let mut conn = self.connection.clone();
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .is_ok()
    }

    async fn read_json<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: DeserializeOwned,
    {
        let mut conn = self.connection.clone();
        let payload: Option<String> = conn
            .get(key)
            .await
            .map_err(|err| EngineError::Persistence(err.to_string()))?;
        Ok(payload.and_then(|p| serde_json::from_str(&p).ok()))
    }

    async fn write_json<T>(&self, key: &str, value: &T, ttl: Duration) -> Result<()>
    where
        T: Serialize,
    {
        let payload = serde_json::to_string(value)
            .map_err(|err| EngineError::Persistence(err.to_string()))?;
        let mut conn = self.connection.clone();
        let ttl = apply_ttl_jitter(ttl);
        let ttl_secs = ttl.as_secs().max(1);
        conn.set_ex::<_, _, ()>(key, payload, ttl_secs)
            .await
            .map_err(|err| EngineError::Persistence(err.to_string()))
    }
}

#[async_trait]
impl RecommendationCache for RedisRecommendationCache {
    async fn get(&self, learner_id: &str) -> Result<Option<ChallengeSequence>> {
        let key = keys::sequence_key(learner_id);
        let sequence: Option<ChallengeSequence> = self.read_json(&key).await?;
        match sequence {
            Some(sequence) if sequence.is_expired(Utc::now()) => {
                self.invalidate(learner_id).await?;
                Ok(None)
            }
            other => Ok(other),
        }
    }

    async fn put(&self, sequence: &ChallengeSequence) -> Result<()> {
        let key = keys::sequence_key(&sequence.learner_id);
        let remaining = (sequence.expires_at - Utc::now()).num_seconds().max(1) as u64;
        self.write_json(&key, sequence, Duration::from_secs(remaining))
            .await
    }

    async fn invalidate(&self, learner_id: &str) -> Result<()> {
        let mut conn = self.connection.clone();
        conn.del::<_, u64>(keys::sequence_key(learner_id))
            .await
            .map_err(|err| EngineError::Persistence(err.to_string()))?;
        Ok(())
    }
}

fn apply_ttl_jitter(ttl: Duration) -> Duration {
    let base_ms = ttl.as_millis() as f64;
    let mut rng = rand::rng();
    let factor = rng.random_range(1.0 - TTL_JITTER_RATIO..=1.0 + TTL_JITTER_RATIO);
    let jittered_ms = (base_ms * factor).round().max(1.0);
    Duration::from_millis(jittered_ms as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        AdaptationContext, AdaptiveRecommendation, ChallengeMetadata, ChallengeType,
    };
    use chrono::Duration as ChronoDuration;
    use std::collections::HashSet;

    fn sequence(learner_id: &str, ttl_secs: u64) -> ChallengeSequence {
        ChallengeSequence::new(
            learner_id,
            AdaptiveRecommendation {
                challenge: ChallengeMetadata {
                    id: "c1".to_string(),
                    difficulty_level: 0.5,
                    skills: HashSet::from(["s1".to_string()]),
                    estimated_duration_minutes: 20,
                    challenge_type: ChallengeType::Quiz,
                    prerequisites: HashSet::new(),
                },
                recommendation_score: 0.8,
                reasoning: "test".to_string(),
                optimal_difficulty: 0.5,
            },
            vec![],
            AdaptationContext {
                goals: vec![],
                time_available_minutes: None,
                preferred_difficulty: None,
                competency_count: 1,
            },
            ttl_secs,
        )
    }

    #[tokio::test]
    async fn round_trip_and_invalidate() {
        let cache = InMemoryRecommendationCache::new();
        let seq = sequence("l1", 3600);
        cache.put(&seq).await.unwrap();

        let cached = cache.get("l1").await.unwrap().unwrap();
        assert_eq!(cached.sequence_id, seq.sequence_id);

        cache.invalidate("l1").await.unwrap();
        assert!(cache.get("l1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn expired_sequence_reads_as_miss() {
        let cache = InMemoryRecommendationCache::new();
        let mut seq = sequence("l1", 3600);
        seq.created_at = Utc::now() - ChronoDuration::hours(3);
        seq.expires_at = Utc::now() - ChronoDuration::hours(1);
        cache.put(&seq).await.unwrap();

        assert!(cache.get("l1").await.unwrap().is_none());
        // and the stale entry is evicted
        assert!(cache.sequences.lock().is_empty());
    }

    #[test]
    fn jitter_stays_within_ratio() {
        let base = Duration::from_secs(100);
        for _ in 0..50 {
            let jittered = apply_ttl_jitter(base).as_millis() as f64;
            assert!((89_000.0..=111_000.0).contains(&jittered));
        }
    }

    #[test]
    fn sequence_key_is_per_learner() {
        assert_eq!(keys::sequence_key("l1"), "recs:l1:sequence");
    }
}
