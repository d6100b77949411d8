//! Persistence-agnostic repositories for competency records and the content
//! catalog. Writes use compare-and-swap on the record version so concurrent
//! updates for one learner surface as `StaleCompetencyWrite` instead of lost
//! updates.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::{EngineError, Result};
use crate::types::{ChallengeMetadata, ChallengeType, CompetencyLevel};

#[derive(Debug, Clone, Default)]
pub struct CandidateFilter {
    pub skills: Option<HashSet<String>>,
    pub max_duration_minutes: Option<u32>,
    pub challenge_type: Option<ChallengeType>,
}

#[async_trait]
pub trait CompetencyStore: Send + Sync {
    async fn get_competency(
        &self,
        learner_id: &str,
        skill_id: &str,
    ) -> Result<Option<CompetencyLevel>>;

    async fn list_competencies(&self, learner_id: &str) -> Result<Vec<CompetencyLevel>>;

    /// Commits `level` only when the stored version still equals
    /// `expected_version` (0 for a record that does not exist yet). Returns
    /// the stored record with its bumped version.
    async fn put_competency(
        &self,
        level: &CompetencyLevel,
        expected_version: u64,
    ) -> Result<CompetencyLevel>;
}

#[async_trait]
pub trait ContentCatalog: Send + Sync {
    async fn get_challenge(&self, id: &str) -> Result<Option<ChallengeMetadata>>;

    async fn get_candidates(&self, filter: &CandidateFilter) -> Result<Vec<ChallengeMetadata>>;
}

#[derive(Default)]
pub struct InMemoryCompetencyStore {
    records: RwLock<HashMap<(String, String), CompetencyLevel>>,
}

impl InMemoryCompetencyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CompetencyStore for InMemoryCompetencyStore {
    async fn get_competency(
        &self,
        learner_id: &str,
        skill_id: &str,
    ) -> Result<Option<CompetencyLevel>> {
        let records = self.records.read();
        Ok(records
            .get(&(learner_id.to_string(), skill_id.to_string()))
            .cloned())
    }

    async fn list_competencies(&self, learner_id: &str) -> Result<Vec<CompetencyLevel>> {
        let records = self.records.read();
        let mut out: Vec<_> = records
            .iter()
            .filter(|((learner, _), _)| learner == learner_id)
            .map(|(_, level)| level.clone())
            .collect();
        out.sort_by(|a, b| a.skill_id.cmp(&b.skill_id));
        Ok(out)
    }

    async fn put_competency(
        &self,
        level: &CompetencyLevel,
        expected_version: u64,
    ) -> Result<CompetencyLevel> {
        let mut records = self.records.write();
        let key = (level.learner_id.clone(), level.skill_id.clone());
        let current_version = records.get(&key).map(|r| r.version).unwrap_or(0);
        if current_version != expected_version {
            return Err(EngineError::StaleCompetencyWrite);
        }
        let mut stored = level.clone();
        stored.version = current_version + 1;
        records.insert(key, stored.clone());
        Ok(stored)
    }
}

#[derive(Default)]
pub struct InMemoryCatalog {
    challenges: RwLock<HashMap<String, ChallengeMetadata>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, challenge: ChallengeMetadata) {
        let mut challenges = self.challenges.write();
        challenges.insert(challenge.id.clone(), challenge);
    }
}

#[async_trait]
impl ContentCatalog for InMemoryCatalog {
    async fn get_challenge(&self, id: &str) -> Result<Option<ChallengeMetadata>> {
        let challenges = self.challenges.read();
        Ok(challenges.get(id).cloned())
    }

    async fn get_candidates(&self, filter: &CandidateFilter) -> Result<Vec<ChallengeMetadata>> {
        let challenges = self.challenges.read();
        let mut out: Vec<_> = challenges
            .values()
            .filter(|c| {
                if let Some(skills) = &filter.skills {
                    if c.skills.is_disjoint(skills) {
                        return false;
                    }
                }
                if let Some(max) = filter.max_duration_minutes {
                    if c.estimated_duration_minutes > max {
                        return false;
                    }
                }
                if let Some(challenge_type) = filter.challenge_type {
                    if c.challenge_type != challenge_type {
                        return false;
                    }
                }
                true
            })
            .cloned()
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BktParams;

    fn level(learner: &str, skill: &str) -> CompetencyLevel {
        CompetencyLevel::unassessed(learner, skill, &BktParams::default())
    }

    #[tokio::test]
    async fn put_bumps_version_and_detects_conflicts() {
        let store = InMemoryCompetencyStore::new();
        let first = store.put_competency(&level("l1", "s1"), 0).await.unwrap();
        assert_eq!(first.version, 1);

        // writer holding the old version loses
        let err = store.put_competency(&level("l1", "s1"), 0).await.unwrap_err();
        assert!(matches!(err, EngineError::StaleCompetencyWrite));

        let second = store.put_competency(&first, first.version).await.unwrap();
        assert_eq!(second.version, 2);
    }

    #[tokio::test]
    async fn list_is_scoped_to_learner() {
        let store = InMemoryCompetencyStore::new();
        store.put_competency(&level("l1", "s1"), 0).await.unwrap();
        store.put_competency(&level("l1", "s2"), 0).await.unwrap();
        store.put_competency(&level("l2", "s1"), 0).await.unwrap();

        let listed = store.list_competencies("l1").await.unwrap();
        assert_eq!(listed.len(), 2);
        assert!(listed.iter().all(|c| c.learner_id == "l1"));
    }

    #[tokio::test]
    async fn catalog_filters_by_skill_and_duration() {
        let catalog = InMemoryCatalog::new();
        catalog.publish(ChallengeMetadata {
            id: "c1".to_string(),
            difficulty_level: 0.4,
            skills: HashSet::from(["planning".to_string()]),
            estimated_duration_minutes: 30,
            challenge_type: ChallengeType::Quiz,
            prerequisites: HashSet::new(),
        });
        catalog.publish(ChallengeMetadata {
            id: "c2".to_string(),
            difficulty_level: 0.6,
            skills: HashSet::from(["budgeting".to_string()]),
            estimated_duration_minutes: 60,
            challenge_type: ChallengeType::Scenario,
            prerequisites: HashSet::new(),
        });

        let filter = CandidateFilter {
            skills: Some(HashSet::from(["planning".to_string()])),
            max_duration_minutes: Some(45),
            challenge_type: None,
        };
        let found = catalog.get_candidates(&filter).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "c1");
    }
}
