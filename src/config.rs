use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BktParams {
    pub prior_knowledge: f64,
    pub learning_rate: f64,
    pub slip_probability: f64,
    pub guess_probability: f64,
}

impl Default for BktParams {
    fn default() -> Self {
        Self {
            prior_knowledge: 0.1,
            learning_rate: 0.3,
            slip_probability: 0.1,
            guess_probability: 0.2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MasteryParams {
    pub mastery_threshold: f64,
    pub prerequisite_floor: f64,
}

impl Default for MasteryParams {
    fn default() -> Self {
        Self {
            mastery_threshold: 0.95,
            prerequisite_floor: 0.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DifficultySearch {
    pub target_success_rate: f64,
    pub tolerance: f64,
    pub max_iterations: u32,
    pub band_center: f64,
}

impl Default for DifficultySearch {
    fn default() -> Self {
        Self {
            target_success_rate: 0.7,
            tolerance: 0.01,
            max_iterations: 30,
            band_center: 0.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreWeights {
    pub competency: f64,
    pub goal: f64,
    pub difficulty: f64,
    pub time: f64,
    pub variety: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            competency: 0.40,
            goal: 0.25,
            difficulty: 0.20,
            time: 0.10,
            variety: 0.05,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringConfig {
    pub weights: ScoreWeights,
    pub alignment_sigma: f64,
    pub time_comfort_ratio: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            weights: ScoreWeights::default(),
            alignment_sigma: 0.2,
            time_comfort_ratio: 0.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequencingConfig {
    pub alternatives: usize,
    pub ttl_secs: u64,
}

impl Default for SequencingConfig {
    fn default() -> Self {
        Self {
            alternatives: 4,
            ttl_secs: 2 * 60 * 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub cas_retries: u32,
    pub store_attempts: u32,
    pub backoff_base_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            cas_retries: 3,
            store_attempts: 3,
            backoff_base_ms: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfidenceParams {
    pub attempt_scale: f64,
    pub dispersion_damping: f64,
    pub feedback_gain: f64,
}

impl Default for ConfidenceParams {
    fn default() -> Self {
        Self {
            attempt_scale: 5.0,
            dispersion_damping: 0.5,
            feedback_gain: 0.2,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    pub bkt: BktParams,
    pub mastery: MasteryParams,
    pub search: DifficultySearch,
    pub scoring: ScoringConfig,
    pub sequencing: SequencingConfig,
    pub retry: RetryConfig,
    pub confidence: ConfidenceParams,
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("SKILLFORGE_MASTERY_THRESHOLD") {
            if let Ok(parsed) = val.parse::<f64>() {
                config.mastery.mastery_threshold = parsed.clamp(0.0, 1.0);
            }
        }
        if let Ok(val) = std::env::var("SKILLFORGE_TARGET_SUCCESS_RATE") {
            if let Ok(parsed) = val.parse::<f64>() {
                config.search.target_success_rate = parsed.clamp(0.0, 1.0);
            }
        }
        if let Ok(val) = std::env::var("SKILLFORGE_SEQUENCE_TTL_SECS") {
            if let Ok(parsed) = val.parse::<u64>() {
                config.sequencing.ttl_secs = parsed.max(1);
            }
        }
        if let Ok(val) = std::env::var("SKILLFORGE_CAS_RETRIES") {
            if let Ok(parsed) = val.parse::<u32>() {
                config.retry.cas_retries = parsed;
            }
        }
        if let Ok(val) = std::env::var("SKILLFORGE_STORE_ATTEMPTS") {
            if let Ok(parsed) = val.parse::<u32>() {
                config.retry.store_attempts = parsed.max(1);
            }
        }

        config
    }
}
