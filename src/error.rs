use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("parameter out of range: {0}")]
    InvalidParameter(String),

    #[error("no eligible challenges match the current prerequisites and time budget; relax the constraints and retry")]
    NoEligibleChallenges,

    #[error("competency record was modified concurrently; retry with fresh state")]
    StaleCompetencyWrite,

    #[error("persistence unavailable: {0}")]
    Persistence(String),

    #[error("challenge not found: {0}")]
    ChallengeNotFound(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;
