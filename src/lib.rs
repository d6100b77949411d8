pub mod bkt;
pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod logging;
pub mod recommend;
pub mod store;
pub mod types;

pub use config::EngineConfig;
pub use engine::LearningEngine;
pub use error::{EngineError, Result};
