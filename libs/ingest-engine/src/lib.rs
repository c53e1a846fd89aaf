pub mod config;
pub mod engine;
pub mod error;
pub mod subscription;
pub mod topic;

pub use config::IngestConfig;
pub use engine::IngestEngine;
pub use error::EngineError;
