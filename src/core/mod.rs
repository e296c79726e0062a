pub mod config;

pub use config::{
    CacheConfig, DEFAULT_MAX_CALCULATION_ITERATIONS, DEFAULT_TERMINOLOGY_SERVER_URL, EngineConfig,
};
