// src/config/mod.rs
pub mod validator;

pub use validator::{
    FetcherConfig, ModelConfig, StorageConfig, ValidatorConfig, WorkflowConfig,
    DEFAULT_CONFIG_PATH, ENV_CONFIG_PATH,
};
