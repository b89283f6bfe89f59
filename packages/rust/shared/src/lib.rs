//! Shared types, error model, and configuration for the hearings workspace.
//!
//! This crate is the foundation depended on by all other hearings crates.
//! It provides:
//! - [`HarvestError`]: the unified error type
//! - Domain types ([`SessionId`], [`SessionDescriptor`], [`FetchOutcome`], [`LedgerEntry`])
//! - Configuration ([`AppConfig`], [`HarvestConfig`], [`RetryPolicy`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    ApiConfig, AppConfig, HarvestConfig, HarvestDefaults, RetryConfig, RetryPolicy, TopicsConfig,
    config_dir, config_file_path, init_config, init_config_at, load_config, load_config_from,
};
pub use error::{HarvestError, Result};
pub use types::{
    CURRENT_SCHEMA_VERSION, FetchOutcome, LedgerEntry, OutcomeKind, SessionDescriptor, SessionId,
};
