//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → TenConfig (validated, immutable)
//!     → handed to the engine, fee estimator and token cache
//! ```
//!
//! # Design Decisions
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::{
    FeeConfig, NetworkConfig, ObservabilityConfig, PollingConfig, SessionSettings, TenConfig,
    TokenConfig,
};
