//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML) + environment overrides
//!     → loader.rs (parse, deserialize, apply env)
//!     → validation.rs (semantic checks)
//!     → GuardConfig (validated, immutable)
//!     → shared with the server, quota tracker, and pipeline
//!
//! On file change:
//!     watcher.rs sees an event for the config file
//!     → loader.rs loads and validates the new config
//!     → TierPolicy sent only when the quota tiers differ
//!     → quota tier policy swapped atomically
//! ```
//!
//! # Design Decisions
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - Only quota tiers hot-reload; routes and breakers need a restart

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, load_default, ConfigError};
pub use schema::{
    storefront_operations, GuardConfig, OperationConfig, QuotaConfig, TierConfig,
};
