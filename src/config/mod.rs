//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (YAML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks, compile RouteTable)
//!     → state::build_snapshot (load certificates)
//!     → ConfigStore::commit
//!
//! On change:
//!     watcher.rs notices (notify event or poll, confirmed by fingerprint.rs)
//!     → debounce
//!     → same pipeline as startup
//!     → commit, or reject and keep the active snapshot
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require full reload
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod fingerprint;
pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, ConfigError};
pub use schema::{HostConfig, LogFormat, ObservabilityConfig, ProxyConfig, ReloadConfig, TimeoutConfig};
pub use validation::{validate_config, ValidationError};
pub use watcher::{ConfigWatcher, ReloadOutcome, ReloadTrigger};
