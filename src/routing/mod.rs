//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming Request (Host header or URI authority)
//!     → matcher.rs (strip port, lower-case, trim trailing dot)
//!     → router.rs (exact lookup in the active RouteTable)
//!     → Return: HostEntry or no match
//!
//! Route Compilation (on load and every reload):
//!     hosts: mapping from the config file
//!     → config::validation (field checks, duplicate detection)
//!     → RouteTable (insertion-ordered, immutable)
//! ```
//!
//! # Design Decisions
//! - Tables are immutable; a config edit always produces a new table
//! - Exact hostname match only, no wildcards
//! - Insertion order is kept because certificate fallback depends on it

pub mod matcher;
pub mod router;

pub use matcher::normalize_host;
pub use router::{Backend, HostEntry, Protocol, RouteTable, TlsPair};
