//! Shared proxy state.
//!
//! # Data Flow
//! ```text
//! config file
//!     → snapshot.rs (load → validate → load certificates)
//!     → ActiveSnapshot { generation, config, routes, certs }
//!     → store.rs (ConfigStore::commit, one atomic swap)
//!
//! Readers (dispatchers, certificate resolver):
//!     ConfigStore::current() → Arc<ActiveSnapshot>, held for the request
//! ```
//!
//! # Design Decisions
//! - The watcher is the only writer; everything else reads
//! - Routes and certificates live in one snapshot so they can never disagree

pub mod snapshot;
pub mod store;

pub use snapshot::{
    build_snapshot, config_dir, global_tls, load_snapshot, referenced_files, ActiveSnapshot,
    SnapshotError,
};
pub use store::ConfigStore;
