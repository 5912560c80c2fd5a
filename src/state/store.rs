//! Atomically swappable holder of the active snapshot.

use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::state::snapshot::ActiveSnapshot;

/// Lock-free store for the [`ActiveSnapshot`] readers dispatch against.
///
/// Readers call [`current`](Self::current) and keep the returned `Arc` for as
/// long as they need it; a concurrent [`commit`](Self::commit) never changes
/// what they hold. Old generations are freed when their last reader drops them.
#[derive(Debug)]
pub struct ConfigStore {
    active: ArcSwap<ActiveSnapshot>,
}

impl ConfigStore {
    pub fn new(initial: ActiveSnapshot) -> Self {
        Self {
            active: ArcSwap::from_pointee(initial),
        }
    }

    /// The active snapshot. Never blocks.
    pub fn current(&self) -> Arc<ActiveSnapshot> {
        self.active.load_full()
    }

    /// Make `candidate` active, returning the snapshot it replaced.
    pub fn commit(&self, candidate: ActiveSnapshot) -> Arc<ActiveSnapshot> {
        self.active.swap(Arc::new(candidate))
    }

    /// Generation of the active snapshot.
    pub fn generation(&self) -> u64 {
        self.active.load().generation()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{HostConfig, ProxyConfig};
    use crate::state::snapshot::build_snapshot;
    use std::path::Path;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;

    /// Every field of generation `n` encodes `n`, so a mixed read is detectable.
    fn snapshot(generation: u64) -> ActiveSnapshot {
        let mut config = ProxyConfig::default();
        config.hosts.push(
            format!("gen-{generation}.example.com"),
            HostConfig::new("127.0.0.1", generation as u16 + 1, "http"),
        );
        build_snapshot(config, Path::new("."), generation).unwrap()
    }

    #[test]
    fn commit_returns_previous() {
        let store = ConfigStore::new(snapshot(1));
        let held = store.current();

        let previous = store.commit(snapshot(2));
        assert_eq!(previous.generation(), 1);
        assert_eq!(store.generation(), 2);
        // A reader keeps the generation it loaded.
        assert_eq!(held.generation(), 1);
        assert!(held.routes().lookup("gen-1.example.com").is_some());
    }

    #[test]
    fn readers_never_observe_mixed_generations() {
        let store = Arc::new(ConfigStore::new(snapshot(1)));
        let done = Arc::new(AtomicBool::new(false));

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let store = store.clone();
                let done = done.clone();
                thread::spawn(move || {
                    let mut last = 0;
                    while !done.load(Ordering::Relaxed) {
                        let snap = store.current();
                        let generation = snap.generation();
                        let entry = snap.routes().iter().next().unwrap();
                        assert_eq!(entry.hostname(), format!("gen-{generation}.example.com"));
                        assert_eq!(entry.backend().port, generation as u16 + 1);
                        assert!(generation >= last, "generation went backwards");
                        last = generation;
                    }
                })
            })
            .collect();

        for generation in 2..500 {
            store.commit(snapshot(generation));
        }
        done.store(true, Ordering::Relaxed);

        for reader in readers {
            reader.join().unwrap();
        }
        assert_eq!(store.generation(), 499);
    }
}
