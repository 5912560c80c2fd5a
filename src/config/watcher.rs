//! Configuration and certificate watcher for hot reload.
//!
//! # Responsibilities
//! - Track the config file and every certificate file it references
//! - Debounce bursts of changes into one reload
//! - Run load → validate → load certificates, then commit or reject
//! - Re-point filesystem watches at the files the attempted config uses
//!
//! # Design Decisions
//! - notify events only wake the watcher; fingerprints decide what changed
//! - A periodic poll covers platforms and filesystems without events
//! - Fingerprints are captured before a file is read, so an edit racing a
//!   reload is seen on the next cycle rather than lost
//! - One reload at a time; the pipeline runs on the blocking pool

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{broadcast, mpsc};
use tokio::time::{Instant, MissedTickBehavior};

use crate::config::fingerprint::TrackedFiles;
use crate::config::loader::load_config;
use crate::config::schema::ReloadConfig;
use crate::observability::{logging, metrics};
use crate::state::{build_snapshot, config_dir, referenced_files, ActiveSnapshot, ConfigStore, SnapshotError};

/// Result of one reload attempt, published to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReloadOutcome {
    Committed { generation: u64 },
    Rejected { error: String },
}

#[derive(Debug, Clone, Copy)]
enum WatchSignal {
    /// Something happened in a watched directory.
    FsEvent,
    /// Explicit request (SIGHUP), reloads without debounce.
    Manual,
}

#[derive(Debug, Clone, Copy)]
enum Phase {
    Idle,
    Pending(Instant),
}

/// Handle to request a reload from outside the watcher.
#[derive(Debug, Clone)]
pub struct ReloadTrigger {
    tx: mpsc::UnboundedSender<WatchSignal>,
}

impl ReloadTrigger {
    pub fn reload(&self) {
        let _ = self.tx.send(WatchSignal::Manual);
    }
}

/// Load the config at `config_path` and build a snapshot, recording fingerprints as it goes.
///
/// If the config cannot be parsed, `previous` stays tracked so a fix to any of
/// those files is still noticed.
pub fn load_tracked(
    config_path: &Path,
    previous: &[PathBuf],
    generation: u64,
) -> (Result<ActiveSnapshot, SnapshotError>, TrackedFiles) {
    let mut tracked = TrackedFiles::capture([config_path.to_path_buf()]);

    let config = match load_config(config_path) {
        Ok(config) => config,
        Err(e) => {
            tracked.extend(previous.iter().cloned());
            return (Err(e.into()), tracked);
        }
    };

    let base_dir = config_dir(config_path);
    tracked.extend(referenced_files(&config, &base_dir));
    (build_snapshot(config, &base_dir, generation), tracked)
}

/// Watches tracked files and drives reloads into a [`ConfigStore`].
pub struct ConfigWatcher {
    config_path: PathBuf,
    store: Arc<ConfigStore>,
    tracked: TrackedFiles,
    settings: ReloadConfig,
    signal_tx: mpsc::UnboundedSender<WatchSignal>,
    signal_rx: mpsc::UnboundedReceiver<WatchSignal>,
    outcomes: broadcast::Sender<ReloadOutcome>,
    fs_watcher: Option<RecommendedWatcher>,
    watched_dirs: BTreeSet<PathBuf>,
}

impl ConfigWatcher {
    /// `tracked` should come from the [`load_tracked`] call that built the store's snapshot.
    pub fn new(config_path: &Path, store: Arc<ConfigStore>, tracked: TrackedFiles) -> Self {
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let (outcomes, _) = broadcast::channel(16);
        let settings = store.current().config().reload.clone();

        Self {
            config_path: config_path.to_path_buf(),
            store,
            tracked,
            settings,
            signal_tx,
            signal_rx,
            outcomes,
            fs_watcher: None,
            watched_dirs: BTreeSet::new(),
        }
    }

    pub fn trigger(&self) -> ReloadTrigger {
        ReloadTrigger {
            tx: self.signal_tx.clone(),
        }
    }

    /// Sender side of the outcome channel, for handing out more receivers later.
    pub fn outcomes(&self) -> broadcast::Sender<ReloadOutcome> {
        self.outcomes.clone()
    }

    /// Run until shutdown is signalled.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        self.fs_watcher = self.start_fs_watcher();
        self.sync_watches();

        let mut poll = self.poll_timer();
        let mut phase = Phase::Idle;

        tracing::info!(
            path = %self.config_path.display(),
            files = self.tracked.len(),
            debounce_ms = self.settings.debounce_ms,
            "Config watcher started"
        );

        loop {
            let deadline = match phase {
                Phase::Pending(deadline) => Some(deadline),
                Phase::Idle => None,
            };

            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::debug!("Config watcher stopping");
                    break;
                }
                Some(signal) = self.signal_rx.recv() => match signal {
                    WatchSignal::FsEvent => {
                        if self.detect_changes().await {
                            phase = Phase::Pending(Instant::now() + self.settings.debounce());
                        }
                    }
                    WatchSignal::Manual => {
                        tracing::info!("Reload requested");
                        phase = Phase::Pending(Instant::now());
                    }
                },
                _ = poll.tick() => {
                    if self.detect_changes().await {
                        phase = Phase::Pending(Instant::now() + self.settings.debounce());
                    }
                }
                _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    phase = Phase::Idle;
                    let previous = self.settings.clone();
                    self.reload().await;
                    if self.settings != previous {
                        poll = self.poll_timer();
                    }
                }
            }
        }
    }

    /// Re-fingerprint tracked files on the blocking pool.
    async fn detect_changes(&mut self) -> bool {
        let mut tracked = std::mem::take(&mut self.tracked);
        let paths: Vec<PathBuf> = tracked.paths().map(Path::to_path_buf).collect();

        let joined = tokio::task::spawn_blocking(move || {
            let changed = tracked.poll_changes();
            (tracked, changed)
        })
        .await;
        let changed = match joined {
            Ok((tracked, changed)) => {
                self.tracked = tracked;
                changed
            }
            Err(e) => {
                tracing::error!(error = %e, "Change detection task failed");
                // Fingerprints were lost with the task; treat everything as changed.
                self.tracked = TrackedFiles::default();
                self.tracked.extend(paths.iter().cloned());
                paths
            }
        };

        for path in &changed {
            tracing::debug!(path = %path.display(), "Change detected");
        }
        !changed.is_empty()
    }

    async fn reload(&mut self) {
        let generation = self.store.generation() + 1;
        let config_path = self.config_path.clone();
        let previous: Vec<PathBuf> = self.tracked.paths().map(Path::to_path_buf).collect();

        let joined =
            tokio::task::spawn_blocking(move || load_tracked(&config_path, &previous, generation))
                .await;
        let (result, tracked) = match joined {
            Ok(loaded) => loaded,
            Err(e) => {
                tracing::error!(error = %e, "Reload task failed");
                return;
            }
        };
        self.tracked = tracked;

        match result {
            Ok(candidate) => {
                let active = self.store.current();
                if active.config().listeners_differ(candidate.config()) {
                    tracing::warn!(
                        "Listener settings changed (port, ssl, ssl_port, bind_ip or max_connections); restart to apply them"
                    );
                }
                self.settings = candidate.config().reload.clone();

                self.store.commit(candidate);
                let committed = self.store.current();
                tracing::info!(
                    generation = committed.generation(),
                    hosts = committed.routes().len(),
                    certificates = committed.certs().host_count(),
                    "Configuration reloaded"
                );
                logging::log_route_table(&committed);
                metrics::record_reload(true);
                metrics::set_config_generation(committed.generation());
                let _ = self.outcomes.send(ReloadOutcome::Committed {
                    generation: committed.generation(),
                });
            }
            Err(e) => {
                tracing::error!(
                    error = %e,
                    generation = self.store.generation(),
                    "Configuration reload rejected, keeping current configuration"
                );
                metrics::record_reload(false);
                let _ = self.outcomes.send(ReloadOutcome::Rejected {
                    error: e.to_string(),
                });
            }
        }

        self.sync_watches();
    }

    fn poll_timer(&self) -> tokio::time::Interval {
        let mut poll = tokio::time::interval(self.settings.poll_interval());
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        poll
    }

    fn start_fs_watcher(&self) -> Option<RecommendedWatcher> {
        let tx = self.signal_tx.clone();
        let result = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) if !event.kind.is_access() => {
                let _ = tx.send(WatchSignal::FsEvent);
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "Filesystem watch error"),
        });

        match result {
            Ok(watcher) => Some(watcher),
            Err(e) => {
                tracing::warn!(error = %e, "Filesystem events unavailable, relying on polling");
                None
            }
        }
    }

    /// Watch exactly the parent directories of the tracked files.
    fn sync_watches(&mut self) {
        let Some(watcher) = self.fs_watcher.as_mut() else {
            return;
        };
        let wanted = self.tracked.directories();

        for dir in self.watched_dirs.difference(&wanted) {
            if let Err(e) = watcher.unwatch(dir) {
                tracing::debug!(dir = %dir.display(), error = %e, "Failed to unwatch directory");
            }
        }

        let mut watched = BTreeSet::new();
        for dir in wanted {
            if self.watched_dirs.contains(&dir) {
                watched.insert(dir);
                continue;
            }
            match watcher.watch(&dir, RecursiveMode::NonRecursive) {
                Ok(()) => {
                    tracing::debug!(dir = %dir.display(), "Watching directory");
                    watched.insert(dir);
                }
                Err(e) => {
                    tracing::warn!(dir = %dir.display(), error = %e, "Cannot watch directory, relying on polling");
                }
            }
        }
        self.watched_dirs = watched;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::Duration;

    const INITIAL: &str = r#"
port: 0
reload:
  debounce_ms: 50
  poll_interval_ms: 20
hosts:
  "a.example.com":
    ip: 127.0.0.1
    port: 9001
    protocol: http
"#;

    type Running = (PathBuf, Arc<ConfigStore>, ReloadTrigger, broadcast::Receiver<ReloadOutcome>, broadcast::Sender<()>);

    fn start(dir: &Path) -> Running {
        start_with(dir, INITIAL)
    }

    fn start_with(dir: &Path, initial: &str) -> Running {
        let path = dir.join("config.yml");
        fs::write(&path, initial).unwrap();

        let (result, tracked) = load_tracked(&path, &[], 1);
        let store = Arc::new(ConfigStore::new(result.unwrap()));
        let watcher = ConfigWatcher::new(&path, store.clone(), tracked);
        let trigger = watcher.trigger();
        let outcomes = watcher.outcomes().subscribe();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        tokio::spawn(watcher.run(shutdown_rx));
        (path, store, trigger, outcomes, shutdown_tx)
    }

    async fn next_outcome(outcomes: &mut broadcast::Receiver<ReloadOutcome>) -> ReloadOutcome {
        tokio::time::timeout(Duration::from_secs(5), outcomes.recv())
            .await
            .expect("no reload outcome")
            .unwrap()
    }

    #[tokio::test]
    async fn edit_is_committed() {
        let dir = tempfile::tempdir().unwrap();
        let (path, store, _trigger, mut outcomes, _shutdown) = start(dir.path());

        fs::write(&path, INITIAL.replace("9001", "9002")).unwrap();

        assert_eq!(next_outcome(&mut outcomes).await, ReloadOutcome::Committed { generation: 2 });
        let snapshot = store.current();
        assert_eq!(snapshot.routes().lookup("a.example.com").unwrap().backend().port, 9002);
    }

    #[tokio::test]
    async fn invalid_edit_keeps_previous_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let (path, store, _trigger, mut outcomes, _shutdown) = start(dir.path());

        fs::write(&path, INITIAL.replace("protocol: http", "protocol: gopher")).unwrap();

        assert!(matches!(next_outcome(&mut outcomes).await, ReloadOutcome::Rejected { .. }));
        assert_eq!(store.generation(), 1);
        assert_eq!(store.current().routes().lookup("a.example.com").unwrap().backend().port, 9001);

        // Fixing the file is picked up.
        fs::write(&path, INITIAL.replace("9001", "9003")).unwrap();
        assert_eq!(next_outcome(&mut outcomes).await, ReloadOutcome::Committed { generation: 2 });
    }

    #[tokio::test]
    async fn manual_trigger_reloads_unchanged_file() {
        let dir = tempfile::tempdir().unwrap();
        let (_path, store, trigger, mut outcomes, _shutdown) = start(dir.path());

        trigger.reload();

        assert_eq!(next_outcome(&mut outcomes).await, ReloadOutcome::Committed { generation: 2 });
        assert_eq!(store.generation(), 2);
    }

    #[tokio::test]
    async fn burst_of_edits_is_one_reload_of_the_last_version() {
        let slow_debounce = INITIAL.replace("debounce_ms: 50", "debounce_ms: 400");
        let dir = tempfile::tempdir().unwrap();
        let (path, store, _trigger, mut outcomes, _shutdown) = start_with(dir.path(), &slow_debounce);

        // Differing lengths so every write is a distinct fingerprint.
        for port in ["9002", "19003", "9004", "19005"] {
            fs::write(&path, slow_debounce.replace("9001", port)).unwrap();
            tokio::time::sleep(Duration::from_millis(40)).await;
        }

        assert_eq!(next_outcome(&mut outcomes).await, ReloadOutcome::Committed { generation: 2 });
        assert_eq!(store.current().routes().lookup("a.example.com").unwrap().backend().port, 19005);

        let extra = tokio::time::timeout(Duration::from_millis(800), outcomes.recv()).await;
        assert!(extra.is_err(), "burst caused a second reload: {extra:?}");
        assert_eq!(store.generation(), 2);
    }

    #[tokio::test]
    async fn duplicate_yaml_host_key_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (path, store, _trigger, mut outcomes, _shutdown) = start(dir.path());

        let duplicated = format!(
            "{INITIAL}  \"a.example.com\":\n    ip: 127.0.0.1\n    port: 9009\n    protocol: http\n"
        );
        fs::write(&path, duplicated).unwrap();

        assert!(matches!(next_outcome(&mut outcomes).await, ReloadOutcome::Rejected { .. }));
        assert_eq!(store.generation(), 1);
        assert_eq!(store.current().routes().lookup("a.example.com").unwrap().backend().port, 9001);

        let case_variant = format!(
            "{INITIAL}  \"A.Example.COM\":\n    ip: 127.0.0.1\n    port: 9009\n    protocol: http\n"
        );
        fs::write(&path, case_variant).unwrap();
        assert!(matches!(next_outcome(&mut outcomes).await, ReloadOutcome::Rejected { .. }));
        assert_eq!(store.generation(), 1);
    }

    #[test]
    fn edit_after_capture_is_seen_next_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yml");
        fs::write(&path, INITIAL).unwrap();

        let (result, mut tracked) = load_tracked(&path, &[], 1);
        assert!(result.is_ok());
        fs::write(&path, INITIAL.replace("9001", "19001")).unwrap();

        assert_eq!(tracked.poll_changes(), vec![path.clone()]);
        assert!(tracked.poll_changes().is_empty());
    }

    #[test]
    fn parse_failure_keeps_previous_files_tracked() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yml");
        fs::write(&path, "port: [\n").unwrap();
        let cert = dir.path().join("a.crt");

        let (result, tracked) = load_tracked(&path, &[cert.clone()], 2);
        assert!(matches!(result, Err(SnapshotError::Config(_))));
        assert!(tracked.contains(&path));
        assert!(tracked.contains(&cert));
    }
}
