//! Debounced watching of the download folder.
//!
//! File system notifications arrive on a thread owned by `notify` and are
//! forwarded into a tokio channel. A single task waits for the folder to go
//! quiet for [`DEBOUNCE`] and then runs one scan and move cycle.
//!
//! Every folder down to [`MAX_WATCH_DEPTH`] gets its own non-recursive watch,
//! so deeper trees cost no OS watch handles. Folders created later are picked
//! up before the next cycle runs.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::event::{ModifyKind, RenameMode};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher as _};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use walkdir::WalkDir;

use crate::config::Config;
use crate::decision::DecisionBroker;
use crate::error::{ModsortError, Result};
use crate::events::EventBus;
use crate::file_mover::FileMover;
use crate::scanner::{describe_summary, scan_folder};

/// Quiet period after the last change before a cycle runs.
pub const DEBOUNCE: Duration = Duration::from_millis(300);

/// Deepest folder level below the source whose changes count.
pub const MAX_WATCH_DEPTH: usize = 5;

const EVENT_QUEUE: usize = 128;

struct WatchSession {
    task: JoinHandle<()>,
    root: PathBuf,
}

/// Owner of at most one watch session.
#[derive(Default)]
pub struct Watcher {
    session: Option<WatchSession>,
}

impl Watcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        self.session.is_some()
    }

    /// Folder being watched, if running.
    pub fn watched_dir(&self) -> Option<&Path> {
        self.session.as_ref().map(|s| s.root.as_path())
    }

    /// Starts watching `config.source_dir`, creating it if needed.
    ///
    /// Calling this while a session is active does nothing. Must be called
    /// from within a tokio runtime.
    pub fn start(
        &mut self,
        config: Config,
        mover: FileMover,
        decisions: Option<DecisionBroker>,
    ) -> Result<()> {
        let events = mover.events().clone();
        if let Some(session) = &self.session {
            events.info(format!(
                "Watcher already running on {}",
                session.root.display()
            ));
            return Ok(());
        }

        std::fs::create_dir_all(&config.source_dir)
            .map_err(|e| ModsortError::io(&config.source_dir, e))?;
        let root = config
            .source_dir
            .canonicalize()
            .unwrap_or_else(|_| config.source_dir.clone());

        let (tx, rx) = mpsc::channel(EVENT_QUEUE);
        let filter_root = root.clone();
        let callback_events = events.clone();
        let watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            match res {
                Ok(event) => {
                    if is_relevant(&filter_root, &event) {
                        // A full queue already guarantees another cycle.
                        let _ = tx.try_send(());
                    }
                }
                Err(e) => callback_events.warn(format!("Watch error: {}", e)),
            }
        })?;
        let mut tree = WatchTree::new(watcher, root.clone(), events.clone());
        tree.refresh()?;

        // The task owns the watcher; aborting it releases the OS subscription.
        let task = tokio::spawn(debounce_loop(rx, tree, config, mover, decisions));
        events.info(format!("Watching {}", root.display()));

        self.session = Some(WatchSession { task, root });
        Ok(())
    }

    /// Stops watching and cancels any pending cycle. Safe to call when stopped.
    pub fn stop(&mut self) {
        if let Some(session) = self.session.take() {
            session.task.abort();
            tracing::info!("Stopped watching {}", session.root.display());
        }
    }
}

impl Drop for Watcher {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Non-recursive watches on the source folder and its subfolders.
struct WatchTree {
    watcher: RecommendedWatcher,
    root: PathBuf,
    watched: HashSet<PathBuf>,
    events: EventBus,
}

impl WatchTree {
    fn new(watcher: RecommendedWatcher, root: PathBuf, events: EventBus) -> Self {
        Self {
            watcher,
            root,
            watched: HashSet::new(),
            events,
        }
    }

    /// Adds watches for folders that appeared since the last call.
    ///
    /// Only failing to watch the root itself is an error.
    fn refresh(&mut self) -> Result<()> {
        self.watched.retain(|dir| dir.is_dir());

        let walk = WalkDir::new(&self.root)
            .into_iter()
            .filter_entry(|entry| entry.file_type().is_dir() && entry.depth() <= MAX_WATCH_DEPTH);
        for entry in walk {
            let dir = match entry {
                Ok(entry) => entry.into_path(),
                Err(e) => {
                    self.events.warn(format!("Cannot read folder to watch: {}", e));
                    continue;
                }
            };
            if self.watched.contains(&dir) {
                continue;
            }
            match self.watcher.watch(&dir, RecursiveMode::NonRecursive) {
                Ok(()) => {
                    self.watched.insert(dir);
                }
                Err(e) if dir == self.root => return Err(e.into()),
                Err(e) => self
                    .events
                    .warn(format!("Cannot watch {}: {}", dir.display(), e)),
            }
        }
        Ok(())
    }
}

/// Whether a notification should schedule a cycle.
///
/// Files leaving the folder and metadata-only changes do not count.
fn is_relevant(root: &Path, event: &notify::Event) -> bool {
    let counts = match event.kind {
        EventKind::Create(_) => true,
        EventKind::Modify(ModifyKind::Name(RenameMode::From) | ModifyKind::Metadata(_)) => false,
        EventKind::Modify(_) => true,
        _ => false,
    };
    counts && event.paths.iter().any(|path| within_depth(root, path))
}

fn within_depth(root: &Path, path: &Path) -> bool {
    // Direct children of the root sit at level 0.
    path.strip_prefix(root)
        .map(|rel| {
            let components = rel.components().count();
            components > 0 && components <= MAX_WATCH_DEPTH + 1
        })
        .unwrap_or(false)
}

async fn debounce_loop(
    mut rx: mpsc::Receiver<()>,
    mut tree: WatchTree,
    config: Config,
    mover: FileMover,
    decisions: Option<DecisionBroker>,
) {
    while rx.recv().await.is_some() {
        loop {
            match tokio::time::timeout(DEBOUNCE, rx.recv()).await {
                Ok(Some(())) => continue,
                Ok(None) => return,
                Err(_) => break,
            }
        }
        if let Err(e) = tree.refresh() {
            mover
                .events()
                .warn(format!("Cannot watch {}: {}", tree.root.display(), e));
        }
        run_cycle(&config, &mover, decisions.as_ref()).await;
    }
}

async fn run_cycle(config: &Config, mover: &FileMover, decisions: Option<&DecisionBroker>) {
    let events = mover.events();
    let scan = match scan_folder(&config.source_dir, events).await {
        Ok(scan) => scan,
        Err(e) => {
            events.error(format!(
                "Scan of {} failed: {}",
                config.source_dir.display(),
                e
            ));
            return;
        }
    };
    if scan.items.is_empty() {
        return;
    }

    events.info(describe_summary(&scan.summary));
    let operations = mover.move_files(&scan.items, config, decisions).await;
    events.info(format!("Moved {} files", operations.len()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ZipBackend;
    use crate::events::Event;
    use notify::event::{CreateKind, DataChange, MetadataKind, RemoveKind};
    use std::fs;
    use tempfile::TempDir;

    fn test_config(root: &Path) -> Config {
        let mut config = Config::defaults_for_home(root);
        config.source_dir = root.join("downloads");
        config.set_sims_root(root.join("game"));
        config.temp_dir = root.join("scratch");
        config.zip_backend = ZipBackend::Builtin;
        config
    }

    fn mover_for(config: &Config) -> FileMover {
        FileMover::from_config(config, EventBus::new())
    }

    #[test]
    fn test_relevance_filters_kind_and_depth() {
        let root = Path::new("/watch");
        let create = |p: &str| {
            notify::Event::new(EventKind::Create(CreateKind::File)).add_path(PathBuf::from(p))
        };

        assert!(is_relevant(root, &create("/watch/a.package")));
        assert!(is_relevant(root, &create("/watch/1/2/3/4/5/a.package")));
        assert!(!is_relevant(root, &create("/watch/1/2/3/4/5/6/a.package")));
        assert!(!is_relevant(root, &create("/elsewhere/a.package")));
        assert!(!is_relevant(
            root,
            &notify::Event::new(EventKind::Remove(RemoveKind::File))
                .add_path(PathBuf::from("/watch/a.package"))
        ));
    }

    #[test]
    fn test_relevance_ignores_departures_and_metadata() {
        let root = Path::new("/watch");
        let modify = |kind: ModifyKind| {
            notify::Event::new(EventKind::Modify(kind)).add_path(PathBuf::from("/watch/a.package"))
        };

        assert!(is_relevant(root, &modify(ModifyKind::Data(DataChange::Content))));
        assert!(is_relevant(root, &modify(ModifyKind::Name(RenameMode::To))));
        assert!(is_relevant(root, &modify(ModifyKind::Any)));
        assert!(!is_relevant(root, &modify(ModifyKind::Name(RenameMode::From))));
        assert!(!is_relevant(
            root,
            &modify(ModifyKind::Metadata(MetadataKind::Permissions))
        ));
    }

    #[test]
    fn test_watch_tree_stops_at_max_depth() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let root = temp_dir.path().canonicalize().unwrap();
        let deepest = root.join("1/2/3/4/5/6/7");
        fs::create_dir_all(&deepest).unwrap();

        let watcher = notify::recommended_watcher(|_: notify::Result<notify::Event>| {}).unwrap();
        let mut tree = WatchTree::new(watcher, root.clone(), EventBus::new());
        tree.refresh().unwrap();

        assert!(tree.watched.contains(&root));
        assert!(tree.watched.contains(&root.join("1/2/3/4/5")));
        assert!(!tree.watched.contains(&root.join("1/2/3/4/5/6")));
        assert_eq!(tree.watched.len(), MAX_WATCH_DEPTH + 1);

        fs::create_dir_all(root.join("later")).unwrap();
        tree.refresh().unwrap();
        assert!(tree.watched.contains(&root.join("later")));
    }

    #[test]
    fn test_stop_without_start_is_harmless() {
        let mut watcher = Watcher::new();
        watcher.stop();
        watcher.stop();
        assert!(!watcher.is_running());
    }

    #[tokio::test]
    async fn test_second_start_is_noop() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let config = test_config(temp_dir.path());
        let mut watcher = Watcher::new();

        watcher
            .start(config.clone(), mover_for(&config), None)
            .unwrap();
        let first = watcher.watched_dir().map(Path::to_path_buf);

        let mut other = config.clone();
        other.source_dir = temp_dir.path().join("other");
        watcher.start(other.clone(), mover_for(&other), None).unwrap();

        assert!(watcher.is_running());
        assert_eq!(watcher.watched_dir().map(Path::to_path_buf), first);
        assert!(!other.source_dir.exists());

        watcher.stop();
        assert!(!watcher.is_running());
    }

    #[tokio::test]
    async fn test_new_download_is_sorted() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let config = test_config(temp_dir.path());
        let mut watcher = Watcher::new();
        watcher
            .start(config.clone(), mover_for(&config), None)
            .unwrap();
        assert!(config.source_dir.is_dir());

        fs::write(config.source_dir.join("Hair.package"), b"mod").unwrap();
        fs::write(config.source_dir.join("Thumbs.db"), b"junk").unwrap();

        let moved = wait_for(&config.mods_dir.join("Hair.package")).await;
        watcher.stop();

        assert!(moved, "watcher never moved the new file");
        assert!(!config.source_dir.join("Thumbs.db").exists());
    }

    /// Polls until `path` exists, for up to ten seconds.
    async fn wait_for(path: &Path) -> bool {
        let mut waited = Duration::ZERO;
        while !path.exists() && waited < Duration::from_secs(10) {
            tokio::time::sleep(Duration::from_millis(50)).await;
            waited += Duration::from_millis(50);
        }
        path.exists()
    }

    fn count_summaries(rx: &mut tokio::sync::broadcast::Receiver<Event>) -> usize {
        let mut count = 0;
        loop {
            match rx.try_recv() {
                Ok(Event::Summary(_)) => count += 1,
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::TryRecvError::Lagged(_)) => {}
                Err(_) => return count,
            }
        }
    }

    #[tokio::test]
    async fn test_burst_of_downloads_runs_one_cycle() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let config = test_config(temp_dir.path());
        let events = EventBus::new();
        let mut rx = events.subscribe();
        let mut watcher = Watcher::new();
        watcher
            .start(config.clone(), FileMover::from_config(&config, events), None)
            .unwrap();

        for i in 0..5 {
            fs::write(config.source_dir.join(format!("Mod{}.package", i)), b"mod").unwrap();
        }

        assert!(wait_for(&config.mods_dir.join("Mod4.package")).await);
        // Long enough for a second cycle to have started if anything re-triggered.
        tokio::time::sleep(DEBOUNCE * 3).await;
        watcher.stop();

        for i in 0..5 {
            assert!(config.mods_dir.join(format!("Mod{}.package", i)).exists());
        }
        assert_eq!(count_summaries(&mut rx), 1);
    }

    #[tokio::test]
    async fn test_stop_cancels_pending_cycle() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let config = test_config(temp_dir.path());
        let events = EventBus::new();
        let mut rx = events.subscribe();
        let mut watcher = Watcher::new();
        watcher
            .start(config.clone(), FileMover::from_config(&config, events), None)
            .unwrap();

        fs::write(config.source_dir.join("Hair.package"), b"mod").unwrap();
        watcher.stop();
        tokio::time::sleep(DEBOUNCE * 3).await;

        assert!(config.source_dir.join("Hair.package").exists());
        assert!(!config.mods_dir.join("Hair.package").exists());
        assert_eq!(count_summaries(&mut rx), 0);
    }

    #[tokio::test]
    async fn test_files_in_new_subfolder_are_sorted() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let config = test_config(temp_dir.path());
        let mut watcher = Watcher::new();
        watcher
            .start(config.clone(), mover_for(&config), None)
            .unwrap();

        let sub = config.source_dir.join("Creator");
        fs::create_dir(&sub).unwrap();
        // Let the cycle triggered by the new folder add its watch.
        tokio::time::sleep(DEBOUNCE * 3).await;
        fs::write(sub.join("Top.package"), b"mod").unwrap();

        let moved = wait_for(&config.mods_dir.join("Top.package")).await;
        watcher.stop();
        assert!(moved, "file in a folder created after start was not sorted");
    }
}
