/// Relocation of scanned files into the game's folders.
///
/// Each [`ScanItem`] is handled according to its category: junk is deleted,
/// unknown files are left where they are, mods, tray items and saves are moved
/// into their destination folder, and archives are unpacked so that their
/// contents can be scanned and moved in turn.
///
/// Moves never overwrite. A name that is already taken at the destination gets
/// a ` (n)` suffix in front of its extension.
///
/// # Examples
///
/// ```no_run
/// use modsort::config::Config;
/// use modsort::events::EventBus;
/// use modsort::file_mover::FileMover;
/// use modsort::scanner::scan_folder;
///
/// # async fn run() -> modsort::Result<()> {
/// let config = Config::default();
/// let events = EventBus::new();
/// let mover = FileMover::from_config(&config, events.clone());
///
/// let scan = scan_folder(&config.source_dir, &events).await?;
/// for op in mover.move_files(&scan.items, &config, None).await {
///     println!("{} -> {}", op.from.display(), op.to.display());
/// }
/// # Ok(())
/// # }
/// ```
use std::ffi::{OsStr, OsString};
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use serde::Serialize;

use crate::config::{Config, NestedArchiveMode};
use crate::decision::{DecisionBroker, NestedDecision};
use crate::error::{ModsortError, Result};
use crate::events::{EventBus, ProgressEvent};
use crate::extractor::{ArchiveExtractor, SeenSet, archive_stem};
use crate::file_category::Category;
use crate::scanner::{ScanItem, scan_folder};

/// A single completed move.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MoveOperation {
    /// Where the file was found.
    pub from: PathBuf,
    /// Where it ended up.
    pub to: PathBuf,
    pub category: Category,
}

/// Counters shared by a batch and every sub-batch spawned from its archives.
#[derive(Debug)]
struct Progress {
    total: usize,
    processed: usize,
}

type BatchFuture<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

/// Moves scanned items into their destinations, unpacking archives on the way.
#[derive(Debug, Clone)]
pub struct FileMover {
    extractor: ArchiveExtractor,
    events: EventBus,
}

impl FileMover {
    pub fn new(extractor: ArchiveExtractor, events: EventBus) -> Self {
        Self { extractor, events }
    }

    pub fn from_config(config: &Config, events: EventBus) -> Self {
        Self::new(ArchiveExtractor::from_config(config, events.clone()), events)
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Processes `items` one at a time, in order, and returns the moves made.
    ///
    /// A failure on one item is logged and the batch carries on with the next.
    /// A progress event is published after every item, including items found
    /// inside archives; its `total` stays the length of `items`.
    ///
    /// Nested-archive questions in [`NestedArchiveMode::Prompt`] go to
    /// `decisions`. Without a broker, prompt mode unpacks everything. In
    /// [`NestedArchiveMode::First`] the broker is asked too, but only an
    /// explicit selection replaces the first archive.
    pub async fn move_files(
        &self,
        items: &[ScanItem],
        config: &Config,
        decisions: Option<&DecisionBroker>,
    ) -> Vec<MoveOperation> {
        let mut progress = Progress {
            total: items.len(),
            processed: 0,
        };
        let mut operations = Vec::new();
        self.move_batch(items, config, decisions, &mut progress, &mut operations)
            .await;
        operations
    }

    fn move_batch<'a>(
        &'a self,
        items: &'a [ScanItem],
        config: &'a Config,
        decisions: Option<&'a DecisionBroker>,
        progress: &'a mut Progress,
        operations: &'a mut Vec<MoveOperation>,
    ) -> BatchFuture<'a> {
        Box::pin(async move {
            for item in items {
                self.move_item(item, config, decisions, progress, operations)
                    .await;

                progress.processed += 1;
                self.events.progress(ProgressEvent {
                    total: progress.total,
                    processed: progress.processed,
                    current: Some(item.path.clone()),
                });
            }
        })
    }

    async fn move_item(
        &self,
        item: &ScanItem,
        config: &Config,
        decisions: Option<&DecisionBroker>,
        progress: &mut Progress,
        operations: &mut Vec<MoveOperation>,
    ) {
        match item.category {
            Category::Trash => match tokio::fs::remove_file(&item.path).await {
                Ok(()) => self
                    .events
                    .info(format!("Deleted junk file {}", item.path.display())),
                Err(e) => self.events.warn(format!(
                    "Could not delete junk file {}: {}",
                    item.path.display(),
                    e
                )),
            },
            Category::Unknown => {
                self.events
                    .info(format!("Leaving unknown file {}", item.path.display()));
            }
            Category::Mod | Category::Tray | Category::Save => {
                let dest_dir = destination_dir(config, item.category);
                match self.relocate(&item.path, dest_dir, item.category).await {
                    Ok(op) => operations.push(op),
                    Err(e) => self.events.error(format!(
                        "Failed to move {}: {}",
                        item.path.display(),
                        e
                    )),
                }
            }
            Category::Archive => {
                self.move_archive(item, config, decisions, progress, operations)
                    .await;
            }
        }
    }

    async fn move_archive(
        &self,
        item: &ScanItem,
        config: &Config,
        decisions: Option<&DecisionBroker>,
        progress: &mut Progress,
        operations: &mut Vec<MoveOperation>,
    ) {
        let mode = config.nested_archive_mode;
        if mode == NestedArchiveMode::Skip {
            match self
                .relocate(&item.path, &config.mods_dir, Category::Archive)
                .await
            {
                Ok(op) => operations.push(op),
                Err(e) => self.events.error(format!(
                    "Failed to move archive {}: {}",
                    item.path.display(),
                    e
                )),
            }
            return;
        }

        let extracted = match mode {
            NestedArchiveMode::All => {
                self.extractor
                    .extract_archive(&item.path, &config.temp_dir)
                    .await
            }
            _ => {
                self.extract_selected(&item.path, mode, &config.temp_dir, decisions)
                    .await
            }
        };
        let extracted = match extracted {
            Ok(dir) => dir,
            Err(e) => {
                self.events.error(format!(
                    "Leaving archive {} in place: {}",
                    item.path.display(),
                    e
                ));
                self.remove_dir_best_effort(&config.temp_dir.join(archive_stem(&item.path)))
                    .await;
                return;
            }
        };

        match scan_folder(&extracted, &self.events).await {
            Ok(scan) => {
                self.move_batch(&scan.items, config, decisions, progress, operations)
                    .await;
            }
            Err(e) => {
                self.events.error(format!(
                    "Could not scan contents of {}: {}",
                    item.path.display(),
                    e
                ));
                self.remove_dir_best_effort(&extracted).await;
                return;
            }
        }

        if let Err(e) = tokio::fs::remove_file(&item.path).await {
            self.events.warn(format!(
                "Could not delete archive {}: {}",
                item.path.display(),
                e
            ));
        }
        self.remove_dir_best_effort(&extracted).await;
    }

    /// Unpacks the top level of `archive`, then only the nested archives chosen
    /// for `mode`. Nested archives that were not chosen are deleted.
    async fn extract_selected(
        &self,
        archive: &Path,
        mode: NestedArchiveMode,
        scratch: &Path,
        decisions: Option<&DecisionBroker>,
    ) -> Result<PathBuf> {
        let mut seen = SeenSet::new();
        let dest = self
            .extractor
            .extract_top_level(archive, scratch, &mut seen)
            .await?;
        let nested = self.extractor.find_nested_archives(&dest, &seen);

        let keep = if nested.len() > 1 {
            let decision = match (mode, decisions) {
                (NestedArchiveMode::Prompt, Some(broker)) => broker.request(nested.clone()).await,
                (NestedArchiveMode::Prompt, None) => NestedDecision::All,
                // Only an explicit selection overrides keeping the first.
                (_, Some(broker)) => match broker
                    .request_with_default(nested.clone(), NestedDecision::First)
                    .await
                {
                    selected @ NestedDecision::Selected(_) => selected,
                    _ => NestedDecision::First,
                },
                (_, None) => NestedDecision::First,
            };
            decision.select(&nested)
        } else {
            nested.clone()
        };

        for dropped in nested.iter().filter(|path| !keep.contains(path)) {
            match tokio::fs::remove_file(dropped).await {
                Ok(()) => self
                    .events
                    .info(format!("Discarded nested archive {}", dropped.display())),
                Err(e) => self.events.warn(format!(
                    "Could not discard nested archive {}: {}",
                    dropped.display(),
                    e
                )),
            }
        }

        self.extractor.extract_nested(keep, &mut seen).await?;
        Ok(dest)
    }

    /// Moves `file` into `dest_dir` under a name that is not taken yet.
    async fn relocate(
        &self,
        file: &Path,
        dest_dir: &Path,
        category: Category,
    ) -> Result<MoveOperation> {
        let file_name = file.file_name().ok_or_else(|| {
            ModsortError::InvalidArgument(format!("{} has no file name", file.display()))
        })?;

        tokio::fs::create_dir_all(dest_dir)
            .await
            .map_err(|e| ModsortError::io(dest_dir, e))?;
        let destination = unique_destination(dest_dir, file_name);
        move_file(file, &destination).await?;

        self.events.info(format!(
            "Moved {} -> {}",
            file.display(),
            destination.display()
        ));
        Ok(MoveOperation {
            from: file.to_path_buf(),
            to: destination,
            category,
        })
    }

    async fn remove_dir_best_effort(&self, dir: &Path) {
        match tokio::fs::remove_dir_all(dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => self.events.warn(format!(
                "Could not remove temporary folder {}: {}",
                dir.display(),
                e
            )),
        }
    }
}

/// Folder a movable category goes to.
pub fn destination_dir(config: &Config, category: Category) -> &Path {
    match category {
        Category::Tray => &config.tray_dir,
        Category::Save => &config.saves_dir,
        _ => &config.mods_dir,
    }
}

/// First path in `dir` for `file_name` that does not exist yet.
///
/// Tries the name itself, then `stem (1).ext`, `stem (2).ext` and so on.
///
/// # Examples
///
/// ```
/// use modsort::file_mover::unique_destination;
/// use std::ffi::OsStr;
///
/// let dir = std::env::temp_dir().join("modsort-doc-unique-destination-empty");
/// assert_eq!(
///     unique_destination(&dir, OsStr::new("Hair.package")),
///     dir.join("Hair.package")
/// );
/// ```
pub fn unique_destination(dir: &Path, file_name: &OsStr) -> PathBuf {
    let candidate = dir.join(file_name);
    if !candidate.exists() {
        return candidate;
    }

    let name = Path::new(file_name);
    let stem = name.file_stem().unwrap_or(file_name);
    let extension = name.extension();

    let mut n = 1u32;
    loop {
        let mut numbered = OsString::from(stem);
        numbered.push(format!(" ({})", n));
        if let Some(ext) = extension {
            numbered.push(".");
            numbered.push(ext);
        }
        let candidate = dir.join(numbered);
        if !candidate.exists() {
            return candidate;
        }
        n += 1;
    }
}

/// Renames `from` to `to`, copying and deleting when they sit on different filesystems.
async fn move_file(from: &Path, to: &Path) -> Result<()> {
    match tokio::fs::rename(from, to).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::CrossesDevices => {
            tokio::fs::copy(from, to)
                .await
                .map_err(|e| ModsortError::io(to, e))?;
            tokio::fs::remove_file(from)
                .await
                .map_err(|e| ModsortError::io(from, e))
        }
        Err(e) => Err(ModsortError::io(from, e)),
    }
}
