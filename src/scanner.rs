//! Recursive inventory of a download folder.
//!
//! A scan is not read-only: junk files and `__MACOSX` folders are deleted while
//! walking, so that the returned inventory contains only files worth sorting.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use walkdir::WalkDir;

use crate::error::{ModsortError, Result};
use crate::events::{Event, EventBus};
use crate::file_category::{Category, classify, extension_of};

/// Folder created by macOS archivers; never contains anything useful.
const MACOS_ARTIFACT_DIR: &str = "__MACOSX";

/// One file discovered during a scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanItem {
    pub path: PathBuf,
    pub name: String,
    /// Lowercase, with the leading dot; empty when the name has no extension.
    pub extension: String,
    pub category: Category,
    pub size: u64,
    pub modified_time: Option<DateTime<Utc>>,
    pub relative_path: PathBuf,
}

/// Per-category counts of a scan. `total` includes deleted junk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScanSummary {
    #[serde(rename = "mod")]
    pub mods: usize,
    pub tray: usize,
    pub save: usize,
    pub archive: usize,
    pub trash: usize,
    pub unknown: usize,
    pub total: usize,
}

impl ScanSummary {
    pub fn count(&self, category: Category) -> usize {
        match category {
            Category::Mod => self.mods,
            Category::Tray => self.tray,
            Category::Save => self.save,
            Category::Archive => self.archive,
            Category::Trash => self.trash,
            Category::Unknown => self.unknown,
        }
    }

    fn record(&mut self, category: Category) {
        let slot = match category {
            Category::Mod => &mut self.mods,
            Category::Tray => &mut self.tray,
            Category::Save => &mut self.save,
            Category::Archive => &mut self.archive,
            Category::Trash => &mut self.trash,
            Category::Unknown => &mut self.unknown,
        };
        *slot += 1;
        self.total += 1;
    }
}

/// Result of scanning one folder.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanResult {
    pub items: Vec<ScanItem>,
    pub summary: ScanSummary,
}

/// Scans `root` on the blocking pool and publishes the summary.
///
/// Deletes junk files and `__MACOSX` folders as a side effect; see [`scan_dir`].
pub async fn scan_folder(root: &Path, events: &EventBus) -> Result<ScanResult> {
    let root = root.to_path_buf();
    let bus = events.clone();
    let result = tokio::task::spawn_blocking(move || scan_dir(&root, &bus)).await??;
    events.emit(Event::Summary(result.summary));
    Ok(result)
}

/// Walks `root` recursively and classifies every regular file.
///
/// - `__MACOSX` directories are removed without being descended into.
/// - Junk files are deleted immediately and only counted in the summary.
/// - Entries that cannot be read are skipped with a warning.
/// - A missing `root` is created and scans as empty.
///
/// Entries are visited in file-name order so repeated scans list items
/// identically.
pub fn scan_dir(root: &Path, events: &EventBus) -> Result<ScanResult> {
    if !root.exists() {
        fs::create_dir_all(root).map_err(|e| ModsortError::io(root, e))?;
    }
    if !root.is_dir() {
        return Err(ModsortError::InvalidArgument(format!(
            "not a directory: {}",
            root.display()
        )));
    }

    let mut result = ScanResult::default();
    let mut walker = WalkDir::new(root)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter();

    while let Some(entry) = walker.next() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                let where_ = e
                    .path()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| root.display().to_string());
                events.warn(format!("Skipping unreadable entry {}: {}", where_, e));
                continue;
            }
        };

        let path = entry.path();
        let name = entry.file_name().to_string_lossy().to_string();

        if entry.file_type().is_dir() {
            if name == MACOS_ARTIFACT_DIR {
                walker.skip_current_dir();
                match fs::remove_dir_all(path) {
                    Ok(()) => events.info(format!("Removed junk folder {}", path.display())),
                    Err(e) => events.warn(format!(
                        "Could not remove junk folder {}: {}",
                        path.display(),
                        e
                    )),
                }
            }
            continue;
        }

        let metadata = match fs::metadata(path) {
            Ok(metadata) => metadata,
            Err(e) => {
                events.warn(format!("Skipping {}: {}", path.display(), e));
                continue;
            }
        };
        if !metadata.is_file() {
            continue;
        }

        let category = classify(&name);
        if category == Category::Trash {
            match fs::remove_file(path) {
                Ok(()) => events.info(format!("Deleted junk file {}", path.display())),
                Err(e) => events.warn(format!(
                    "Could not delete junk file {}: {}",
                    path.display(),
                    e
                )),
            }
            result.summary.record(category);
            continue;
        }

        let relative_path = path.strip_prefix(root).unwrap_or(path).to_path_buf();
        result.items.push(ScanItem {
            path: path.to_path_buf(),
            extension: extension_of(&name),
            name,
            category,
            size: metadata.len(),
            modified_time: metadata.modified().ok().map(DateTime::<Utc>::from),
            relative_path,
        });
        result.summary.record(category);
    }

    Ok(result)
}

/// Keeps only the items whose category is in `categories`.
pub fn filter_items_by_category(items: &[ScanItem], categories: &[Category]) -> Vec<ScanItem> {
    items
        .iter()
        .filter(|item| categories.contains(&item.category))
        .cloned()
        .collect()
}

/// One-line description of a summary, for logs.
pub fn describe_summary(summary: &ScanSummary) -> String {
    format!(
        "Found: mods {}, tray {}, saves {}, archives {}, unknown {}",
        summary.mods, summary.tray, summary.save, summary.archive, summary.unknown
    )
}
