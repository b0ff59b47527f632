//! modsort - sorts downloaded game mods into place
//!
//! This library classifies downloaded files by name, unpacks archives
//! (including archives inside archives), and moves mods, tray items and saves
//! into the game's folders without ever overwriting an existing file. A
//! debounced watcher can rerun the pipeline whenever new downloads arrive.

pub mod cli;
pub mod config;
pub mod decision;
pub mod error;
pub mod events;
pub mod extractor;
pub mod file_category;
pub mod file_mover;
pub mod logging;
pub mod output;
pub mod scanner;
pub mod watcher;

pub use config::{Config, ConfigStore, NestedArchiveMode, ZipBackend};
pub use decision::{DecisionBroker, NestedDecision};
pub use error::{ModsortError, Result};
pub use events::{Event, EventBus};
pub use extractor::ArchiveExtractor;
pub use file_category::{Category, classify};
pub use file_mover::{FileMover, MoveOperation};
pub use scanner::{ScanItem, ScanResult, ScanSummary, scan_folder};
pub use watcher::Watcher;

pub use cli::{Cli, run};
