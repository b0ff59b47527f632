/// File categorization for downloaded mod content.
///
/// Every file name maps to exactly one [`Category`] using fixed extension tables.
/// Classification looks only at the name, never at file contents.
///
/// # Examples
///
/// ```
/// use modsort::file_category::{Category, classify};
///
/// assert_eq!(classify("CoolHair.package"), Category::Mod);
/// assert_eq!(classify("House.bpi"), Category::Tray);
/// assert_eq!(classify("readme.txt"), Category::Trash);
/// assert_eq!(classify("MyLot.zip"), Category::Archive);
/// ```
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// File names that are always junk, compared case-insensitively.
const TRASH_NAMES: &[&str] = &["thumbs.db", "desktop.ini", ".ds_store"];

/// Extensions of documents, previews and shortcuts that ship alongside mods.
const TRASH_EXTENSIONS: &[&str] = &[
    ".txt", ".md", ".rtf", ".docx", ".pdf", ".jpg", ".jpeg", ".png", ".webp", ".url", ".ini",
];

const MOD_EXTENSIONS: &[&str] = &[".package", ".ts4script"];

const TRAY_EXTENSIONS: &[&str] = &[
    ".trayitem",
    ".blueprint",
    ".bpi",
    ".householdbinary",
    ".hhi",
    ".sgi",
    ".room",
    ".rmi",
];

const SAVE_EXTENSIONS: &[&str] = &[".save"];

/// Archive formats the extractor knows how to unpack.
pub const ARCHIVE_EXTENSIONS: &[&str] = &[".zip", ".rar", ".7z"];

/// Represents the classification bucket of a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    /// Game mods (`.package`, `.ts4script`)
    Mod,
    /// Tray items: lots, rooms and households
    Tray,
    /// Save games
    Save,
    /// Archives that must be unpacked first
    Archive,
    /// Junk that gets deleted
    Trash,
    /// Anything else, left untouched
    Unknown,
}

impl Category {
    /// All categories in display order.
    pub const ALL: [Category; 6] = [
        Category::Mod,
        Category::Tray,
        Category::Save,
        Category::Archive,
        Category::Trash,
        Category::Unknown,
    ];

    /// Returns the lowercase identifier of this category.
    ///
    /// # Examples
    ///
    /// ```
    /// use modsort::file_category::Category;
    ///
    /// assert_eq!(Category::Mod.as_str(), "mod");
    /// assert_eq!(Category::Unknown.as_str(), "unknown");
    /// ```
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Mod => "mod",
            Category::Tray => "tray",
            Category::Save => "save",
            Category::Archive => "archive",
            Category::Trash => "trash",
            Category::Unknown => "unknown",
        }
    }

    /// Returns a human-readable description of this category.
    pub fn description(&self) -> &'static str {
        match self {
            Category::Mod => "Mods",
            Category::Tray => "Tray items",
            Category::Save => "Saves",
            Category::Archive => "Archives",
            Category::Trash => "Junk files",
            Category::Unknown => "Unknown files",
        }
    }

    /// True for categories that are relocated into a destination folder.
    pub fn is_movable(&self) -> bool {
        matches!(self, Category::Mod | Category::Tray | Category::Save)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returns the lowercase extension of `file_name` including the leading dot.
///
/// A name without a dot, or a dotfile such as `.ds_store`, has no extension and
/// yields an empty string.
///
/// # Examples
///
/// ```
/// use modsort::file_category::extension_of;
///
/// assert_eq!(extension_of("Mod.PACKAGE"), ".package");
/// assert_eq!(extension_of("archive.tar.7z"), ".7z");
/// assert_eq!(extension_of("README"), "");
/// ```
pub fn extension_of(file_name: &str) -> String {
    Path::new(file_name)
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy().to_lowercase()))
        .unwrap_or_default()
}

/// True when `path` has one of the [`ARCHIVE_EXTENSIONS`].
pub fn is_archive_path(path: &Path) -> bool {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy())
        .unwrap_or_default();
    ARCHIVE_EXTENSIONS.contains(&extension_of(&name).as_str())
}

/// Classifies a file by its name.
///
/// Rules are checked in priority order and the first match wins:
/// 1. junk file names
/// 2. junk extensions
/// 3. mod extensions
/// 4. tray extensions
/// 5. save extensions, or a name containing `.save`
/// 6. archive extensions
/// 7. everything else is [`Category::Unknown`]
///
/// # Examples
///
/// ```
/// use modsort::file_category::{Category, classify};
///
/// assert_eq!(classify("Thumbs.db"), Category::Trash);
/// assert_eq!(classify("Slot_00000002.save.ver0"), Category::Save);
/// assert_eq!(classify("notes"), Category::Unknown);
/// ```
pub fn classify(file_name: &str) -> Category {
    let lower = file_name.to_lowercase();
    let ext = extension_of(&lower);
    let ext = ext.as_str();

    if TRASH_NAMES.contains(&lower.as_str()) {
        return Category::Trash;
    }
    if TRASH_EXTENSIONS.contains(&ext) {
        return Category::Trash;
    }
    if MOD_EXTENSIONS.contains(&ext) {
        return Category::Mod;
    }
    if TRAY_EXTENSIONS.contains(&ext) {
        return Category::Tray;
    }
    if SAVE_EXTENSIONS.contains(&ext) || lower.contains(".save") {
        return Category::Save;
    }
    if ARCHIVE_EXTENSIONS.contains(&ext) {
        return Category::Archive;
    }
    Category::Unknown
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_mods() {
        assert_eq!(classify("CoolHair.package"), Category::Mod);
        assert_eq!(classify("mc_cmd_center.ts4script"), Category::Mod);
    }

    #[test]
    fn test_classify_tray() {
        assert_eq!(classify("House.bpi"), Category::Tray);
        assert_eq!(classify("0x1.trayitem"), Category::Tray);
        assert_eq!(classify("lot.blueprint"), Category::Tray);
        assert_eq!(classify("family.householdbinary"), Category::Tray);
    }

    #[test]
    fn test_classify_saves() {
        assert_eq!(classify("Slot_00000001.save"), Category::Save);
        assert_eq!(classify("Slot_00000001.save.ver2"), Category::Save);
    }

    #[test]
    fn test_classify_archives() {
        assert_eq!(classify("pack.zip"), Category::Archive);
        assert_eq!(classify("pack.rar"), Category::Archive);
        assert_eq!(classify("pack.7z"), Category::Archive);
    }

    #[test]
    fn test_classify_trash() {
        assert_eq!(classify("Thumbs.db"), Category::Trash);
        assert_eq!(classify("THUMBS.DB"), Category::Trash);
        assert_eq!(classify("readme.txt"), Category::Trash);
        assert_eq!(classify("preview.PNG"), Category::Trash);
        assert_eq!(classify("Visit my Patreon.url"), Category::Trash);
    }

    #[test]
    fn test_trash_extension_wins_over_save_substring() {
        // ".txt" is checked before the ".save" substring rule
        assert_eq!(classify("how.to.save.txt"), Category::Trash);
    }

    #[test]
    fn test_classify_unknown() {
        assert_eq!(classify("notes"), Category::Unknown);
        assert_eq!(classify("mod.tar.gz"), Category::Unknown);
        assert_eq!(classify(""), Category::Unknown);
        assert_eq!(classify("."), Category::Unknown);
    }

    #[test]
    fn test_classify_case_insensitive() {
        assert_eq!(classify("MOD.PACKAGE"), classify("mod.package"));
        assert_eq!(classify("Pack.ZIP"), Category::Archive);
    }

    #[test]
    fn test_classify_is_deterministic() {
        for name in ["a.package", "b.bpi", "c.save", "d.zip", "e.txt", "f.bin"] {
            assert_eq!(classify(name), classify(name));
        }
    }

    #[test]
    fn test_classify_is_total_over_odd_names() {
        let names = [
            "..",
            ".package",
            "файл.package",
            "名前.bpi",
            "trailing.",
            "multi..dots..zip",
            "\u{1F600}.7z",
        ];
        for name in names {
            assert!(Category::ALL.contains(&classify(name)));
        }
    }

    #[test]
    fn test_extension_of() {
        assert_eq!(extension_of("a.Package"), ".package");
        assert_eq!(extension_of("noext"), "");
        assert_eq!(extension_of(".ds_store"), "");
    }

    #[test]
    fn test_is_archive_path() {
        assert!(is_archive_path(Path::new("/tmp/x/Extra.ZIP")));
        assert!(!is_archive_path(Path::new("/tmp/x/Extra.package")));
    }

    #[test]
    fn test_category_serializes_lowercase() {
        let json = serde_json::to_string(&Category::Tray).unwrap();
        assert_eq!(json, "\"tray\"");
    }
}
