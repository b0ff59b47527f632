//! Output formatting and styling module.
//!
//! Provides a centralized interface for all CLI output, including colored output,
//! progress tracking, summary tables and the nested-archive prompt.

use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, Write};
use std::path::PathBuf;

use crate::decision::NestedDecision;
use crate::file_category::Category;
use crate::file_mover::MoveOperation;
use crate::scanner::ScanSummary;

/// Manages all CLI output with consistent styling and formatting.
///
/// This struct provides methods for:
/// - Success messages (green with ✓)
/// - Error messages (red with ✗)
/// - Warning messages (yellow with ⚠)
/// - Info messages (cyan)
/// - Progress bars for move batches
/// - Summary tables with per-category counts
pub struct OutputFormatter;

impl OutputFormatter {
    /// Prints a success message in green with a checkmark.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use modsort::output::OutputFormatter;
    /// OutputFormatter::success("All mods sorted!");
    /// ```
    pub fn success(message: &str) {
        println!("{} {}", "✓".green(), message);
    }

    /// Prints an error message in red with an X mark.
    pub fn error(message: &str) {
        eprintln!("{} {}", "✗".red(), message);
    }

    /// Prints a warning message in yellow with a warning symbol.
    pub fn warning(message: &str) {
        println!("{} {}", "⚠".yellow(), message);
    }

    /// Prints an info message in cyan.
    pub fn info(message: &str) {
        println!("{}", message.cyan());
    }

    pub fn plain(message: &str) {
        println!("{}", message);
    }

    /// Prints a section header.
    pub fn header(header: &str) {
        println!("\n{}", header.bold());
    }

    /// Creates a progress bar for a move batch of `total` items.
    ///
    /// Items unpacked from archives count too, so the position may pass
    /// `total`; the length grows to match.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use modsort::output::OutputFormatter;
    /// let pb = OutputFormatter::create_progress_bar(10);
    /// pb.set_position(3);
    /// pb.finish_with_message("Sorted");
    /// ```
    pub fn create_progress_bar(total: u64) -> ProgressBar {
        let pb = ProgressBar::new(total);
        let style = ProgressStyle::default_bar()
            .template("{spinner:.cyan} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▓░");
        pb.set_style(style);
        pb
    }

    /// Prints a table of scan counts, one row per category.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use modsort::output::OutputFormatter;
    /// use modsort::scanner::ScanSummary;
    ///
    /// let summary = ScanSummary { mods: 3, archive: 1, total: 4, ..Default::default() };
    /// OutputFormatter::summary_table(&summary);
    /// ```
    pub fn summary_table(summary: &ScanSummary) {
        Self::header("SUMMARY");

        let width = Category::ALL
            .iter()
            .map(|c| c.description().len())
            .max()
            .unwrap_or(0)
            .max(8);

        println!(
            "{:<width$} | {}",
            "Category".bold(),
            "Files".bold(),
            width = width
        );
        println!("{}", "-".repeat(width + 10));

        for category in Category::ALL {
            let count = summary.count(category);
            let styled = if count == 0 {
                count.to_string().dimmed()
            } else {
                count.to_string().green()
            };
            println!(
                "{:<width$} | {} {}",
                category.description(),
                styled,
                file_word(count),
                width = width
            );
        }

        println!("{}", "-".repeat(width + 10));
        println!(
            "{:<width$} | {} {}",
            "Total".bold(),
            summary.total.to_string().green().bold(),
            file_word(summary.total),
            width = width
        );
    }

    /// Lists completed moves.
    pub fn operations(operations: &[MoveOperation]) {
        if operations.is_empty() {
            Self::info("Nothing was moved.");
            return;
        }
        Self::header("MOVED");
        for op in operations {
            println!(
                "  {} {} {} {}",
                format!("[{}]", op.category).cyan(),
                op.from.display(),
                "→".dimmed(),
                op.to.display()
            );
        }
    }

    /// Lists nested archives as numbered choices.
    pub fn nested_archive_choices(archives: &[PathBuf]) {
        Self::header("Archive contains several archives:");
        for (i, archive) in archives.iter().enumerate() {
            println!("  {}. {}", (i + 1).to_string().bold(), archive.display());
        }
    }

    /// Prints the question line for a nested-archive answer, without a newline.
    pub fn decision_prompt() {
        print!(
            "{} ",
            "Unpack [a]ll, [f]irst, [s]kip, or numbers like 1,3:".yellow()
        );
        let _ = io::stdout().flush();
    }
}

/// Parses an answer to the nested-archive prompt.
///
/// Numbers are 1-based positions in `archives`. An empty answer means all.
///
/// # Examples
///
/// ```
/// use modsort::decision::NestedDecision;
/// use modsort::output::parse_decision;
/// use std::path::PathBuf;
///
/// let archives = vec![PathBuf::from("a.zip"), PathBuf::from("b.zip")];
/// assert_eq!(parse_decision("f", &archives), Some(NestedDecision::First));
/// assert_eq!(
///     parse_decision("2", &archives),
///     Some(NestedDecision::Selected(vec![PathBuf::from("b.zip")]))
/// );
/// ```
pub fn parse_decision(answer: &str, archives: &[PathBuf]) -> Option<NestedDecision> {
    let answer = answer.trim().to_lowercase();
    match answer.as_str() {
        "" | "a" | "all" => return Some(NestedDecision::All),
        "f" | "first" => return Some(NestedDecision::First),
        "s" | "skip" | "none" => return Some(NestedDecision::Skip),
        _ => {}
    }

    let mut selected = Vec::new();
    for part in answer.split([',', ' ']).filter(|p| !p.is_empty()) {
        let index: usize = part.parse().ok()?;
        let archive = archives.get(index.checked_sub(1)?)?;
        if !selected.contains(archive) {
            selected.push(archive.clone());
        }
    }
    Some(NestedDecision::Selected(selected))
}

fn file_word(count: usize) -> &'static str {
    if count == 1 { "file" } else { "files" }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn archives() -> Vec<PathBuf> {
        ["one.zip", "two.rar", "three.7z"]
            .iter()
            .map(PathBuf::from)
            .collect()
    }

    #[test]
    fn test_parse_named_answers() {
        let list = archives();
        assert_eq!(parse_decision("ALL\n", &list), Some(NestedDecision::All));
        assert_eq!(parse_decision("\n", &list), Some(NestedDecision::All));
        assert_eq!(parse_decision(" first", &list), Some(NestedDecision::First));
        assert_eq!(parse_decision("none", &list), Some(NestedDecision::Skip));
    }

    #[test]
    fn test_parse_numbered_selection() {
        let list = archives();
        assert_eq!(
            parse_decision("3, 1,3", &list),
            Some(NestedDecision::Selected(vec![
                PathBuf::from("three.7z"),
                PathBuf::from("one.zip"),
            ]))
        );
    }

    #[test]
    fn test_parse_rejects_bad_numbers() {
        let list = archives();
        assert_eq!(parse_decision("0", &list), None);
        assert_eq!(parse_decision("4", &list), None);
        assert_eq!(parse_decision("maybe", &list), None);
    }

    #[test]
    fn test_file_word() {
        assert_eq!(file_word(1), "file");
        assert_eq!(file_word(0), "files");
        assert_eq!(file_word(7), "files");
    }
}
