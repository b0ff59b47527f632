//! Archive extraction with recursive unpacking of nested archives.
//!
//! Archives are unpacked by the 7-Zip command line tool running as a child
//! process. After the top-level archive is unpacked the output is searched for
//! further archives, which are unpacked next to where they were found and then
//! deleted, until no archive is left.
//!
//! A [`SeenSet`] records every archive already handled by absolute path, and
//! for every output folder the content digests of the archives it was unpacked
//! from. A nested archive whose bytes match one of its own enclosing archives
//! is dropped, so an archive containing a copy of itself never loops. Identical
//! archives in sibling folders are still unpacked each time.

use std::collections::{HashMap, HashSet};
use std::ffi::OsString;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::LazyLock;

use regex::Regex;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use walkdir::WalkDir;

use crate::config::{Config, ZipBackend};
use crate::error::{ModsortError, Result};
use crate::events::EventBus;
use crate::file_category::is_archive_path;

/// Matches the `NN%` markers 7-Zip prints with `-bsp1`.
static PROGRESS_RE: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"(\d{1,3})%").ok());

type Digest = [u8; 32];

/// Archives already handled during one extraction.
#[derive(Debug, Default)]
pub struct SeenSet {
    paths: HashSet<PathBuf>,
    /// Output folder -> digests of the archives it was unpacked from, outermost first.
    lineage: HashMap<PathBuf, Vec<Digest>>,
}

impl SeenSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains_path(&self, path: &Path) -> bool {
        self.paths.contains(&absolute(path))
    }

    /// Records `path`; false if it was already recorded.
    pub fn insert_path(&mut self, path: &Path) -> bool {
        self.paths.insert(absolute(path))
    }

    /// Digests of the archives enclosing `path`, outermost first.
    pub fn ancestry(&self, path: &Path) -> &[Digest] {
        let path = absolute(path);
        path.ancestors()
            .skip(1)
            .find_map(|dir| self.lineage.get(dir))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    fn record_output(&mut self, dir: &Path, chain: Vec<Digest>) {
        self.lineage.insert(absolute(dir), chain);
    }
}

/// Unpacks archives into a scratch directory.
#[derive(Debug, Clone)]
pub struct ArchiveExtractor {
    seven_zip: PathBuf,
    zip_backend: ZipBackend,
    events: EventBus,
}

impl ArchiveExtractor {
    pub fn new(seven_zip: impl Into<PathBuf>, zip_backend: ZipBackend, events: EventBus) -> Self {
        Self {
            seven_zip: seven_zip.into(),
            zip_backend,
            events,
        }
    }

    pub fn from_config(config: &Config, events: EventBus) -> Self {
        Self::new(config.seven_zip_path.clone(), config.zip_backend, events)
    }

    /// Unpacks `archive` and every archive nested inside it.
    ///
    /// The output goes to `scratch_root/<archive stem>`, replacing anything
    /// already there. Returns that directory.
    ///
    /// # Errors
    ///
    /// Fails on the first archive that cannot be unpacked. Partial output is
    /// left in place for the caller to remove.
    pub async fn extract_archive(&self, archive: &Path, scratch_root: &Path) -> Result<PathBuf> {
        let mut seen = SeenSet::new();
        let dest = self.extract_top_level(archive, scratch_root, &mut seen).await?;
        let nested = self.find_nested_archives(&dest, &seen);
        self.extract_nested(nested, &mut seen).await?;
        Ok(dest)
    }

    /// Unpacks only `archive` itself into `scratch_root/<archive stem>`.
    pub async fn extract_top_level(
        &self,
        archive: &Path,
        scratch_root: &Path,
        seen: &mut SeenSet,
    ) -> Result<PathBuf> {
        let dest = scratch_root.join(archive_stem(archive));
        if dest.exists() {
            tokio::fs::remove_dir_all(&dest)
                .await
                .map_err(|e| ModsortError::io(&dest, e))?;
        }

        seen.insert_path(archive);
        let digest = content_digest(archive).await?;
        self.extract_single(archive, &dest).await?;
        seen.record_output(&dest, vec![digest]);
        Ok(dest)
    }

    /// Lists archives under `dir` that have not been handled yet, in file-name order.
    pub fn find_nested_archives(&self, dir: &Path, seen: &SeenSet) -> Vec<PathBuf> {
        WalkDir::new(dir)
            .min_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    self.events
                        .warn(format!("Skipping unreadable entry in {}: {}", dir.display(), e));
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .filter(|path| is_archive_path(path) && !seen.contains_path(path))
            .collect()
    }

    /// Unpacks each archive in `archives` next to itself, then whatever they contain.
    ///
    /// Every unpacked archive file is deleted afterwards. An archive that is
    /// byte-identical to one of the archives it was found inside is deleted
    /// without unpacking.
    pub async fn extract_nested(&self, archives: Vec<PathBuf>, seen: &mut SeenSet) -> Result<()> {
        let mut stack: Vec<PathBuf> = archives.into_iter().rev().collect();

        while let Some(nested) = stack.pop() {
            if !seen.insert_path(&nested) {
                continue;
            }
            let digest = content_digest(&nested).await?;
            let mut chain = seen.ancestry(&nested).to_vec();
            if chain.contains(&digest) {
                self.events.warn(format!(
                    "Archive {} is a copy of an archive enclosing it, dropping it",
                    nested.display()
                ));
                self.remove_archive(&nested).await;
                continue;
            }

            let parent = nested.parent().unwrap_or(Path::new("."));
            let nested_dest = parent.join(archive_stem(&nested));
            self.extract_single(&nested, &nested_dest).await?;
            self.remove_archive(&nested).await;
            chain.push(digest);
            seen.record_output(&nested_dest, chain);

            let more = self.find_nested_archives(&nested_dest, seen);
            stack.extend(more.into_iter().rev());
        }

        Ok(())
    }

    /// Unpacks one archive into `dest` without looking inside the result.
    pub async fn extract_single(&self, archive: &Path, dest: &Path) -> Result<()> {
        tokio::fs::create_dir_all(dest)
            .await
            .map_err(|e| ModsortError::io(dest, e))?;

        self.events.info(format!(
            "Extracting {} -> {}",
            archive.display(),
            dest.display()
        ));

        let is_zip = archive
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("zip"));
        if is_zip && self.zip_backend == ZipBackend::Builtin {
            let (src, out) = (archive.to_path_buf(), dest.to_path_buf());
            tokio::task::spawn_blocking(move || unzip(&src, &out)).await??;
        } else {
            self.run_seven_zip(archive, dest).await?;
        }

        self.events.info(format!("Extracted {}", archive.display()));
        Ok(())
    }

    async fn run_seven_zip(&self, archive: &Path, dest: &Path) -> Result<()> {
        let mut output_switch = OsString::from("-o");
        output_switch.push(dest);

        let mut child = Command::new(&self.seven_zip)
            .arg("x")
            .arg("-y")
            .arg(output_switch)
            .args(["-bsp1", "-bso1", "-sccUTF-8", "-scsUTF-8"])
            .arg(archive)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ModsortError::ExtractorLaunch {
                archive: archive.to_path_buf(),
                tool: self.seven_zip.clone(),
                source,
            })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let mut last_percent = None;
        let (out_text, err_text, status) = tokio::join!(
            drain(stdout, |chunk| {
                if let Some(percent) = parse_progress(chunk)
                    && last_percent != Some(percent)
                {
                    last_percent = Some(percent);
                    tracing::debug!("{}: {}%", archive.display(), percent);
                }
            }),
            drain(stderr, |_| {}),
            child.wait()
        );
        let status = status.map_err(|e| ModsortError::io(archive, e))?;

        if !status.success() {
            let diagnostics = if err_text.trim().is_empty() {
                out_text.trim().to_string()
            } else {
                err_text.trim().to_string()
            };
            self.events.error(format!(
                "Extraction of {} failed ({}): {}",
                archive.display(),
                status,
                diagnostics
            ));
            return Err(ModsortError::ExtractionFailed {
                archive: archive.to_path_buf(),
                status,
                diagnostics,
            });
        }
        Ok(())
    }

    async fn remove_archive(&self, path: &Path) {
        if let Err(e) = tokio::fs::remove_file(path).await {
            self.events.warn(format!(
                "Could not delete unpacked archive {}: {}",
                path.display(),
                e
            ));
        }
    }
}

/// Returns the last progress percentage in a chunk of 7-Zip output.
///
/// Output without a usable marker yields `None`; that is not an error.
pub fn parse_progress(text: &str) -> Option<u8> {
    PROGRESS_RE
        .as_ref()?
        .captures_iter(text)
        .filter_map(|caps| caps[1].parse::<u8>().ok())
        .filter(|p| *p <= 100)
        .last()
}

/// The archive's file name without its final extension.
pub fn archive_stem(archive: &Path) -> OsString {
    archive
        .file_stem()
        .map(|s| s.to_os_string())
        .unwrap_or_else(|| OsString::from("archive"))
}

/// Reads a child stream to the end, handing each chunk to `on_chunk`.
async fn drain<R, F>(reader: Option<R>, mut on_chunk: F) -> String
where
    R: AsyncRead + Unpin,
    F: FnMut(&str),
{
    let Some(mut reader) = reader else {
        return String::new();
    };
    let mut collected = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                on_chunk(&String::from_utf8_lossy(&buf[..n]));
                collected.extend_from_slice(&buf[..n]);
            }
        }
    }
    String::from_utf8_lossy(&collected).into_owned()
}

fn unzip(archive: &Path, dest: &Path) -> Result<()> {
    let file = File::open(archive).map_err(|e| ModsortError::io(archive, e))?;
    let mut zip = zip::ZipArchive::new(file).map_err(|source| ModsortError::Zip {
        archive: archive.to_path_buf(),
        source,
    })?;
    zip.extract(dest).map_err(|source| ModsortError::Zip {
        archive: archive.to_path_buf(),
        source,
    })
}

async fn content_digest(path: &Path) -> Result<Digest> {
    let owned = path.to_path_buf();
    tokio::task::spawn_blocking(move || blake3_file(&owned))
        .await?
        .map_err(|e| ModsortError::io(path, e))
}

fn blake3_file(path: &Path) -> std::io::Result<Digest> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    let mut hasher = blake3::Hasher::new();

    let mut buf = [0u8; 1024 * 128];
    loop {
        let read = reader.read(&mut buf)?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }

    Ok(*hasher.finalize().as_bytes())
}

fn absolute(path: &Path) -> PathBuf {
    path.canonicalize()
        .or_else(|_| std::path::absolute(path))
        .unwrap_or_else(|_| path.to_path_buf())
}
