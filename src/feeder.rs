//! Drop-directory feeder.
//!
//! Walks a vendor's drop root, applies include/exclude globs, and turns
//! every matching file into a [`DropInput`]. ZIP archives are expanded in
//! memory: each entry that matches the vendor's include globs becomes its
//! own input named `archive.zip!entry`.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::Path;
use tracing::warn;
use walkdir::WalkDir;

use crate::config::SourceConfig;
use crate::models::Vendor;

/// One unit of work for the parser: raw bytes plus where they came from.
#[derive(Debug, Clone)]
pub struct DropInput {
    pub name: String,
    pub bytes: Vec<u8>,
    /// Hex sha256 of `bytes`; the dedup ledger key.
    pub hash: String,
    /// File mtime. Used as the parse anchor.
    pub modified: DateTime<Utc>,
}

impl DropInput {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>, modified: DateTime<Utc>) -> Self {
        let hash = content_hash(&bytes);
        Self {
            name: name.into(),
            bytes,
            hash,
            modified,
        }
    }
}

pub fn content_hash(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Include and exclude sets for one vendor drop.
pub struct DropFilter {
    include: GlobSet,
    exclude: GlobSet,
}

impl DropFilter {
    pub fn new(vendor: Vendor, source: Option<&SourceConfig>) -> Result<Self> {
        let include_globs = match source {
            Some(s) => s.include_globs_for(vendor),
            None => vendor.default_include_globs(),
        };
        let mut default_excludes = vec![
            "**/.git/**".to_string(),
            "**/target/**".to_string(),
            "**/node_modules/**".to_string(),
        ];
        if let Some(s) = source {
            default_excludes.extend(s.exclude_globs.clone());
        }
        Ok(Self {
            include: build_globset(&include_globs)?,
            exclude: build_globset(&default_excludes)?,
        })
    }

    pub fn matches(&self, relative: &str) -> bool {
        !self.exclude.is_match(relative) && self.include.is_match(relative)
    }
}

/// A file (or walk entry) that matched the drop but could not be read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnreadableInput {
    pub name: String,
    pub error: String,
}

/// Everything a drop scan found: readable inputs sorted by name, plus the
/// entries that failed to read. One bad file never hides its siblings.
#[derive(Debug, Default)]
pub struct DropScan {
    pub inputs: Vec<DropInput>,
    pub unreadable: Vec<UnreadableInput>,
}

impl DropScan {
    fn push_unreadable(&mut self, name: String, error: &anyhow::Error) {
        warn!(input = %name, error = %format!("{:#}", error), "unreadable input");
        self.unreadable.push(UnreadableInput {
            name,
            error: format!("{:#}", error),
        });
    }
}

/// Scan a drop root. Only a missing root fails the whole scan.
pub fn scan_drop(root: &Path, filter: &DropFilter, follow_symlinks: bool) -> Result<DropScan> {
    if !root.exists() {
        bail!("Drop root does not exist: {}", root.display());
    }

    let mut scan = DropScan::default();
    let walker = WalkDir::new(root).follow_links(follow_symlinks);
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                let name = e
                    .path()
                    .map(|p| relative_name(root, p))
                    .unwrap_or_else(|| root.display().to_string());
                scan.push_unreadable(name, &anyhow::Error::new(e));
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let rel_str = relative_name(root, path);
        if !filter.matches(&rel_str) {
            continue;
        }

        match read_input(path, &rel_str, filter) {
            Ok(found) => scan.inputs.extend(found),
            Err(e) => scan.push_unreadable(rel_str, &e),
        }
    }

    scan.inputs.sort_by(|a, b| a.name.cmp(&b.name));
    scan.unreadable.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(scan)
}

fn relative_name(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

/// Read a single file, expanding it when it is a ZIP archive.
pub fn read_input(path: &Path, name: &str, filter: &DropFilter) -> Result<Vec<DropInput>> {
    let modified = file_mtime(path);
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;

    if is_zip(path) {
        return read_archive(&bytes, name, filter, modified)
            .with_context(|| format!("Failed to read archive {}", path.display()));
    }
    Ok(vec![DropInput::new(name, bytes, modified)])
}

fn is_zip(path: &Path) -> bool {
    path.extension()
        .map(|e| e.eq_ignore_ascii_case("zip"))
        .unwrap_or(false)
}

fn file_mtime(path: &Path) -> DateTime<Utc> {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now())
}

/// Upper bound on the buffer reserved up front for a ZIP entry. The declared
/// size comes from the archive and is not trusted beyond this.
const PREALLOC_LIMIT: u64 = 8 * 1024 * 1024;

fn read_archive(bytes: &[u8], name: &str, filter: &DropFilter, modified: DateTime<Utc>) -> Result<Vec<DropInput>> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))?;
    let mut inputs = Vec::new();

    for i in 0..archive.len() {
        let mut file = archive.by_index(i)?;
        if !file.is_file() {
            continue;
        }
        let entry_name = file.name().to_string();
        if entry_name.to_ascii_lowercase().ends_with(".zip") || !filter.matches(&entry_name) {
            continue;
        }
        let mut data = Vec::with_capacity(file.size().min(PREALLOC_LIMIT) as usize);
        file.read_to_end(&mut data)
            .with_context(|| format!("Failed to read entry {}", entry_name))?;
        inputs.push(DropInput::new(format!("{}!{}", name, entry_name), data, modified));
    }
    Ok(inputs)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_zip(path: &Path, entries: &[(&str, &str)]) {
        let file = std::fs::File::create(path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default();
        for (name, body) in entries {
            zip.start_file(*name, options).unwrap();
            zip.write_all(body.as_bytes()).unwrap();
        }
        zip.finish().unwrap();
    }

    #[test]
    fn scans_files_and_archives_sorted() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("2025/10")).unwrap();
        std::fs::create_dir_all(root.join("node_modules")).unwrap();
        std::fs::write(root.join("2025/10/rollout-b.jsonl"), "{}").unwrap();
        std::fs::write(root.join("node_modules/rollout-x.jsonl"), "{}").unwrap();
        std::fs::write(root.join("notes.txt"), "skip").unwrap();
        write_zip(
            &root.join("export.zip"),
            &[("sessions/rollout-a.jsonl", "{\"a\":1}"), ("README.md", "skip")],
        );

        let filter = DropFilter::new(Vendor::Codex, None).unwrap();
        let inputs = scan_drop(root, &filter, false).unwrap().inputs;
        let names: Vec<&str> = inputs.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["2025/10/rollout-b.jsonl", "export.zip!sessions/rollout-a.jsonl"]);
        assert_eq!(inputs[1].bytes, b"{\"a\":1}");
        assert_eq!(inputs[0].hash, content_hash(b"{}"));
    }

    #[test]
    fn custom_excludes_apply() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("old")).unwrap();
        std::fs::write(dir.path().join("old/conversations.json"), "[]").unwrap();
        std::fs::write(dir.path().join("conversations.json"), "[]").unwrap();
        let source = SourceConfig {
            root: dir.path().to_path_buf(),
            include_globs: None,
            exclude_globs: vec!["old/**".to_string()],
            follow_symlinks: false,
        };
        let filter = DropFilter::new(Vendor::Gpt, Some(&source)).unwrap();
        let inputs = scan_drop(dir.path(), &filter, false).unwrap().inputs;
        assert_eq!(inputs.len(), 1);
        assert_eq!(inputs[0].name, "conversations.json");
    }

    #[test]
    fn broken_archive_does_not_hide_siblings() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("broken.zip"), b"definitely not a zip").unwrap();
        std::fs::write(dir.path().join("conversations.json"), "[]").unwrap();

        let filter = DropFilter::new(Vendor::Gpt, None).unwrap();
        let scan = scan_drop(dir.path(), &filter, false).unwrap();
        assert_eq!(scan.inputs.len(), 1);
        assert_eq!(scan.inputs[0].name, "conversations.json");
        assert_eq!(scan.unreadable.len(), 1);
        assert_eq!(scan.unreadable[0].name, "broken.zip");
        assert!(scan.unreadable[0].error.contains("Failed to read archive"));
    }

    #[test]
    fn large_declared_entries_still_read() {
        let dir = TempDir::new().unwrap();
        let body = "x".repeat(64 * 1024);
        write_zip(&dir.path().join("export.zip"), &[("conversations.json", body.as_str())]);

        let filter = DropFilter::new(Vendor::Gpt, None).unwrap();
        let scan = scan_drop(dir.path(), &filter, false).unwrap();
        assert_eq!(scan.inputs.len(), 1);
        assert_eq!(scan.inputs[0].bytes.len(), body.len());
    }

    #[test]
    fn missing_root_is_an_error() {
        let filter = DropFilter::new(Vendor::Gemini, None).unwrap();
        assert!(scan_drop(Path::new("/definitely/not/here"), &filter, false).is_err());
    }
}
