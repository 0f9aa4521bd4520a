//! Saved clone runs.
//!
//! Every submitted clone leaves one JSON [`CloneRecord`] in the history
//! directory, whether it succeeded or not. `vmclone log` reads them back.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write as _};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use facet::Facet;

use crate::dialog::CloneDialog;
use crate::error::CloneError;

#[derive(Debug, Clone, PartialEq, Eq, Facet)]
pub struct CloneRecord {
    /// Unix time in milliseconds.
    pub finished_at: u64,
    pub vm: String,
    pub connection: String,
    pub clone_name: String,
    pub reflink: bool,
    pub success: bool,
    /// Everything `virt-clone` printed, or the error when it never started.
    pub output: String,
}

impl CloneRecord {
    /// Record of the submit that just returned on `dialog`.
    pub fn from_dialog(dialog: &CloneDialog, success: bool) -> Self {
        let output = match dialog.error() {
            Some(err) if dialog.output().is_empty() => err.detail.clone(),
            _ => dialog.output().to_string(),
        };
        Self {
            finished_at: now_millis(),
            vm: dialog.source().name.clone(),
            connection: dialog.source().scope.to_string(),
            clone_name: dialog.name().trim().to_string(),
            reflink: dialog.reflink(),
            success,
            output,
        }
    }

    pub fn finished_at_display(&self) -> String {
        i64::try_from(self.finished_at)
            .ok()
            .and_then(chrono::DateTime::from_timestamp_millis)
            .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
            .unwrap_or_else(|| self.finished_at.to_string())
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// A record together with the file it was read from.
#[derive(Debug, Clone)]
pub struct SavedRecord {
    pub path: PathBuf,
    pub record: CloneRecord,
}

pub struct History {
    dir: PathBuf,
}

impl History {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write `record` as `<finished_at>.json`, with a counter suffix when two
    /// runs finish in the same millisecond.
    pub fn save(&self, record: &CloneRecord) -> Result<PathBuf, CloneError> {
        fs::create_dir_all(&self.dir).map_err(|e| CloneError::Io {
            context: format!("creating {}", self.dir.display()),
            source: e,
        })?;
        let json = facet_json::to_string(record).map_err(|e| CloneError::Io {
            context: "encoding clone record".into(),
            source: std::io::Error::other(e.to_string()),
        })?;

        let mut attempt = 0u32;
        loop {
            let file_name = match attempt {
                0 => format!("{}.json", record.finished_at),
                n => format!("{}-{n}.json", record.finished_at),
            };
            let path = self.dir.join(file_name);
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    file.write_all(json.as_bytes()).map_err(|e| CloneError::Io {
                        context: format!("writing {}", path.display()),
                        source: e,
                    })?;
                    return Ok(path);
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => attempt += 1,
                Err(e) => {
                    return Err(CloneError::Io {
                        context: format!("creating {}", path.display()),
                        source: e,
                    });
                }
            }
        }
    }

    /// All readable records, oldest first. Unreadable files are skipped.
    pub fn records(&self) -> Vec<SavedRecord> {
        let Ok(entries) = fs::read_dir(&self.dir) else {
            return Vec::new();
        };

        let mut saved: Vec<SavedRecord> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
            .filter_map(|path| match read_record(&path) {
                Ok(record) => Some(SavedRecord { path, record }),
                Err(reason) => {
                    tracing::debug!(path = %path.display(), %reason, "skipping clone record");
                    None
                }
            })
            .collect();
        saved.sort_by_key(|s| s.record.finished_at);
        saved
    }

    pub fn latest(&self, failed_only: bool) -> Option<SavedRecord> {
        self.records()
            .into_iter()
            .rev()
            .find(|s| !failed_only || !s.record.success)
    }

    /// Keep only the newest `keep` records for `clone_name`.
    pub fn prune(&self, clone_name: &str, keep: usize) {
        let same_name: Vec<SavedRecord> = self
            .records()
            .into_iter()
            .filter(|s| s.record.clone_name == clone_name)
            .collect();
        let excess = same_name.len().saturating_sub(keep);
        for old in &same_name[..excess] {
            if let Err(e) = fs::remove_file(&old.path) {
                tracing::debug!(path = %old.path.display(), error = %e, "could not prune clone record");
            }
        }
    }
}

fn read_record(path: &Path) -> Result<CloneRecord, String> {
    let text = fs::read_to_string(path).map_err(|e| e.to_string())?;
    facet_json::from_str(&text).map_err(|e| e.to_string())
}
