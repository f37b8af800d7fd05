use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::types::StampRecord;

/// Buffers accepted stamps and writes them once, appending to the array on
/// disk unless `fresh`
pub struct JsonExport {
    path: PathBuf,
    fresh: bool,
    pending: Vec<StampRecord>,
}

impl JsonExport {
    pub fn new(path: impl Into<PathBuf>, fresh: bool) -> Self {
        Self {
            path: path.into(),
            fresh,
            pending: Vec::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn push(&mut self, batch: &[StampRecord]) {
        self.pending.extend_from_slice(batch);
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Write buffered records. Returns the total number of entries in the file,
    /// or `None` if there was nothing to write.
    pub fn finish(self) -> Result<Option<usize>> {
        if self.pending.is_empty() && !self.fresh {
            return Ok(None);
        }

        let mut entries = if self.fresh {
            Vec::new()
        } else {
            load_existing(&self.path)?
        };
        for stamp in &self.pending {
            entries.push(serde_json::to_value(stamp)?);
        }

        write_snapshot(&self.path, &entries)?;
        Ok(Some(entries.len()))
    }
}

/// Entries of an existing export. A missing file or one that is not a JSON
/// array starts a new array; any other read failure is an error, so the file
/// is left untouched.
fn load_existing(path: &Path) -> Result<Vec<Value>> {
    let content = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to read existing export {}", path.display()))
        }
    };
    match serde_json::from_str::<Vec<Value>>(&content) {
        Ok(entries) => Ok(entries),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "existing export is not a JSON array, starting over");
            Ok(Vec::new())
        }
    }
}

/// Write `rows` as a pretty-printed JSON array with a trailing newline
pub fn write_snapshot<T: Serialize>(path: &Path, rows: &[T]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let mut json = serde_json::to_string_pretty(rows)?;
    json.push('\n');
    fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}
