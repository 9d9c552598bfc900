//! File-backed cache store using JSON lines.

use std::fs::{create_dir_all, rename, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::cache::CacheEntry;
use crate::core::EngineResult;
use crate::infra::store::CacheStore;

/// One JSON-encoded [`CacheEntry`] per line.
///
/// Snapshots are written to a sibling temp file and renamed over the
/// original so a crash never leaves a half-written snapshot.
#[derive(Debug, Clone)]
pub struct JsonlCacheStore {
    path: PathBuf,
}

impl JsonlCacheStore {
    /// Store at `path`, creating the parent directory.
    pub fn open(path: impl AsRef<Path>) -> EngineResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            create_dir_all(parent)?;
        }
        Ok(Self { path })
    }

    /// Location of the snapshot file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl CacheStore for JsonlCacheStore {
    fn load(&mut self) -> EngineResult<Vec<CacheEntry>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let file = OpenOptions::new().read(true).open(&self.path)?;
        let mut entries = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            entries.push(serde_json::from_str(&line)?);
        }
        Ok(entries)
    }

    fn persist(&mut self, entries: &[&CacheEntry]) -> EngineResult<()> {
        let temp = self.temp_path();
        {
            let file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&temp)?;
            let mut writer = BufWriter::new(file);
            for entry in entries {
                let line = serde_json::to_string(entry)?;
                writeln!(writer, "{line}")?;
            }
            writer.flush()?;
        }
        rename(&temp, &self.path)?;
        Ok(())
    }
}
