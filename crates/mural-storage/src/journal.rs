//! Diagnostic JSON-lines journals.

use serde::Serialize;
use std::io::Write;
use std::path::PathBuf;
use tracing::warn;

/// An append-only JSON-lines file for diagnostic events.
///
/// Journals are never read back by the state machine; a failed append is
/// logged and otherwise ignored.
#[derive(Debug, Clone)]
pub struct Journal {
    path: PathBuf,
}

impl Journal {
    /// Creates a journal at `path`, creating parent directories as needed.
    pub fn open(path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(Self { path })
    }

    /// Appends one event as a single JSON line.
    pub fn append<T: Serialize>(&self, event: &T) {
        let result = (|| -> std::io::Result<()> {
            let mut line = serde_json::to_vec(event)?;
            line.push(b'\n');
            let mut file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)?;
            file.write_all(&line)
        })();
        if let Err(e) = result {
            warn!(path = %self.path.display(), error = %e, "Failed to append journal entry");
        }
    }
}
