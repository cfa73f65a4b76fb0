//! Snapshot/rollback — exact pre-mutation file state for Deliberate-tier
//! applies.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::SnapshotError;

/// Captured file state. `None` marks a file that did not exist at capture
/// time and must be deleted on rollback.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    files: BTreeMap<PathBuf, Option<String>>,
}

impl Snapshot {
    /// Record the exact current content of every target path.
    ///
    /// A missing file is stored as an absence marker. Any other read error
    /// aborts the capture — mutation must not start without a complete
    /// snapshot.
    pub async fn capture<I, P>(paths: I) -> Result<Self, SnapshotError>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let mut files = BTreeMap::new();
        for path in paths {
            let path = path.as_ref();
            let content = match tokio::fs::read_to_string(path).await {
                Ok(content) => Some(content),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
                Err(e) => {
                    return Err(SnapshotError::Capture {
                        path: path.display().to_string(),
                        message: e.to_string(),
                    });
                }
            };
            files.insert(path.to_path_buf(), content);
        }
        Ok(Self { files })
    }

    /// Restore every file to its captured state: rewrite existing content
    /// verbatim, delete files that were absent.
    ///
    /// Best-effort across the set — a failed restore is logged and counted,
    /// and restoration continues with the remaining files. Exact per file,
    /// idempotent across repeated invocations.
    pub async fn rollback(&self) -> u32 {
        let mut errors = 0u32;
        for (path, original) in &self.files {
            match original {
                Some(content) => {
                    if let Some(parent) = path.parent()
                        && let Err(e) = tokio::fs::create_dir_all(parent).await
                    {
                        tracing::warn!(path = %path.display(), error = %e, "rollback: failed to recreate parent");
                        errors += 1;
                        continue;
                    }
                    if let Err(e) = tokio::fs::write(path, content).await {
                        tracing::warn!(path = %path.display(), error = %e, "rollback: failed to restore file");
                        errors += 1;
                    }
                }
                None => match tokio::fs::remove_file(path).await {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "rollback: failed to delete file");
                        errors += 1;
                    }
                },
            }
        }
        errors
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }
}
