//! Result collector.
//!
//! Walks a job's reports directory depth-first, entries sorted by name at
//! each level, and yields every regular file as a [`ReportArtifact`]. Walking
//! the same unchanged directory twice yields the same sequence.

use std::path::{Path, PathBuf};

use bytes::Bytes;
use tracing::{debug, info};

use crate::models::ReportArtifact;
use crate::{AppError, Result};

use super::outbound::Outbound;

/// Lazy, ordered walk over a reports directory.
#[derive(Debug)]
pub struct ReportWalker {
    /// Paths still to visit; the next one is at the end.
    pending: Vec<PathBuf>,
}

impl ReportWalker {
    /// Start a walk rooted at `root`.
    #[must_use]
    pub fn new(root: &Path) -> Self {
        Self {
            pending: vec![root.to_path_buf()],
        }
    }

    /// Read the next artifact, or `None` once the walk is complete.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Collect` on any directory or file read failure.
    /// The walk must not be resumed after an error.
    pub async fn next_artifact(&mut self) -> Result<Option<ReportArtifact>> {
        while let Some(path) = self.pending.pop() {
            let meta = tokio::fs::metadata(&path)
                .await
                .map_err(|err| collect_err("stat", &path, &err))?;

            if meta.is_dir() {
                self.push_children(&path).await?;
            } else if meta.is_file() {
                let payload = tokio::fs::read(&path)
                    .await
                    .map_err(|err| collect_err("read", &path, &err))?;
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                return Ok(Some(ReportArtifact {
                    name,
                    payload: Bytes::from(payload),
                }));
            } else {
                debug!(path = %path.display(), "skipping non-regular report entry");
            }
        }
        Ok(None)
    }

    async fn push_children(&mut self, dir: &Path) -> Result<()> {
        let mut entries = tokio::fs::read_dir(dir)
            .await
            .map_err(|err| collect_err("list", dir, &err))?;
        let mut children = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|err| collect_err("list", dir, &err))?
        {
            // Symlinked directories are not followed, which rules out cycles.
            let file_type = entry
                .file_type()
                .await
                .map_err(|err| collect_err("stat", &entry.path(), &err))?;
            if file_type.is_symlink() {
                let target = tokio::fs::metadata(entry.path()).await;
                if !matches!(target, Ok(ref m) if m.is_file()) {
                    continue;
                }
            }
            children.push(entry.path());
        }
        children.sort();
        // Reverse so the smallest name is popped first.
        self.pending.extend(children.into_iter().rev());
        Ok(())
    }
}

/// Stream every artifact under `reports_dir` to the caller.
///
/// Each artifact carries the same full engine log. Artifacts already sent
/// stay sent if a later one fails.
///
/// # Errors
///
/// Returns `AppError::NoResults` if `reports_dir` is not a directory, and
/// `AppError::Collect` if reading or sending an artifact fails.
pub async fn collect_reports(reports_dir: &Path, full_log: &Bytes, outbound: &Outbound) -> Result<usize> {
    if !is_dir(reports_dir).await {
        return Err(AppError::NoResults(format!(
            "directory {} was not found",
            reports_dir.display()
        )));
    }

    let mut walker = ReportWalker::new(reports_dir);
    let mut sent = 0usize;
    while let Some(artifact) = walker.next_artifact().await? {
        outbound
            .send_report(&artifact, full_log)
            .await
            .map_err(|err| AppError::Collect(format!("failed to send report {}: {err}", artifact.name)))?;
        debug!(name = %artifact.name, bytes = artifact.payload.len(), "report sent");
        sent += 1;
    }

    info!(reports_dir = %reports_dir.display(), sent, "reports collected");
    Ok(sent)
}

/// Whether `path` exists and is a directory.
pub async fn is_dir(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .is_ok_and(|m| m.is_dir())
}

fn collect_err(action: &str, path: &Path, err: &std::io::Error) -> AppError {
    AppError::Collect(format!("failed to {action} {}: {err}", path.display()))
}
