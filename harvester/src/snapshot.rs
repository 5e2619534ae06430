//! Failure and milestone snapshots.
//!
//! A [`SnapshotSink`] is fire-and-forget: callers never inspect what it did, and a
//! sink must not fail the operation that invoked it.

use crate::page::Page;
use chrono::Local;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

#[async_trait::async_trait]
pub trait SnapshotSink: Send + Sync {
    async fn capture(&self, page: &Page, event: &str, context: &str);
}

/// Discards every snapshot
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSnapshots;

#[async_trait::async_trait]
impl SnapshotSink for NoopSnapshots {
    async fn capture(&self, _page: &Page, event: &str, _context: &str) {
        debug!(event, "snapshot skipped");
    }
}

/// Writes `{debug_dir}/{timestamp}_{event}/` with a screenshot, the page source
/// and a short text log. Every artifact is best-effort.
#[derive(Debug, Clone)]
pub struct DebugSnapshotter {
    debug_dir: PathBuf,
}

impl DebugSnapshotter {
    pub fn new(debug_dir: impl Into<PathBuf>) -> Self {
        Self {
            debug_dir: debug_dir.into(),
        }
    }

    pub fn debug_dir(&self) -> &Path {
        &self.debug_dir
    }

    fn event_dir(&self, event: &str) -> PathBuf {
        let stamp = Local::now().format("%Y%m%d_%H%M%S_%6f");
        let label: String = event
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
            .collect();
        self.debug_dir.join(format!("{stamp}_{label}"))
    }
}

#[async_trait::async_trait]
impl SnapshotSink for DebugSnapshotter {
    async fn capture(&self, page: &Page, event: &str, context: &str) {
        let dir = self.event_dir(event);
        if let Err(e) = tokio::fs::create_dir_all(&dir).await {
            warn!(dir = %dir.display(), error = %e, "Failed to create snapshot directory");
            return;
        }

        match page.screenshot().await {
            Ok(png) => {
                if let Err(e) = tokio::fs::write(dir.join("screenshot.png"), png).await {
                    debug!(error = %e, "Failed to write screenshot");
                }
            }
            Err(e) => debug!(error = %e, "Screenshot unavailable"),
        }

        match page.page_source().await {
            Ok(html) => {
                if let Err(e) = tokio::fs::write(dir.join("page_source.html"), html).await {
                    debug!(error = %e, "Failed to write page source");
                }
            }
            Err(e) => debug!(error = %e, "Page source unavailable"),
        }

        let url = page
            .current_url()
            .await
            .unwrap_or_else(|e| format!("<unavailable: {e}>"));
        let title = page
            .title()
            .await
            .unwrap_or_else(|e| format!("<unavailable: {e}>"));
        let log = format!(
            "Timestamp: {}\nEvent: {event}\nURL: {url}\nTitle: {title}\n\nAdditional Info:\n{context}\n",
            Local::now().to_rfc3339()
        );
        if let Err(e) = tokio::fs::write(dir.join("debug.log"), log).await {
            debug!(error = %e, "Failed to write snapshot log");
        }

        info!(event, dir = %dir.display(), "📸 Debug snapshot saved");
    }
}
