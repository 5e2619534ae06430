//! The unread-count polling loop.

use crate::config::{ActionConfig, Config, Mode};
use crate::errors::HarvestError;
use crate::page::Page;
use crate::selectors;
use crate::snapshot::SnapshotSink;
use crate::strategy::{Scope, Strategies};
use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Source of the current number of unread conversations
#[async_trait::async_trait]
pub trait UnreadCounter: Send + Sync {
    async fn unread_count(&self) -> Result<usize, HarvestError>;
}

/// Counts unread markers on the page with the first strategy that matches any
pub struct PageUnreadCounter {
    page: Page,
    strategies: Strategies,
}

impl PageUnreadCounter {
    pub fn new(page: Page) -> Self {
        Self {
            page,
            strategies: Strategies::from_strs(selectors::UNREAD),
        }
    }

    pub fn from_config(page: Page, config: &Config) -> Self {
        let mut counter = Self::new(page);
        if let Some(unread) = &config.selector_overrides().unread {
            counter.strategies = Strategies::from_strs(unread);
        }
        counter
    }
}

#[async_trait::async_trait]
impl UnreadCounter for PageUnreadCounter {
    async fn unread_count(&self) -> Result<usize, HarvestError> {
        let found = self.strategies.first_match(Scope::Page(&self.page)).await?;
        Ok(found.map_or(0, |m| m.elements.len()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// Monitoring or new-message detection is switched off
    Skipped,
    Stable(usize),
    Increased { previous: usize, current: usize },
    Decreased { previous: usize, current: usize },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MonitorReport {
    pub polls: usize,
    pub failures: usize,
    pub increases: usize,
    pub decreases: usize,
}

pub struct Monitor {
    counter: Arc<dyn UnreadCounter>,
    page: Page,
    config: Arc<Config>,
    snapshots: Arc<dyn SnapshotSink>,
    session: Option<Arc<Mutex<()>>>,
    interval: Duration,
    last_unread_count: usize,
}

impl Monitor {
    pub fn new(
        counter: Arc<dyn UnreadCounter>,
        page: Page,
        config: Arc<Config>,
        snapshots: Arc<dyn SnapshotSink>,
    ) -> Self {
        let interval = config.polling_interval();
        Self {
            counter,
            page,
            config,
            snapshots,
            session: None,
            interval,
            last_unread_count: 0,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Hold `gate` for the duration of every poll so other users of the same
    /// browser session never interleave with it
    pub fn with_session_gate(mut self, gate: Arc<Mutex<()>>) -> Self {
        self.session = Some(gate);
        self
    }

    pub fn last_unread_count(&self) -> usize {
        self.last_unread_count
    }

    /// Poll once and react to a change of the unread count
    pub async fn poll_once(&mut self) -> Result<PollOutcome, HarvestError> {
        if !self.config.monitoring_enabled() {
            debug!("Monitoring is disabled");
            return Ok(PollOutcome::Skipped);
        }
        if !self.config.detect_new_messages() {
            debug!("New message detection is disabled");
            return Ok(PollOutcome::Skipped);
        }

        let gate = self.session.clone();
        let _guard = match &gate {
            Some(gate) => Some(gate.lock().await),
            None => None,
        };

        let current = self.counter.unread_count().await?;
        let previous = self.last_unread_count;

        let outcome = if current > previous {
            let new_messages = current - previous;
            info!(previous, current, "🔔 New messages detected");
            if self.config.save_screenshots() {
                let context = format!(
                    "Previous unread count: {previous}\nCurrent unread count: {current}\nNew messages: {new_messages}\n"
                );
                self.snapshots
                    .capture(&self.page, "new_messages_detected", &context)
                    .await;
            }
            self.dispatch_actions(new_messages, current).await;
            if self.config.notifications_enabled() {
                self.notify(&format!("New messages: {new_messages}"));
            }
            PollOutcome::Increased { previous, current }
        } else if current < previous {
            debug!(previous, current, "Unread count decreased");
            if self.config.save_screenshots() {
                let context = format!(
                    "Unread count decreased\nPrevious: {previous}\nCurrent: {current}\n"
                );
                self.snapshots
                    .capture(&self.page, "messages_count_decreased", &context)
                    .await;
            }
            PollOutcome::Decreased { previous, current }
        } else {
            PollOutcome::Stable(current)
        };

        self.last_unread_count = current;
        Ok(outcome)
    }

    /// Poll until `cancel` fires. A failed poll is logged, optionally snapshotted,
    /// and retried after the usual interval.
    #[instrument(skip(self, cancel), fields(interval = ?self.interval))]
    pub async fn run(&mut self, cancel: CancellationToken) -> MonitorReport {
        let mut report = MonitorReport::default();
        info!("🔄 Starting monitoring loop");

        if self.config.save_screenshots() {
            let context = format!(
                "Monitoring started with interval {:?}\nMode: {}\nScope: {:?}",
                self.interval,
                mode_name(&self.config.mode()),
                self.config.scope()
            );
            self.capture_gated("monitoring_start", &context).await;
        }

        while !cancel.is_cancelled() {
            report.polls += 1;
            match self.poll_once().await {
                Ok(PollOutcome::Increased { .. }) => report.increases += 1,
                Ok(PollOutcome::Decreased { .. }) => report.decreases += 1,
                Ok(_) => {}
                Err(e) => {
                    report.failures += 1;
                    error!(error = %e, "Monitoring poll failed");
                    if self.config.screenshot_on_error() {
                        let context = format!("ERROR: {e}\n");
                        self.capture_gated("error", &context).await;
                    }
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }

        info!(
            polls = report.polls,
            failures = report.failures,
            increases = report.increases,
            "⏹️ Monitoring stopped"
        );
        if self.config.save_screenshots() {
            self.capture_gated("monitoring_stop", "Monitoring stopped").await;
        }
        report
    }

    /// Snapshot outside a poll, still behind the session gate
    async fn capture_gated(&self, event: &str, context: &str) {
        let _guard = match &self.session {
            Some(gate) => Some(gate.lock().await),
            None => None,
        };
        self.snapshots.capture(&self.page, event, context).await;
    }

    async fn dispatch_actions(&self, new_messages: usize, unread_count: usize) {
        for action in self.config.new_message_actions() {
            if !action.enabled {
                continue;
            }
            match action.kind.as_str() {
                "log" => info!(new_messages, "📝 Logging new messages"),
                "mark_as_read" => info!("✅ Mark-as-read requested, leaving remote state untouched"),
                "save_to_file" => {
                    if let Err(e) = append_event(action, new_messages, unread_count).await {
                        warn!(error = %e, "Failed to save new message event");
                    }
                }
                other => warn!(action = %other, "Unknown new message action"),
            }
        }
    }

    fn notify(&self, message: &str) {
        for method in self.config.notification_methods() {
            match method.as_str() {
                "console" => println!("🔔 {message}"),
                "log_file" => info!(target: "notifications", "{message}"),
                other => debug!(method = %other, "Unknown notification method"),
            }
        }
    }
}

fn mode_name(mode: &Mode) -> &str {
    match mode {
        Mode::Monitor => "monitor",
        Mode::Extract => "extract",
        Mode::Other(other) => other,
    }
}

/// Append one line describing an increase event, JSON unless another format is set
async fn append_event(
    action: &ActionConfig,
    new_messages: usize,
    unread_count: usize,
) -> Result<(), HarvestError> {
    let path = Path::new(action.file_path.as_deref().unwrap_or("./data/messages.txt"));
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }

    let timestamp = Utc::now();
    let mut line = match action.format.as_deref().unwrap_or("json") {
        "json" => serde_json::to_string(&json!({
            "timestamp": timestamp,
            "new_messages": new_messages,
            "unread_count": unread_count,
        }))?,
        _ => format!(
            "{} new_messages={new_messages} unread_count={unread_count}",
            timestamp.to_rfc3339()
        ),
    };
    line.push('\n');

    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(line.as_bytes()).await?;
    file.flush().await?;
    debug!(path = %path.display(), "Saved new message event");
    Ok(())
}
