use crate::config::Config;
use crate::discovery::ConversationDiscovery;
use crate::errors::HarvestError;
use crate::extraction::MessageExtractor;
use crate::filter::filter_conversations;
use crate::model::{Conversation, Message};
use crate::page::{same_location, Page};
use crate::persistence::{Archive, SnapshotReport};
use crate::snapshot::{DebugSnapshotter, NoopSnapshots, SnapshotSink};
use crate::strategy::Scope;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

const MESSAGE_WAIT_POLL: Duration = Duration::from_millis(250);
const NAVIGATION_POLL: Duration = Duration::from_millis(100);

/// Outcome of one bulk extraction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExtractionStats {
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub total_messages: usize,
}

/// Ties discovery, filtering, extraction and persistence to one browser session
pub struct Harvester {
    page: Page,
    config: Arc<Config>,
    discovery: ConversationDiscovery,
    extractor: MessageExtractor,
    archive: Archive,
    snapshots: Arc<dyn SnapshotSink>,
}

impl Harvester {
    pub fn new(page: Page, config: Arc<Config>) -> Self {
        let snapshots: Arc<dyn SnapshotSink> = if config.debugging_enabled() {
            Arc::new(DebugSnapshotter::new(config.debug_dir()))
        } else {
            Arc::new(NoopSnapshots)
        };
        Self {
            discovery: ConversationDiscovery::from_config(&config),
            extractor: MessageExtractor::from_config(&config),
            archive: Archive::new(config.output_dir()),
            page,
            config,
            snapshots,
        }
    }

    pub fn with_snapshots(mut self, snapshots: Arc<dyn SnapshotSink>) -> Self {
        self.snapshots = snapshots;
        self
    }

    pub fn with_discovery(mut self, discovery: ConversationDiscovery) -> Self {
        self.discovery = discovery;
        self
    }

    pub fn with_extractor(mut self, extractor: MessageExtractor) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn with_archive(mut self, archive: Archive) -> Self {
        self.archive = archive;
        self
    }

    pub fn page(&self) -> &Page {
        &self.page
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    pub fn snapshots(&self) -> Arc<dyn SnapshotSink> {
        self.snapshots.clone()
    }

    pub fn archive(&self) -> &Archive {
        &self.archive
    }

    /// Discover conversations and apply the configured scope
    #[instrument(skip(self))]
    pub async fn list_conversations(&self) -> Result<Vec<Conversation>, HarvestError> {
        let discovered = match self.discovery.discover(&self.page).await {
            Ok(found) => found,
            Err(e) => {
                error!(error = %e, "Conversation discovery failed");
                if self.config.screenshot_on_error() {
                    self.snapshots
                        .capture(&self.page, "conversation_discovery_failed", &e.to_string())
                        .await;
                }
                return Err(e);
            }
        };
        let total = discovered.len();
        let kept = filter_conversations(discovered, &self.config);
        info!(total, kept = kept.len(), "📋 Conversations in scope");
        Ok(kept)
    }

    pub fn save_conversations(
        &self,
        conversations: &[Conversation],
    ) -> Result<SnapshotReport, HarvestError> {
        self.archive.write_conversation_snapshot(conversations)
    }

    /// Open a conversation: follow its url, else click its list entry
    pub async fn open_conversation(&self, conversation: &Conversation) -> Result<(), HarvestError> {
        match (&conversation.url, &conversation.handle) {
            (Some(url), _) if !url.trim().is_empty() => {
                let target = resolve_url(self.config.messenger_url(), url);
                debug!(%target, "Navigating to conversation");
                let before = self.page.current_url().await.unwrap_or_default();
                self.page.navigate(&target).await?;
                self.wait_for_arrival(&before, &target).await?;
            }
            (_, Some(handle)) => handle.click().await?,
            _ => {
                return Err(HarvestError::ElementNotFound(format!(
                    "conversation '{}' has neither a url nor a list entry",
                    conversation.name
                )))
            }
        }
        self.wait_for_messages().await;
        Ok(())
    }

    /// Wait until the tab has left `before` for `target`. The previous conversation's
    /// rows must never be read as this one's.
    async fn wait_for_arrival(&self, before: &str, target: &str) -> Result<(), HarvestError> {
        let deadline = tokio::time::Instant::now() + self.config.wait_timeout();
        loop {
            match self.page.current_url().await {
                Ok(url) if same_location(&url, target) || url != before => return Ok(()),
                Ok(_) => {}
                Err(e) => debug!(error = %e, "Current url unavailable while navigating"),
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(HarvestError::Timeout(format!(
                    "tab is still on {before} instead of {target}"
                )));
            }
            tokio::time::sleep(NAVIGATION_POLL).await;
        }
    }

    /// Give the message list up to the wait timeout to render. Not finding any
    /// messages is left to extraction.
    async fn wait_for_messages(&self) {
        let deadline = tokio::time::Instant::now() + self.config.wait_timeout();
        loop {
            if let Ok(Some(_)) = self
                .extractor
                .message_strategies()
                .first_match(Scope::Page(&self.page))
                .await
            {
                return;
            }
            if tokio::time::Instant::now() >= deadline {
                debug!("No messages rendered before the wait timeout");
                return;
            }
            tokio::time::sleep(MESSAGE_WAIT_POLL).await;
        }
    }

    /// Open one conversation and extract its messages
    #[instrument(skip(self, conversation), fields(conversation = %conversation.name))]
    pub async fn extract_conversation(
        &self,
        conversation: &Conversation,
    ) -> Result<Vec<Message>, HarvestError> {
        let result = match self.open_conversation(conversation).await {
            Ok(()) => self.extractor.extract(&self.page).await,
            Err(e) => Err(e),
        };
        if let Err(e) = &result {
            if e.is_session_level() && self.config.screenshot_on_error() {
                let context = format!("Conversation: {}\nERROR: {e}\n", conversation.name);
                self.snapshots
                    .capture(&self.page, "extraction_failed", &context)
                    .await;
            }
        }
        result
    }

    /// Extract and save the messages of up to `max` conversations. A failed
    /// conversation is counted and skipped.
    #[instrument(skip(self, conversations), fields(count = conversations.len()))]
    pub async fn extract_all(
        &self,
        conversations: &[Conversation],
        max: Option<usize>,
    ) -> ExtractionStats {
        let limit = max.unwrap_or(conversations.len()).min(conversations.len());
        let mut stats = ExtractionStats::default();
        info!(limit, "🚀 Starting message extraction");

        for (position, conversation) in conversations.iter().take(limit).enumerate() {
            stats.processed += 1;
            println!(
                "[{}/{}] Extracting '{}'",
                position + 1,
                limit,
                conversation.name
            );

            let saved = match self.extract_conversation(conversation).await {
                Ok(messages) => self
                    .archive
                    .write_messages(&messages, &conversation.name)
                    .map(|_| messages.len()),
                Err(e) => Err(e),
            };

            match saved {
                Ok(count) => {
                    stats.succeeded += 1;
                    stats.total_messages += count;
                    println!("  ✅ {count} messages saved");
                }
                Err(e) => {
                    stats.failed += 1;
                    error!(conversation = %conversation.name, error = %e, "Conversation extraction failed");
                    println!("  ❌ failed: {e}");
                }
            }
        }

        println!(
            "Extraction finished: {} succeeded, {} failed, {} messages total",
            stats.succeeded, stats.failed, stats.total_messages
        );
        info!(
            succeeded = stats.succeeded,
            failed = stats.failed,
            total_messages = stats.total_messages,
            "✅ Message extraction complete"
        );
        stats
    }

    /// Discover, save the conversation list, then extract up to `max` conversations
    pub async fn run_extraction(&self, max: Option<usize>) -> Result<ExtractionStats, HarvestError> {
        let conversations = self.list_conversations().await?;
        match self.save_conversations(&conversations) {
            Ok(report) if !report.failures.is_empty() => {
                warn!(failed = report.failures.len(), "Some conversation metadata was not saved")
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Failed to save conversation list"),
        }
        Ok(self.extract_all(&conversations, max).await)
    }
}

/// Resolve a conversation href against the messenger base url
pub fn resolve_url(base: &str, href: &str) -> String {
    let href = href.trim();
    if href.starts_with("http://") || href.starts_with("https://") {
        return href.to_string();
    }
    let base = base.trim_end_matches('/');
    if href.starts_with('/') {
        let origin_end = base
            .find("://")
            .and_then(|scheme| base[scheme + 3..].find('/').map(|p| scheme + 3 + p))
            .unwrap_or(base.len());
        format!("{}{href}", &base[..origin_end])
    } else {
        format!("{base}/{href}")
    }
}
