//! Message extraction for the currently open conversation.

mod media;
mod reactions;
mod sender;

pub use media::{document_file_name, extract_media};
pub use reactions::extract_reactions;
pub use sender::{parse_sender, SELF_SENDER, UNKNOWN_SENDER};

use crate::config::{CollectSettings, Config};
use crate::errors::HarvestError;
use crate::model::Message;
use crate::page::{Page, PageElement};
use crate::selectors;
use crate::strategy::{Scope, Strategies};
use chrono::Utc;
use regex::Regex;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, info, instrument};

const TIME_PATTERN: &str = r"(?i)\b(\d{1,2}:\d{2}(\s?[ap]\.?m\.?)?|yesterday|today|(mon|tues|wednes|thurs|fri|satur|sun)day|(jan|feb|mar|apr|may|jun|jul|aug|sep|oct|nov|dec)[a-z]*\.?\s+\d{1,2}|\d+\s*(sec|min|hour|hr|day|week|wk|month|year)[a-z]*\s+ago|\d{1,2}/\d{1,2}/\d{2,4})\b";

fn time_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(TIME_PATTERN).ok()).as_ref()
}

/// Whether an accessible label reads like a message time
pub fn looks_like_time(label: &str) -> bool {
    time_pattern().is_some_and(|p| p.is_match(label))
}

#[derive(Debug, Clone)]
pub struct MessageExtractor {
    messages: Strategies,
    containers: Strategies,
    reactions: Strategies,
    timestamps: Strategies,
    collect: CollectSettings,
    max_messages: usize,
    settle_interval: Duration,
}

impl Default for MessageExtractor {
    fn default() -> Self {
        Self {
            messages: Strategies::from_strs(selectors::MESSAGES),
            containers: Strategies::from_strs(selectors::MESSAGE_CONTAINERS),
            reactions: Strategies::from_strs(selectors::REACTIONS),
            timestamps: Strategies::from_strs(selectors::TIMESTAMP_CANDIDATES),
            collect: CollectSettings::default(),
            max_messages: 0,
            settle_interval: crate::discovery::DEFAULT_SETTLE_INTERVAL,
        }
    }
}

impl MessageExtractor {
    pub fn from_config(config: &Config) -> Self {
        let overrides = config.selector_overrides();
        let mut extractor = Self::default()
            .with_collect(config.collect().clone())
            .with_max_messages(config.max_messages_per_conversation())
            .with_settle_interval(config.settle_interval());
        if let Some(messages) = &overrides.messages {
            extractor.messages = Strategies::from_strs(messages);
        }
        if let Some(containers) = &overrides.message_containers {
            extractor.containers = Strategies::from_strs(containers);
        }
        if let Some(reactions) = &overrides.reactions {
            extractor.reactions = Strategies::from_strs(reactions);
        }
        extractor
    }

    pub fn with_collect(mut self, collect: CollectSettings) -> Self {
        self.collect = collect;
        self
    }

    /// Keep at most `max` messages, the most recent ones. Zero keeps everything.
    pub fn with_max_messages(mut self, max: usize) -> Self {
        self.max_messages = max;
        self
    }

    pub fn with_settle_interval(mut self, settle_interval: Duration) -> Self {
        self.settle_interval = settle_interval;
        self
    }

    pub fn with_messages(mut self, messages: Strategies) -> Self {
        self.messages = messages;
        self
    }

    pub fn message_strategies(&self) -> &Strategies {
        &self.messages
    }

    /// Extract the messages of the open conversation.
    ///
    /// Per-field failures only drop that field. The call fails only when every
    /// message strategy errored.
    #[instrument(skip(self, page))]
    pub async fn extract(&self, page: &Page) -> Result<Vec<Message>, HarvestError> {
        if self.collect.load_history {
            self.load_history(page).await;
        }

        let Some(found) = self.messages.first_match(Scope::Page(page)).await? else {
            info!("No message elements found");
            return Ok(Vec::new());
        };
        debug!(
            selector = %found.selector,
            count = found.elements.len(),
            "Extracting messages"
        );

        let mut messages = Vec::new();
        for (index, element) in found.elements.iter().enumerate() {
            let message = self.message(index, element).await;
            if message.has_content() {
                messages.push(message);
            } else {
                debug!(index, "Dropping message without content");
            }
        }

        if self.max_messages > 0 && messages.len() > self.max_messages {
            let excess = messages.len() - self.max_messages;
            messages.drain(..excess);
            debug!(dropped = excess, "Applied per-conversation message cap");
        }

        info!(count = messages.len(), "💬 Extracted messages");
        Ok(messages)
    }

    /// Scroll the history container to the top a few times so older messages render
    async fn load_history(&self, page: &Page) {
        let container = match self.containers.first_match(Scope::Page(page)).await {
            Ok(Some(found)) => found.elements.into_iter().next(),
            _ => None,
        };
        let Some(container) = container else {
            debug!("No message container found, skipping history load");
            return;
        };

        for iteration in 0..self.collect.history_scroll_iterations {
            if let Err(e) = container.scroll_to_top().await {
                debug!(iteration, error = %e, "History scroll failed");
                return;
            }
            tokio::time::sleep(self.settle_interval).await;
        }
    }

    async fn message(&self, index: usize, element: &PageElement) -> Message {
        let collect = &self.collect;

        let text = if collect.text {
            element
                .text()
                .await
                .map_err(|e| debug!(index, error = %e, "Message text unavailable"))
                .ok()
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
        } else {
            None
        };

        let timestamp = if collect.timestamps {
            self.timestamp(element).await
        } else {
            None
        };

        let sender = if collect.sender {
            element
                .non_empty_attribute("aria-label")
                .await
                .ok()
                .flatten()
                .map(|label| parse_sender(&label))
        } else {
            None
        };

        let media = if collect.media {
            extract_media(element, &collect.media_types).await
        } else {
            None
        };

        let reactions = if collect.reactions {
            extract_reactions(element, &self.reactions).await
        } else {
            None
        };

        Message {
            index,
            text,
            timestamp,
            sender,
            media,
            reactions,
            extracted_at: Utc::now(),
        }
    }

    /// First nested label (or title) that reads like a time
    async fn timestamp(&self, element: &PageElement) -> Option<String> {
        for candidate in self.timestamps.collect_all(Scope::Within(element)).await {
            for name in ["aria-label", "title"] {
                if let Ok(Some(label)) = candidate.non_empty_attribute(name).await {
                    if looks_like_time(&label) {
                        return Some(label);
                    }
                }
            }
        }
        None
    }
}
