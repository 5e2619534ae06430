//! Conversation discovery: scan the chat list, scroll, repeat until it stops growing.

use crate::config::Config;
use crate::errors::HarvestError;
use crate::model::{collapse_whitespace, Conversation, IdentityKey};
use crate::page::{Page, PageElement};
use crate::selectors;
use crate::strategy::{Scope, Strategies};
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Consecutive iterations without a new entry after which the list is considered
/// fully loaded
pub const STABLE_ITERATIONS: usize = 3;

pub const DEFAULT_MAX_ITERATIONS: usize = 20;
pub const DEFAULT_SETTLE_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct ConversationDiscovery {
    entries: Strategies,
    containers: Strategies,
    labels: Strategies,
    max_iterations: usize,
    settle_interval: Duration,
}

impl Default for ConversationDiscovery {
    fn default() -> Self {
        Self {
            entries: Strategies::from_strs(selectors::CONVERSATIONS),
            containers: Strategies::from_strs(selectors::CONVERSATION_CONTAINERS),
            labels: Strategies::from_strs(selectors::CONVERSATION_LABELS),
            max_iterations: DEFAULT_MAX_ITERATIONS,
            settle_interval: DEFAULT_SETTLE_INTERVAL,
        }
    }
}

impl ConversationDiscovery {
    pub fn from_config(config: &Config) -> Self {
        let overrides = config.selector_overrides();
        let mut discovery = Self::default()
            .with_max_iterations(config.discovery_max_iterations())
            .with_settle_interval(config.settle_interval());
        if let Some(entries) = &overrides.conversations {
            discovery.entries = Strategies::from_strs(entries);
        }
        if let Some(containers) = &overrides.conversation_containers {
            discovery.containers = Strategies::from_strs(containers);
        }
        discovery
    }

    pub fn with_entries(mut self, entries: Strategies) -> Self {
        self.entries = entries;
        self
    }

    pub fn with_containers(mut self, containers: Strategies) -> Self {
        self.containers = containers;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations.max(1);
        self
    }

    pub fn with_settle_interval(mut self, settle_interval: Duration) -> Self {
        self.settle_interval = settle_interval;
        self
    }

    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    /// Scan the conversation list until no new entries appear for
    /// [`STABLE_ITERATIONS`] iterations, or the iteration bound is reached.
    ///
    /// An empty list is not an error. The call fails only when every entry
    /// strategy errored before anything was collected; a later failure returns the
    /// entries collected so far.
    #[instrument(skip(self, page), fields(max_iterations = self.max_iterations))]
    pub async fn discover(&self, page: &Page) -> Result<Vec<Conversation>, HarvestError> {
        let mut seen: HashSet<IdentityKey> = HashSet::new();
        let mut conversations: Vec<Conversation> = Vec::new();
        let mut stable = 0usize;

        for iteration in 0..self.max_iterations {
            let before = conversations.len();

            match self.entries.first_match(Scope::Page(page)).await {
                Ok(Some(found)) => {
                    debug!(
                        iteration,
                        strategy = found.index,
                        selector = %found.selector,
                        count = found.elements.len(),
                        "Scanning conversation entries"
                    );
                    for element in &found.elements {
                        match self.entry(element).await {
                            Ok(Some(conversation)) => {
                                if seen.insert(conversation.identity_key()) {
                                    conversations.push(conversation);
                                }
                            }
                            Ok(None) => {}
                            Err(e) => debug!(handle = %element.handle(), error = %e, "Skipping conversation entry"),
                        }
                    }
                }
                Ok(None) => debug!(iteration, "No conversation entries visible"),
                Err(e) if conversations.is_empty() => return Err(e),
                Err(e) => {
                    warn!(iteration, error = %e, "Conversation scan failed, returning partial results");
                    break;
                }
            }

            let added = conversations.len() - before;
            info!(iteration, added, total = conversations.len(), "🔎 Discovery pass complete");

            if added == 0 {
                stable += 1;
                if stable >= STABLE_ITERATIONS {
                    debug!(iteration, "Conversation list is stable");
                    break;
                }
            } else {
                stable = 0;
            }

            if iteration + 1 < self.max_iterations {
                self.scroll_list(page).await;
                tokio::time::sleep(self.settle_interval).await;
            }
        }

        info!(count = conversations.len(), "✅ Discovered conversations");
        Ok(conversations)
    }

    async fn scroll_list(&self, page: &Page) {
        let container = match self.containers.first_match(Scope::Page(page)).await {
            Ok(Some(found)) => found.elements.into_iter().next(),
            Ok(None) => None,
            Err(e) => {
                debug!(error = %e, "Conversation list container lookup failed");
                None
            }
        };

        let scrolled = match &container {
            Some(container) => container.scroll_to_bottom().await,
            None => page.scroll_to_bottom().await,
        };
        if let Err(e) = scrolled {
            debug!(error = %e, "Scroll failed");
        }
    }

    async fn entry(&self, element: &PageElement) -> Result<Option<Conversation>, HarvestError> {
        let Some(name) = self.entry_name(element).await? else {
            return Ok(None);
        };
        let url = entry_url(element).await;
        Ok(Some(Conversation::new(name, url).with_handle(element.clone())))
    }

    /// Nested label text, then the accessible label, then the raw text
    async fn entry_name(&self, element: &PageElement) -> Result<Option<String>, HarvestError> {
        if let Ok(Some(found)) = self.labels.first_match(Scope::Within(element)).await {
            for label in found.elements {
                if let Ok(text) = label.text().await {
                    let name = collapse_whitespace(&text);
                    if !name.is_empty() {
                        return Ok(Some(name));
                    }
                }
            }
        }

        if let Ok(Some(label)) = element.non_empty_attribute("aria-label").await {
            return Ok(Some(collapse_whitespace(&label)));
        }

        let name = collapse_whitespace(&element.text().await?);
        Ok((!name.is_empty()).then_some(name))
    }
}

/// The element's own href when it is a link, else the first nested link
async fn entry_url(element: &PageElement) -> Option<String> {
    if let Ok(tag) = element.tag_name().await {
        if tag.eq_ignore_ascii_case("a") {
            if let Ok(Some(href)) = element.non_empty_attribute("href").await {
                return Some(href);
            }
        }
    }

    let links = element.locator("a[href]").all().await.ok()?;
    for link in links {
        if let Ok(Some(href)) = link.non_empty_attribute("href").await {
            return Some(href);
        }
    }
    None
}
