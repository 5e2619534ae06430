use tracing::{debug, instrument};

use crate::errors::HarvestError;
use crate::page::{ElementRef, PageElement, PageEngine};
use crate::selector::Selector;
use std::sync::Arc;
use std::time::Duration;

// Default timeout if none is specified on the locator itself
const DEFAULT_LOCATOR_TIMEOUT: Duration = Duration::from_secs(10);

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// A high-level API for finding elements on the page
#[derive(Clone)]
pub struct Locator {
    engine: Arc<dyn PageEngine>,
    selector: Selector,
    timeout: Duration, // Default timeout for this locator instance
    root: Option<ElementRef>,
}

impl Locator {
    /// Create a new locator with the given selector
    pub(crate) fn new(engine: Arc<dyn PageEngine>, selector: Selector) -> Self {
        Self {
            engine,
            selector,
            timeout: DEFAULT_LOCATOR_TIMEOUT,
            root: None,
        }
    }

    /// Set a default timeout for waiting operations on this locator instance.
    /// This timeout is used if no specific timeout is passed to wait methods.
    pub fn set_default_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Restrict the search to descendants of the given element
    pub fn within(mut self, root: ElementRef) -> Self {
        self.root = Some(root);
        self
    }

    pub fn selector(&self) -> &Selector {
        &self.selector
    }

    /// Get all elements currently matching this locator, without waiting.
    pub async fn all(&self) -> Result<Vec<PageElement>, HarvestError> {
        match &self.selector {
            Selector::Invalid(reason) => return Err(HarvestError::InvalidSelector(reason.clone())),
            s if !s.is_valid() => return Err(HarvestError::InvalidSelector(s.to_string())),
            _ => {}
        }
        let handles = self
            .engine
            .query_all(&self.selector, self.root.as_ref())
            .await?;
        Ok(handles
            .into_iter()
            .map(|h| PageElement::new(self.engine.clone(), h))
            .collect())
    }

    pub async fn first(&self, timeout: Option<Duration>) -> Result<PageElement, HarvestError> {
        let mut elements = self.wait(timeout).await?;
        Ok(elements.remove(0))
    }

    /// Wait for at least one element matching the locator, up to the specified timeout.
    /// If no timeout is provided, uses the locator's default timeout.
    #[instrument(level = "debug", skip(self, timeout))]
    pub async fn wait(&self, timeout: Option<Duration>) -> Result<Vec<PageElement>, HarvestError> {
        debug!("Waiting for element matching selector: {}", self.selector);
        let effective_timeout = timeout.unwrap_or(self.timeout);
        let deadline = tokio::time::Instant::now() + effective_timeout;

        loop {
            let last_error = match self.all().await {
                Ok(found) if !found.is_empty() => return Ok(found),
                Ok(_) => None,
                Err(e @ HarvestError::InvalidSelector(_)) => return Err(e),
                Err(e) => Some(e),
            };

            if tokio::time::Instant::now() >= deadline {
                let detail = last_error
                    .map(|e| format!(" Last error: {e}"))
                    .unwrap_or_default();
                return Err(HarvestError::Timeout(format!(
                    "Timed out after {effective_timeout:?} waiting for element {}.{detail}",
                    self.selector
                )));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Get a nested locator
    pub fn locator(&self, selector: impl Into<Selector>) -> Locator {
        let mut chain = match self.selector.clone() {
            Selector::Descendant(parts) => parts,
            s => vec![s],
        };
        match selector.into() {
            Selector::Descendant(mut next) => chain.append(&mut next),
            s => chain.push(s),
        }

        Locator {
            engine: self.engine.clone(),
            selector: Selector::Descendant(chain),
            timeout: self.timeout,
            root: self.root.clone(),
        }
    }
}
