//! The page query surface: everything the engine needs from a live browser tab.
//!
//! The core never talks to a browser directly. It asks a [`PageEngine`] for element
//! handles and element data, and every failure comes back as a [`HarvestError`].

use crate::errors::HarvestError;
use crate::locator::Locator;
use crate::selector::Selector;
use std::fmt;
use std::sync::Arc;
use tracing::instrument;

/// Opaque reference to an element inside the page.
///
/// The engine that produced it is the only one able to resolve it, and it may go
/// stale as soon as the page re-renders.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ElementRef(String);

impl ElementRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ElementRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The common trait that every page backend must implement
#[async_trait::async_trait]
pub trait PageEngine: Send + Sync {
    /// Find all elements matching a selector, in document order.
    /// With a root, only descendants of the root are considered.
    async fn query_all(
        &self,
        selector: &Selector,
        root: Option<&ElementRef>,
    ) -> Result<Vec<ElementRef>, HarvestError>;

    /// Visible text of the element, including descendants
    async fn text(&self, element: &ElementRef) -> Result<String, HarvestError>;

    /// Attribute value, `None` when the attribute is missing
    async fn attribute(
        &self,
        element: &ElementRef,
        name: &str,
    ) -> Result<Option<String>, HarvestError>;

    /// Lowercase tag name
    async fn tag_name(&self, element: &ElementRef) -> Result<String, HarvestError>;

    /// Scroll the element (or the whole page when `None`) to its bottom
    async fn scroll_to_bottom(&self, target: Option<&ElementRef>) -> Result<(), HarvestError>;

    /// Scroll the element (or the whole page when `None`) to its top
    async fn scroll_to_top(&self, target: Option<&ElementRef>) -> Result<(), HarvestError>;

    async fn click(&self, element: &ElementRef) -> Result<(), HarvestError>;

    /// Load `url` in the tab. Engines return once the new document has loaded,
    /// or with `Timeout` when it does not.
    async fn navigate(&self, url: &str) -> Result<(), HarvestError>;

    async fn current_url(&self) -> Result<String, HarvestError>;

    async fn title(&self) -> Result<String, HarvestError>;

    /// Serialized HTML of the whole document
    async fn page_source(&self) -> Result<String, HarvestError>;

    /// PNG bytes of the visible viewport.
    /// Engines that cannot capture return `UnsupportedOperation`.
    async fn screenshot(&self) -> Result<Vec<u8>, HarvestError> {
        Err(HarvestError::UnsupportedOperation(
            "screenshot is not supported by this engine".to_string(),
        ))
    }
}

/// Compare two urls ignoring a trailing slash
pub fn same_location(a: &str, b: &str) -> bool {
    a.trim_end_matches('/') == b.trim_end_matches('/')
}

/// The main entry point for querying one browser session
#[derive(Clone)]
pub struct Page {
    engine: Arc<dyn PageEngine>,
}

impl Page {
    pub fn new(engine: Arc<dyn PageEngine>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> Arc<dyn PageEngine> {
        self.engine.clone()
    }

    pub fn locator(&self, selector: impl Into<Selector>) -> Locator {
        Locator::new(self.engine.clone(), selector.into())
    }

    #[instrument(level = "debug", skip(self))]
    pub async fn scroll_to_bottom(&self) -> Result<(), HarvestError> {
        self.engine.scroll_to_bottom(None).await
    }

    #[instrument(level = "debug", skip(self))]
    pub async fn navigate(&self, url: &str) -> Result<(), HarvestError> {
        self.engine.navigate(url).await
    }

    pub async fn current_url(&self) -> Result<String, HarvestError> {
        self.engine.current_url().await
    }

    pub async fn title(&self) -> Result<String, HarvestError> {
        self.engine.title().await
    }

    pub async fn page_source(&self) -> Result<String, HarvestError> {
        self.engine.page_source().await
    }

    pub async fn screenshot(&self) -> Result<Vec<u8>, HarvestError> {
        self.engine.screenshot().await
    }
}

impl fmt::Debug for Page {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Page").finish_non_exhaustive()
    }
}

/// Represents an element on the page
#[derive(Clone)]
pub struct PageElement {
    engine: Arc<dyn PageEngine>,
    handle: ElementRef,
}

impl PageElement {
    pub(crate) fn new(engine: Arc<dyn PageEngine>, handle: ElementRef) -> Self {
        Self { engine, handle }
    }

    pub fn handle(&self) -> &ElementRef {
        &self.handle
    }

    pub async fn text(&self) -> Result<String, HarvestError> {
        self.engine.text(&self.handle).await
    }

    pub async fn attribute(&self, name: &str) -> Result<Option<String>, HarvestError> {
        self.engine.attribute(&self.handle, name).await
    }

    /// Attribute value with surrounding whitespace removed; empty counts as missing
    pub async fn non_empty_attribute(&self, name: &str) -> Result<Option<String>, HarvestError> {
        Ok(self
            .attribute(name)
            .await?
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty()))
    }

    pub async fn tag_name(&self) -> Result<String, HarvestError> {
        self.engine.tag_name(&self.handle).await
    }

    pub async fn scroll_to_bottom(&self) -> Result<(), HarvestError> {
        self.engine.scroll_to_bottom(Some(&self.handle)).await
    }

    pub async fn scroll_to_top(&self) -> Result<(), HarvestError> {
        self.engine.scroll_to_top(Some(&self.handle)).await
    }

    pub async fn click(&self) -> Result<(), HarvestError> {
        self.engine.click(&self.handle).await
    }

    /// Get a locator scoped to this element's descendants
    pub fn locator(&self, selector: impl Into<Selector>) -> Locator {
        Locator::new(self.engine.clone(), selector.into()).within(self.handle.clone())
    }
}

impl PartialEq for PageElement {
    fn eq(&self, other: &Self) -> bool {
        self.handle == other.handle
    }
}

impl Eq for PageElement {}

impl std::hash::Hash for PageElement {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.handle.hash(state);
    }
}

impl fmt::Debug for PageElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PageElement").field(&self.handle).finish()
    }
}
