//! In-memory page engine for unit tests.
//!
//! The DOM is an arena of nodes with parent pointers. Selectors are matched
//! structurally, hidden batches appear on scroll, and individual queries or element
//! reads can be made to fail.

use crate::errors::HarvestError;
use crate::page::{ElementRef, Page, PageEngine};
use crate::selector::Selector;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

pub const ROOT: usize = 0;

#[derive(Debug, Clone)]
struct Node {
    tag: String,
    attrs: Vec<(String, String)>,
    text: String,
    parent: Option<usize>,
    children: Vec<usize>,
    hidden: bool,
    detached: bool,
}

#[derive(Debug, Default)]
struct Dom {
    nodes: Vec<Node>,
    /// Revealed one batch per `scroll_to_bottom`
    more_batches: Vec<Vec<usize>>,
    /// Revealed one batch per `scroll_to_top`
    history_batches: Vec<Vec<usize>>,
    /// Parent under which every bottom scroll appends a fresh conversation link
    spurious_parent: Option<usize>,
    spurious_seq: usize,
    failing_selectors: HashSet<String>,
    fail_all_queries: bool,
    failing_text: HashSet<usize>,
    failing_attributes: HashSet<(usize, String)>,
    bottom_scrolls: usize,
    top_scrolls: usize,
    scroll_targets: Vec<Option<usize>>,
    navigations: Vec<String>,
    clicks: Vec<usize>,
    url: String,
    /// `current_url` reads that pass before a navigation lands
    navigation_delay: usize,
    /// Target url and reads left until it lands
    pending_navigation: Option<(String, usize)>,
    /// Detached and revealed when a deferred navigation lands
    arrival: Option<(Vec<usize>, Vec<usize>)>,
}

pub struct FakePage {
    dom: Mutex<Dom>,
}

impl FakePage {
    pub fn new() -> Arc<Self> {
        let root = Node {
            tag: "body".to_string(),
            attrs: Vec::new(),
            text: String::new(),
            parent: None,
            children: Vec::new(),
            hidden: false,
            detached: false,
        };
        Arc::new(Self {
            dom: Mutex::new(Dom {
                nodes: vec![root],
                url: "https://www.messenger.com/".to_string(),
                ..Dom::default()
            }),
        })
    }

    pub fn page(self: &Arc<Self>) -> Page {
        Page::new(self.clone())
    }

    fn dom(&self) -> MutexGuard<'_, Dom> {
        self.dom.lock().unwrap()
    }

    /// Append a visible element with its own text
    pub fn add(&self, parent: usize, tag: &str, attrs: &[(&str, &str)], text: &str) -> usize {
        self.insert(parent, tag, attrs, text, false)
    }

    /// Append an element that only appears once its batch is revealed
    pub fn add_hidden(&self, parent: usize, tag: &str, attrs: &[(&str, &str)], text: &str) -> usize {
        self.insert(parent, tag, attrs, text, true)
    }

    fn insert(&self, parent: usize, tag: &str, attrs: &[(&str, &str)], text: &str, hidden: bool) -> usize {
        let mut dom = self.dom();
        let id = dom.nodes.len();
        dom.nodes.push(Node {
            tag: tag.to_lowercase(),
            attrs: attrs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            text: text.to_string(),
            parent: Some(parent),
            children: Vec::new(),
            hidden,
            detached: false,
        });
        dom.nodes[parent].children.push(id);
        id
    }

    pub fn push_scroll_batch(&self, nodes: Vec<usize>) {
        self.dom().more_batches.push(nodes);
    }

    pub fn push_history_batch(&self, nodes: Vec<usize>) {
        self.dom().history_batches.push(nodes);
    }

    /// Every bottom scroll adds one never-seen conversation link under `parent`
    pub fn grow_forever_under(&self, parent: usize) {
        self.dom().spurious_parent = Some(parent);
    }

    pub fn fail_selector(&self, selector: &str) {
        let key = Selector::from(selector).to_string();
        self.dom().failing_selectors.insert(key);
    }

    pub fn fail_all_queries(&self, fail: bool) {
        self.dom().fail_all_queries = fail;
    }

    pub fn fail_text(&self, node: usize) {
        self.dom().failing_text.insert(node);
    }

    pub fn fail_attribute(&self, node: usize, name: &str) {
        self.dom().failing_attributes.insert((node, name.to_string()));
    }

    pub fn detach(&self, node: usize) {
        self.dom().nodes[node].detached = true;
    }

    /// Keep the old document for `reads` url reads after the next navigation. On
    /// arrival `leaving` is detached and `arriving` revealed.
    pub fn defer_navigation(&self, reads: usize, leaving: Vec<usize>, arriving: Vec<usize>) {
        let mut dom = self.dom();
        dom.navigation_delay = reads;
        dom.arrival = Some((leaving, arriving));
    }

    pub fn bottom_scrolls(&self) -> usize {
        self.dom().bottom_scrolls
    }

    pub fn top_scrolls(&self) -> usize {
        self.dom().top_scrolls
    }

    /// Node ids (or `None` for the whole page) of every bottom scroll
    pub fn scroll_targets(&self) -> Vec<Option<usize>> {
        self.dom().scroll_targets.clone()
    }

    pub fn navigations(&self) -> Vec<String> {
        self.dom().navigations.clone()
    }

    pub fn clicks(&self) -> Vec<usize> {
        self.dom().clicks.clone()
    }

    pub fn handle_of(node: usize) -> ElementRef {
        ElementRef::new(format!("n{node}"))
    }

    pub fn node_of(handle: &ElementRef) -> Option<usize> {
        handle.as_str().strip_prefix('n')?.parse().ok()
    }
}

impl Dom {
    fn resolve(&self, handle: &ElementRef) -> Result<usize, HarvestError> {
        let id = FakePage::node_of(handle)
            .filter(|id| *id < self.nodes.len())
            .ok_or_else(|| HarvestError::ElementNotFound(handle.to_string()))?;
        if !self.is_live(id) {
            return Err(HarvestError::ElementDetached(handle.to_string()));
        }
        Ok(id)
    }

    /// Attached and visible, along with every ancestor
    fn is_live(&self, id: usize) -> bool {
        let mut current = Some(id);
        while let Some(node) = current {
            let n = &self.nodes[node];
            if n.hidden || n.detached {
                return false;
            }
            current = n.parent;
        }
        true
    }

    fn attr(&self, id: usize, name: &str) -> Option<&str> {
        self.nodes[id]
            .attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    fn matches(&self, id: usize, selector: &Selector) -> bool {
        match selector {
            Selector::Any => true,
            Selector::Tag(tag) => self.nodes[id].tag == *tag,
            Selector::Attribute { name, matcher } => matcher.matches(self.attr(id, name)),
            Selector::Compound(parts) => parts.iter().all(|p| self.matches(id, p)),
            Selector::Or(parts) => parts.iter().any(|p| self.matches(id, p)),
            Selector::Descendant(parts) => self.matches_descendant(id, parts),
            Selector::XPath(_) | Selector::Invalid(_) => false,
        }
    }

    fn matches_descendant(&self, id: usize, parts: &[Selector]) -> bool {
        let Some((last, ancestors)) = parts.split_last() else {
            return false;
        };
        if !self.matches(id, last) {
            return false;
        }
        let mut current = self.nodes[id].parent;
        for part in ancestors.iter().rev() {
            loop {
                match current {
                    Some(node) if self.matches(node, part) => {
                        current = self.nodes[node].parent;
                        break;
                    }
                    Some(node) => current = self.nodes[node].parent,
                    None => return false,
                }
            }
        }
        true
    }

    /// Visible descendants of `root` in document order, `root` excluded
    fn descendants(&self, root: usize, out: &mut Vec<usize>) {
        for &child in &self.nodes[root].children {
            let node = &self.nodes[child];
            if node.hidden || node.detached {
                continue;
            }
            out.push(child);
            self.descendants(child, out);
        }
    }

    fn text_of(&self, id: usize) -> String {
        let mut parts = Vec::new();
        if !self.nodes[id].text.trim().is_empty() {
            parts.push(self.nodes[id].text.clone());
        }
        let mut under = Vec::new();
        self.descendants(id, &mut under);
        for node in under {
            if !self.nodes[node].text.trim().is_empty() {
                parts.push(self.nodes[node].text.clone());
            }
        }
        parts.join(" ")
    }

    fn reveal(&mut self, batch: Vec<usize>) {
        for node in batch {
            self.nodes[node].hidden = false;
        }
    }
}

#[async_trait::async_trait]
impl PageEngine for FakePage {
    async fn query_all(
        &self,
        selector: &Selector,
        root: Option<&ElementRef>,
    ) -> Result<Vec<ElementRef>, HarvestError> {
        let dom = self.dom();
        if dom.fail_all_queries || dom.failing_selectors.contains(&selector.to_string()) {
            return Err(HarvestError::PlatformError(format!(
                "query failed for {selector}"
            )));
        }
        match selector {
            Selector::Invalid(reason) => return Err(HarvestError::InvalidSelector(reason.clone())),
            Selector::XPath(_) => {
                return Err(HarvestError::UnsupportedOperation(
                    "xpath is not supported by the fake page".to_string(),
                ))
            }
            _ => {}
        }

        let scope = match root {
            Some(handle) => dom.resolve(handle)?,
            None => ROOT,
        };
        let mut candidates = Vec::new();
        dom.descendants(scope, &mut candidates);
        Ok(candidates
            .into_iter()
            .filter(|&id| dom.matches(id, selector))
            .map(FakePage::handle_of)
            .collect())
    }

    async fn text(&self, element: &ElementRef) -> Result<String, HarvestError> {
        let dom = self.dom();
        let id = dom.resolve(element)?;
        if dom.failing_text.contains(&id) {
            return Err(HarvestError::PlatformError(format!("text of {element} failed")));
        }
        Ok(dom.text_of(id))
    }

    async fn attribute(
        &self,
        element: &ElementRef,
        name: &str,
    ) -> Result<Option<String>, HarvestError> {
        let dom = self.dom();
        let id = dom.resolve(element)?;
        if dom.failing_attributes.contains(&(id, name.to_string())) {
            return Err(HarvestError::PlatformError(format!(
                "attribute {name} of {element} failed"
            )));
        }
        Ok(dom.attr(id, name).map(str::to_string))
    }

    async fn tag_name(&self, element: &ElementRef) -> Result<String, HarvestError> {
        let dom = self.dom();
        let id = dom.resolve(element)?;
        Ok(dom.nodes[id].tag.clone())
    }

    async fn scroll_to_bottom(&self, target: Option<&ElementRef>) -> Result<(), HarvestError> {
        let mut dom = self.dom();
        let target = match target {
            Some(handle) => Some(dom.resolve(handle)?),
            None => None,
        };
        dom.bottom_scrolls += 1;
        dom.scroll_targets.push(target);
        if !dom.more_batches.is_empty() {
            let batch = dom.more_batches.remove(0);
            dom.reveal(batch);
        }
        if let Some(parent) = dom.spurious_parent {
            dom.spurious_seq += 1;
            let seq = dom.spurious_seq;
            let id = dom.nodes.len();
            dom.nodes.push(Node {
                tag: "a".to_string(),
                attrs: vec![
                    ("role".to_string(), "link".to_string()),
                    ("href".to_string(), format!("/t/spurious-{seq}/")),
                ],
                text: format!("Spurious {seq}"),
                parent: Some(parent),
                children: Vec::new(),
                hidden: false,
                detached: false,
            });
            dom.nodes[parent].children.push(id);
        }
        Ok(())
    }

    async fn scroll_to_top(&self, target: Option<&ElementRef>) -> Result<(), HarvestError> {
        let mut dom = self.dom();
        if let Some(handle) = target {
            dom.resolve(handle)?;
        }
        dom.top_scrolls += 1;
        if !dom.history_batches.is_empty() {
            let batch = dom.history_batches.remove(0);
            dom.reveal(batch);
        }
        Ok(())
    }

    async fn click(&self, element: &ElementRef) -> Result<(), HarvestError> {
        let mut dom = self.dom();
        let id = dom.resolve(element)?;
        dom.clicks.push(id);
        Ok(())
    }

    async fn navigate(&self, url: &str) -> Result<(), HarvestError> {
        let mut dom = self.dom();
        dom.navigations.push(url.to_string());
        if dom.navigation_delay > 0 {
            let reads = std::mem::take(&mut dom.navigation_delay);
            dom.pending_navigation = Some((url.to_string(), reads));
        } else {
            dom.url = url.to_string();
        }
        Ok(())
    }

    async fn current_url(&self) -> Result<String, HarvestError> {
        let mut dom = self.dom();
        if let Some((url, reads)) = dom.pending_navigation.take() {
            if reads > 1 {
                dom.pending_navigation = Some((url, reads - 1));
            } else {
                dom.url = url;
                if let Some((leaving, arriving)) = dom.arrival.take() {
                    for node in leaving {
                        dom.nodes[node].detached = true;
                    }
                    dom.reveal(arriving);
                }
            }
        }
        Ok(dom.url.clone())
    }

    async fn title(&self) -> Result<String, HarvestError> {
        Ok("Messenger".to_string())
    }

    async fn page_source(&self) -> Result<String, HarvestError> {
        let dom = self.dom();
        Ok(format!("<html><body>{}</body></html>", dom.text_of(ROOT)))
    }
}
