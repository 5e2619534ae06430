//! Ordered selector fallback chains.
//!
//! A chain is data: a list of selectors tried in order. Adding a selector for a new
//! UI revision never touches the control flow that consumes the chain.

use crate::errors::HarvestError;
use crate::page::{Page, PageElement};
use crate::selector::Selector;
use std::collections::HashSet;
use tracing::debug;

/// Where a strategy chain searches
#[derive(Clone, Copy)]
pub enum Scope<'a> {
    Page(&'a Page),
    Within(&'a PageElement),
}

impl Scope<'_> {
    async fn all(&self, selector: &Selector) -> Result<Vec<PageElement>, HarvestError> {
        match self {
            Scope::Page(page) => page.locator(selector.clone()).all().await,
            Scope::Within(element) => element.locator(selector.clone()).all().await,
        }
    }
}

/// The first strategy that produced elements
#[derive(Debug)]
pub struct StrategyMatch {
    pub index: usize,
    pub selector: Selector,
    pub elements: Vec<PageElement>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Strategies {
    selectors: Vec<Selector>,
}

impl Strategies {
    pub fn new(selectors: Vec<Selector>) -> Self {
        Self { selectors }
    }

    pub fn from_strs<S: AsRef<str>>(selectors: &[S]) -> Self {
        Self::new(
            selectors
                .iter()
                .map(|s| Selector::from(s.as_ref()))
                .collect(),
        )
    }

    pub fn selectors(&self) -> &[Selector] {
        &self.selectors
    }

    pub fn is_empty(&self) -> bool {
        self.selectors.is_empty()
    }

    /// Try each selector in order and stop at the first that yields any elements.
    ///
    /// A strategy that errors is skipped. `Ok(None)` means every strategy ran and
    /// matched nothing; an error is returned only when every strategy errored.
    pub async fn first_match(
        &self,
        scope: Scope<'_>,
    ) -> Result<Option<StrategyMatch>, HarvestError> {
        let mut failures = Vec::new();

        for (index, selector) in self.selectors.iter().enumerate() {
            match scope.all(selector).await {
                Ok(elements) if !elements.is_empty() => {
                    debug!(%selector, index, count = elements.len(), "strategy matched");
                    return Ok(Some(StrategyMatch {
                        index,
                        selector: selector.clone(),
                        elements,
                    }));
                }
                Ok(_) => debug!(%selector, index, "strategy matched nothing"),
                Err(e) => {
                    debug!(%selector, index, error = %e, "strategy failed");
                    failures.push(format!("{selector}: {e}"));
                }
            }
        }

        if !self.selectors.is_empty() && failures.len() == self.selectors.len() {
            return Err(HarvestError::StrategiesExhausted(failures.join("; ")));
        }
        Ok(None)
    }

    /// Run every selector and collect the union of their matches in strategy order.
    /// An element matched by several selectors is returned once; failing selectors
    /// are skipped.
    pub async fn collect_all(&self, scope: Scope<'_>) -> Vec<PageElement> {
        let mut seen = HashSet::new();
        let mut collected = Vec::new();

        for selector in &self.selectors {
            match scope.all(selector).await {
                Ok(elements) => {
                    for element in elements {
                        if seen.insert(element.handle().clone()) {
                            collected.push(element);
                        }
                    }
                }
                Err(e) => debug!(%selector, error = %e, "strategy failed"),
            }
        }
        collected
    }
}
