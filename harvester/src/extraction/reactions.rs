use crate::page::PageElement;
use crate::strategy::{Scope, Strategies};
use tracing::debug;

const VALUE_ATTRIBUTES: &[&str] = &["aria-label", "alt", "data-reaction"];

/// Every reaction attached to a message, across all strategies.
///
/// Returns `None` when nothing was found.
pub async fn extract_reactions(
    element: &PageElement,
    strategies: &Strategies,
) -> Option<Vec<String>> {
    let mut reactions = Vec::new();
    for badge in strategies.collect_all(Scope::Within(element)).await {
        match reaction_value(&badge).await {
            Some(value) => reactions.push(value),
            None => debug!(handle = %badge.handle(), "Reaction badge without a value"),
        }
    }
    (!reactions.is_empty()).then_some(reactions)
}

/// Accessible label, then alt text, then the reaction data attribute, then text
async fn reaction_value(badge: &PageElement) -> Option<String> {
    for name in VALUE_ATTRIBUTES {
        if let Ok(Some(value)) = badge.non_empty_attribute(name).await {
            return Some(value);
        }
    }
    let text = badge.text().await.ok()?;
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}
