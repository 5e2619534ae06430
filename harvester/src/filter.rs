use crate::config::{Config, ConversationScope};
use crate::model::Conversation;
use tracing::{debug, warn};

/// Apply the configured scope to a discovered set.
///
/// `specific` keeps a conversation when an enabled rule name contains its name or
/// its name contains the rule name, ignoring case. An unknown scope, or `specific`
/// without any usable rule, keeps everything.
pub fn filter_conversations(conversations: Vec<Conversation>, config: &Config) -> Vec<Conversation> {
    match config.scope() {
        ConversationScope::All => conversations,
        ConversationScope::Specific => {
            let rules: Vec<String> = config
                .enabled_conversation_names()
                .into_iter()
                .map(|name| name.trim().to_lowercase())
                .filter(|name| !name.is_empty())
                .collect();
            retain_matching(conversations, &rules)
        }
        ConversationScope::Other(scope) => {
            warn!(%scope, "Unknown conversation scope, keeping all conversations");
            conversations
        }
    }
}

/// `rules` must already be lowercased
fn retain_matching(conversations: Vec<Conversation>, rules: &[String]) -> Vec<Conversation> {
    if rules.is_empty() {
        debug!("No enabled conversation rules, keeping all conversations");
        return conversations;
    }

    let total = conversations.len();
    let kept: Vec<Conversation> = conversations
        .into_iter()
        .filter(|conversation| {
            let name = conversation.name.to_lowercase();
            !name.is_empty()
                && rules
                    .iter()
                    .any(|rule| name.contains(rule.as_str()) || rule.contains(name.as_str()))
        })
        .collect();

    debug!(total, kept = kept.len(), "Applied conversation scope");
    kept
}
