//! Conversation harvesting for web messengers without an API
//!
//! Conversations and messages are found purely through DOM queries with ordered
//! selector fallbacks, saved as append-only JSON, and the unread count is polled
//! for new activity.

pub mod bridge;
pub mod bridge_engine;
pub mod config;
pub mod discovery;
pub mod errors;
pub mod extraction;
pub mod filter;
pub mod harvester;
pub mod locator;
pub mod model;
pub mod monitor;
pub mod page;
pub mod persistence;
pub mod selector;
pub mod selectors;
pub mod snapshot;
pub mod strategy;
#[cfg(test)]
mod tests;

pub use bridge::ExtensionBridge;
pub use bridge_engine::BridgeEngine;
pub use config::{Config, ConversationScope, Mode};
pub use discovery::ConversationDiscovery;
pub use errors::HarvestError;
pub use extraction::MessageExtractor;
pub use filter::filter_conversations;
pub use harvester::{ExtractionStats, Harvester};
pub use locator::Locator;
pub use model::{Conversation, MediaItem, MediaKind, Message};
pub use monitor::{Monitor, MonitorReport, PageUnreadCounter, PollOutcome, UnreadCounter};
pub use page::{ElementRef, Page, PageElement, PageEngine};
pub use persistence::{sanitize_folder_name, Archive};
pub use selector::Selector;
pub use snapshot::{DebugSnapshotter, NoopSnapshots, SnapshotSink};
pub use strategy::{Scope, Strategies};
