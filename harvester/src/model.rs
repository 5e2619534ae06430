//! Records produced by discovery and extraction

use crate::page::PageElement;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A conversation entry found in the chat list.
///
/// The element handle is only valid for the scan that produced it.
#[derive(Clone)]
pub struct Conversation {
    pub name: String,
    pub url: Option<String>,
    pub handle: Option<PageElement>,
}

impl Conversation {
    pub fn new(name: impl Into<String>, url: Option<String>) -> Self {
        Self {
            name: name.into(),
            url,
            handle: None,
        }
    }

    pub fn with_handle(mut self, handle: PageElement) -> Self {
        self.handle = Some(handle);
        self
    }

    /// Deduplication key: the url when present, otherwise the normalized name
    pub fn identity_key(&self) -> IdentityKey {
        match self.url.as_deref().map(str::trim).filter(|u| !u.is_empty()) {
            Some(url) => IdentityKey::Url(url.to_string()),
            None => IdentityKey::Name(normalize_name(&self.name)),
        }
    }

    pub fn summary(&self) -> ConversationSummary {
        ConversationSummary {
            name: self.name.clone(),
            url: self.url.clone(),
        }
    }
}

impl fmt::Debug for Conversation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Conversation")
            .field("name", &self.name)
            .field("url", &self.url)
            .finish_non_exhaustive()
    }
}

impl PartialEq for Conversation {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.url == other.url
    }
}

/// Url-keyed and name-keyed identities never collide with each other, so an entry
/// without a url is only a duplicate of another entry without a url.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IdentityKey {
    Url(String),
    Name(String),
}

/// Lowercase and collapse internal whitespace
pub fn normalize_name(name: &str) -> String {
    collapse_whitespace(name).to_lowercase()
}

pub fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// The persisted shape of a conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub name: String,
    pub url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
    Audio,
    Document,
}

impl MediaKind {
    pub const ALL: [MediaKind; 4] = [
        MediaKind::Image,
        MediaKind::Video,
        MediaKind::Audio,
        MediaKind::Document,
    ];

    /// Parse the names used in the `data_to_collect.media.types` list
    pub fn from_config_name(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "image" | "images" => Some(MediaKind::Image),
            "video" | "videos" => Some(MediaKind::Video),
            "audio" | "audios" => Some(MediaKind::Audio),
            "document" | "documents" | "file" | "files" => Some(MediaKind::Document),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaItem {
    #[serde(rename = "type")]
    pub kind: MediaKind,
    pub url: String,
    /// Alt text for images, file name for documents
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub alt: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub index: usize,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub timestamp: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub sender: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub media: Option<Vec<MediaItem>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub reactions: Option<Vec<String>>,
    pub extracted_at: DateTime<Utc>,
}

impl Message {
    /// Every kept message must carry text or at least one media item
    pub fn has_content(&self) -> bool {
        self.text.as_deref().is_some_and(|t| !t.trim().is_empty())
            || self.media.as_ref().is_some_and(|m| !m.is_empty())
    }
}
