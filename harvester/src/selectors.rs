//! Built-in locator strategies for the messenger web UI.
//!
//! Every list is ordered most specific first. The markup changes without notice, so
//! each list can be replaced from the `selectors` section of the config document.

/// Conversation entries in the chat list
pub const CONVERSATIONS: &[&str] = &[
    "div[role='navigation'] a[role='link'][href*='/t/']",
    "div[aria-label='Chats'] a[href*='/t/']",
    "a[href*='/messages/t/']",
    "a[href*='/t/']",
    "div[role='grid'] div[role='row']",
    "div[role='listitem']",
];

/// Scrollable container holding the chat list
pub const CONVERSATION_CONTAINERS: &[&str] = &[
    "div[aria-label='Chats']",
    "div[role='navigation'] div[role='grid']",
    "div[role='grid']",
    "div[role='navigation']",
];

/// Nested element carrying the display name of a conversation entry
pub const CONVERSATION_LABELS: &[&str] = &["span[dir='auto']", "span"];

/// Message rows inside an open conversation
pub const MESSAGES: &[&str] = &[
    "div[role='main'] div[role='row']",
    "div[data-testid='message-container']",
    "div[role='gridcell'] div[dir='auto']",
    "div[dir='auto'][class]",
];

/// Scrollable container holding the message history
pub const MESSAGE_CONTAINERS: &[&str] = &[
    "div[role='main'] div[role='grid']",
    "div[aria-label*='Messages in conversation']",
    "div[role='main']",
];

/// Markers of unread conversations
pub const UNREAD: &[&str] = &[
    "div[role='gridcell'] div[aria-label='Unread']",
    "span[aria-label='Unread']",
    "[aria-label='Mark as read']",
];

/// Reaction badges attached to a message
pub const REACTIONS: &[&str] = &[
    "[aria-label*='reaction']",
    "[aria-label*='Reaction']",
    "[data-reaction]",
    "img[role='img'][alt]",
];

/// Nested elements that may carry a time-like accessible label
pub const TIMESTAMP_CANDIDATES: &[&str] = &["[aria-label]", "abbr[title]"];

/// File extensions recognised as document attachments
pub const DOCUMENT_EXTENSIONS: &[&str] = &[
    "pdf", "doc", "docx", "xls", "xlsx", "ppt", "pptx", "txt", "csv", "zip", "rar", "7z",
];
