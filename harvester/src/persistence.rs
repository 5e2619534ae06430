//! Append-only JSON archive of discovery snapshots and message batches.
//!
//! Layout under the output directory:
//!
//! ```text
//! conversations_{ts}.json
//! {folder}/metadata_{ts}.json
//! {folder}/messages_{ts}.json
//! ```
//!
//! Files are always created fresh; an existing file is never replaced.

use crate::errors::HarvestError;
use crate::model::{Conversation, ConversationSummary, Message};
use chrono::{DateTime, Local, Utc};
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub const MAX_FOLDER_NAME_LEN: usize = 100;
pub const FOLDER_JOINER: char = '_';
pub const UNKNOWN_FOLDER: &str = "unknown";

const ILLEGAL_PATH_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Turn a conversation name into a single safe path segment
pub fn sanitize_folder_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if ILLEGAL_PATH_CHARS.contains(&c) || c.is_control() {
                ' '
            } else {
                c
            }
        })
        .collect();

    let joiner = FOLDER_JOINER.to_string();
    let joined = cleaned.split_whitespace().collect::<Vec<_>>().join(&joiner);
    let truncated: String = joined.chars().take(MAX_FOLDER_NAME_LEN).collect();
    let truncated = truncated.trim_matches(|c| c == FOLDER_JOINER || c == '.');

    if truncated.is_empty() {
        UNKNOWN_FOLDER.to_string()
    } else {
        truncated.to_string()
    }
}

fn batch_timestamp() -> String {
    Local::now().format("%Y%m%d_%H%M%S_%6f").to_string()
}

#[derive(Serialize)]
struct ConversationList<'a> {
    timestamp: DateTime<Utc>,
    total_count: usize,
    conversations: &'a [ConversationSummary],
}

#[derive(Serialize)]
struct ConversationMetadata<'a> {
    name: &'a str,
    url: Option<&'a str>,
    folder: &'a str,
    discovered_at: DateTime<Utc>,
}

#[derive(Serialize)]
struct MessageBatch<'a> {
    conversation_name: &'a str,
    folder: &'a str,
    message_count: usize,
    extracted_at: DateTime<Utc>,
    messages: &'a [Message],
}

/// What a discovery snapshot wrote, and which conversations failed
#[derive(Debug, Default)]
pub struct SnapshotReport {
    pub list_file: PathBuf,
    pub metadata_files: Vec<PathBuf>,
    pub failures: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct Archive {
    output_dir: PathBuf,
}

impl Archive {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn conversation_dir(&self, conversation_name: &str) -> PathBuf {
        self.output_dir.join(sanitize_folder_name(conversation_name))
    }

    /// Write the list of all conversations plus one metadata file per conversation.
    ///
    /// Failing to write the list is an error. A failed metadata file is recorded in
    /// the report and the remaining conversations are still written.
    pub fn write_conversation_snapshot(
        &self,
        conversations: &[Conversation],
    ) -> Result<SnapshotReport, HarvestError> {
        fs::create_dir_all(&self.output_dir)?;

        let summaries: Vec<ConversationSummary> =
            conversations.iter().map(Conversation::summary).collect();
        let list = ConversationList {
            timestamp: Utc::now(),
            total_count: summaries.len(),
            conversations: &summaries,
        };
        let list_file = write_json_new(&self.output_dir, "conversations", &list)?;
        info!(path = %list_file.display(), count = summaries.len(), "💾 Saved conversation list");

        let mut report = SnapshotReport {
            list_file,
            ..SnapshotReport::default()
        };
        for conversation in conversations {
            match self.write_metadata(conversation) {
                Ok(path) => report.metadata_files.push(path),
                Err(e) => {
                    warn!(conversation = %conversation.name, error = %e, "Failed to save conversation metadata");
                    report.failures.push((conversation.name.clone(), e.to_string()));
                }
            }
        }
        Ok(report)
    }

    fn write_metadata(&self, conversation: &Conversation) -> Result<PathBuf, HarvestError> {
        let folder = sanitize_folder_name(&conversation.name);
        let dir = self.output_dir.join(&folder);
        fs::create_dir_all(&dir)?;
        let metadata = ConversationMetadata {
            name: &conversation.name,
            url: conversation.url.as_deref(),
            folder: &folder,
            discovered_at: Utc::now(),
        };
        write_json_new(&dir, "metadata", &metadata)
    }

    /// Write one message batch into the conversation's folder
    pub fn write_messages(
        &self,
        messages: &[Message],
        conversation_name: &str,
    ) -> Result<PathBuf, HarvestError> {
        let folder = sanitize_folder_name(conversation_name);
        let dir = self.output_dir.join(&folder);
        fs::create_dir_all(&dir)?;

        let batch = MessageBatch {
            conversation_name,
            folder: &folder,
            message_count: messages.len(),
            extracted_at: Utc::now(),
            messages,
        };
        let path = write_json_new(&dir, "messages", &batch)?;
        info!(path = %path.display(), count = messages.len(), "💾 Saved messages");
        Ok(path)
    }
}

/// Create `{prefix}_{timestamp}.json` in `dir`, adding a counter when the name is taken
fn write_json_new<T: Serialize>(dir: &Path, prefix: &str, value: &T) -> Result<PathBuf, HarvestError> {
    let stamp = batch_timestamp();
    let (path, file) = create_unique(dir, prefix, &stamp)?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, value)?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    Ok(path)
}

fn create_unique(dir: &Path, prefix: &str, stamp: &str) -> Result<(PathBuf, File), HarvestError> {
    for attempt in 0u32.. {
        let name = if attempt == 0 {
            format!("{prefix}_{stamp}.json")
        } else {
            format!("{prefix}_{stamp}_{attempt}.json")
        };
        let path = dir.join(name);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => return Ok((path, file)),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                debug!(path = %path.display(), "File exists, trying next name");
            }
            Err(e) => return Err(e.into()),
        }
    }
    Err(HarvestError::Internal(format!(
        "no free file name for {prefix}_{stamp}"
    )))
}
