//! Operator configuration.
//!
//! The config document is markdown with fenced `yaml` blocks. Blocks are merged in
//! document order on top of [`DEFAULT_CONFIG`], validated once into typed settings,
//! and never re-read during a run.

use crate::errors::HarvestError;
use crate::model::MediaKind;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

pub const DEFAULT_CONFIG_FILE: &str = "bot_config.md";

/// Built-in defaults, merged underneath every user document
pub const DEFAULT_CONFIG: &str = r#"
mode: monitor
polling_interval: 10
wait_timeout: 10
headless_mode: false
messenger_url: "https://www.messenger.com/"
output_dir: ./data
scope: all
specific_conversations: []
filters:
  exclude_archived: true
  exclude_muted: false
  only_unread: false
  min_message_count: 0
discovery:
  max_scroll_iterations: 20
  settle_interval_ms: 2000
data_to_collect:
  messages:
    enabled: true
    include_reactions: true
    include_timestamps: true
    include_sender_info: true
    load_history: true
    history_scroll_iterations: 3
  media:
    enabled: true
    types: [images, videos, audio, documents]
    download_files: false
  metadata:
    enabled: true
    include_read_status: true
    include_delivery_status: true
    include_conversation_info: true
monitoring:
  enabled: true
  detect_new_messages: true
  detect_typing: false
  detect_online_status: false
  track_message_count: true
notifications:
  enabled: true
  methods: [console, log_file]
on_new_message:
  actions:
    - type: log
      enabled: true
    - type: mark_as_read
      enabled: false
    - type: save_to_file
      enabled: true
      file_path: ./data/messages.txt
      format: json
debugging:
  enabled: true
  save_screenshots: true
  save_page_source: true
  screenshot_on_error: true
  verbose_logging: false
  log_level: INFO
  log_file: ./logs/bot.log
  debug_dir: ./debug_res/
security:
  respect_rate_limits: true
  random_delays: true
  min_delay: 1
  max_delay: 3
  max_actions_per_hour: 100
  max_messages_per_conversation: 50
selectors: {}
"#;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    Monitor,
    Extract,
    Other(String),
}

impl From<&str> for Mode {
    fn from(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "monitor" => Mode::Monitor,
            "extract" => Mode::Extract,
            _ => Mode::Other(s.to_string()),
        }
    }
}

/// Which discovered conversations get processed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversationScope {
    All,
    Specific,
    Other(String),
}

impl From<&str> for ConversationScope {
    fn from(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "all" => ConversationScope::All,
            "specific" => ConversationScope::Specific,
            _ => ConversationScope::Other(s.to_string()),
        }
    }
}

fn default_true() -> bool {
    true
}

/// One entry of `specific_conversations`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationRule {
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub actions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
}

/// One entry of `on_new_message.actions`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionConfig {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}

/// Field inclusion flags for message extraction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectSettings {
    pub text: bool,
    pub timestamps: bool,
    pub sender: bool,
    pub reactions: bool,
    pub media: bool,
    pub media_types: Vec<MediaKind>,
    pub load_history: bool,
    pub history_scroll_iterations: usize,
}

impl Default for CollectSettings {
    fn default() -> Self {
        Self {
            text: true,
            timestamps: true,
            sender: true,
            reactions: true,
            media: true,
            media_types: MediaKind::ALL.to_vec(),
            load_history: true,
            history_scroll_iterations: 3,
        }
    }
}

/// Replacement selector lists from the `selectors` section
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SelectorOverrides {
    #[serde(default)]
    pub conversations: Option<Vec<String>>,
    #[serde(default)]
    pub conversation_containers: Option<Vec<String>>,
    #[serde(default)]
    pub messages: Option<Vec<String>>,
    #[serde(default)]
    pub message_containers: Option<Vec<String>>,
    #[serde(default)]
    pub unread: Option<Vec<String>>,
    #[serde(default)]
    pub reactions: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct MessagesSection {
    enabled: bool,
    include_reactions: bool,
    include_timestamps: bool,
    include_sender_info: bool,
    load_history: bool,
    history_scroll_iterations: usize,
}

#[derive(Debug, Deserialize)]
struct MediaSection {
    enabled: bool,
    types: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct DataToCollect {
    messages: MessagesSection,
    media: MediaSection,
}

#[derive(Debug, Deserialize)]
struct MonitoringSection {
    enabled: bool,
    detect_new_messages: bool,
}

#[derive(Debug, Deserialize)]
struct NotificationsSection {
    enabled: bool,
    methods: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct OnNewMessage {
    actions: Vec<ActionConfig>,
}

#[derive(Debug, Deserialize)]
struct DebuggingSection {
    enabled: bool,
    save_screenshots: bool,
    screenshot_on_error: bool,
    log_level: String,
    log_file: String,
    debug_dir: String,
}

#[derive(Debug, Deserialize)]
struct SecuritySection {
    max_messages_per_conversation: usize,
}

#[derive(Debug, Deserialize)]
struct DiscoverySection {
    max_scroll_iterations: usize,
    settle_interval_ms: u64,
}

/// The validated view of the merged document
#[derive(Debug, Deserialize)]
struct Settings {
    mode: String,
    polling_interval: f64,
    wait_timeout: f64,
    messenger_url: String,
    output_dir: String,
    scope: String,
    specific_conversations: Vec<ConversationRule>,
    discovery: DiscoverySection,
    data_to_collect: DataToCollect,
    monitoring: MonitoringSection,
    notifications: NotificationsSection,
    on_new_message: OnNewMessage,
    debugging: DebuggingSection,
    security: SecuritySection,
    #[serde(default)]
    selectors: SelectorOverrides,
}

/// Immutable run configuration
#[derive(Debug)]
pub struct Config {
    root: Value,
    settings: Settings,
    collect: CollectSettings,
    polling_interval: Duration,
    wait_timeout: Duration,
    source: Option<PathBuf>,
}

const YAML_BLOCK_PATTERN: &str = r"(?s)```ya?ml[ \t]*\r?\n(.*?)\r?\n[ \t]*```";

/// Pull every fenced yaml block out of a markdown document
pub fn extract_yaml_blocks(markdown: &str) -> Result<Vec<&str>, HarvestError> {
    let pattern = Regex::new(YAML_BLOCK_PATTERN)
        .map_err(|e| HarvestError::Internal(format!("yaml block pattern: {e}")))?;
    Ok(pattern
        .captures_iter(markdown)
        .filter_map(|c| c.get(1).map(|m| m.as_str()))
        .collect())
}

/// Recursively merge `source` into `target`; mappings merge, everything else replaces
pub fn merge_values(target: &mut Value, source: Value) {
    match (target, source) {
        (Value::Mapping(target), Value::Mapping(source)) => {
            for (key, value) in source {
                match target.get_mut(&key) {
                    Some(existing) if existing.is_mapping() && value.is_mapping() => {
                        merge_values(existing, value)
                    }
                    _ => {
                        target.insert(key, value);
                    }
                }
            }
        }
        (target, source) => *target = source,
    }
}

impl Config {
    /// Built-in defaults only
    pub fn defaults() -> Result<Self, HarvestError> {
        Self::from_user_value(Value::Mapping(Mapping::new()))
    }

    /// Load a config document. Markdown files contribute their fenced yaml blocks;
    /// `.yaml`/`.yml` files are parsed whole. A missing or empty document falls back
    /// to the defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, HarvestError> {
        let path = path.as_ref();
        if !path.exists() {
            warn!(path = %path.display(), "Config file does not exist, using defaults");
            return Ok(Self::defaults()?.with_source(path));
        }

        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read config, using defaults");
                return Ok(Self::defaults()?.with_source(path));
            }
        };

        let is_plain_yaml = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("yaml") || e.eq_ignore_ascii_case("yml"));

        let config = if is_plain_yaml {
            Self::from_yaml_str(&content)?
        } else {
            Self::from_markdown(&content)?
        };
        info!(path = %path.display(), "Loaded configuration");
        Ok(config.with_source(path))
    }

    /// Merge every valid yaml block of a markdown document; malformed blocks are skipped
    pub fn from_markdown(markdown: &str) -> Result<Self, HarvestError> {
        let mut user = Value::Mapping(Mapping::new());
        let mut merged_blocks = 0usize;

        for (index, block) in extract_yaml_blocks(markdown)?.into_iter().enumerate() {
            match serde_yaml::from_str::<Value>(block) {
                Ok(value @ Value::Mapping(_)) => {
                    merge_values(&mut user, value);
                    merged_blocks += 1;
                }
                Ok(_) => debug!(index, "Skipping yaml block that is not a mapping"),
                Err(e) => warn!(index, error = %e, "Failed to parse yaml block"),
            }
        }

        if merged_blocks == 0 {
            warn!("No valid yaml blocks found, using defaults");
        }
        Self::from_user_value(user)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self, HarvestError> {
        let user: Value = serde_yaml::from_str(yaml)?;
        match user {
            Value::Mapping(_) => Self::from_user_value(user),
            Value::Null => Self::from_user_value(Value::Mapping(Mapping::new())),
            _ => Err(HarvestError::Config(
                "config document must be a mapping".to_string(),
            )),
        }
    }

    fn from_user_value(user: Value) -> Result<Self, HarvestError> {
        let mut root: Value = serde_yaml::from_str(DEFAULT_CONFIG)?;
        merge_values(&mut root, user);

        let settings: Settings = serde_yaml::from_value(root.clone())
            .map_err(|e| HarvestError::Config(format!("invalid configuration: {e}")))?;

        let polling_interval = Duration::try_from_secs_f64(settings.polling_interval)
            .ok()
            .filter(|d| !d.is_zero())
            .ok_or_else(|| {
                HarvestError::Config(format!(
                    "polling_interval must be a positive number of seconds, got {}",
                    settings.polling_interval
                ))
            })?;
        let wait_timeout = Duration::try_from_secs_f64(settings.wait_timeout).map_err(|e| {
            HarvestError::Config(format!(
                "wait_timeout must be a non-negative number of seconds, got {}: {e}",
                settings.wait_timeout
            ))
        })?;

        let collect = collect_settings(&settings.data_to_collect);
        Ok(Self {
            root,
            settings,
            collect,
            polling_interval,
            wait_timeout,
            source: None,
        })
    }

    fn with_source(mut self, path: &Path) -> Self {
        self.source = Some(path.to_path_buf());
        self
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// Look up a dotted key such as `debugging.enabled`
    pub fn get(&self, key: &str) -> Option<&Value> {
        key.split('.').try_fold(&self.root, |value, part| match value {
            Value::Mapping(map) => map.get(part),
            _ => None,
        })
    }

    /// Look up a dotted key and deserialize it, falling back to `default` when the
    /// key is missing or has another type
    pub fn get_or<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        match self.get(key) {
            Some(value) => serde_yaml::from_value(value.clone()).unwrap_or_else(|e| {
                debug!(key, error = %e, "Config value has unexpected type, using default");
                default
            }),
            None => default,
        }
    }

    pub fn mode(&self) -> Mode {
        Mode::from(self.settings.mode.as_str())
    }

    pub fn scope(&self) -> ConversationScope {
        ConversationScope::from(self.settings.scope.as_str())
    }

    pub fn polling_interval(&self) -> Duration {
        self.polling_interval
    }

    pub fn wait_timeout(&self) -> Duration {
        self.wait_timeout
    }

    pub fn messenger_url(&self) -> &str {
        &self.settings.messenger_url
    }

    pub fn output_dir(&self) -> &Path {
        Path::new(&self.settings.output_dir)
    }

    pub fn specific_conversations(&self) -> &[ConversationRule] {
        &self.settings.specific_conversations
    }

    /// Names of enabled scope rules, in document order
    pub fn enabled_conversation_names(&self) -> Vec<&str> {
        self.settings
            .specific_conversations
            .iter()
            .filter(|rule| rule.enabled)
            .map(|rule| rule.name.as_str())
            .collect()
    }

    pub fn collect(&self) -> &CollectSettings {
        &self.collect
    }

    pub fn discovery_max_iterations(&self) -> usize {
        self.settings.discovery.max_scroll_iterations
    }

    pub fn settle_interval(&self) -> Duration {
        Duration::from_millis(self.settings.discovery.settle_interval_ms)
    }

    pub fn monitoring_enabled(&self) -> bool {
        self.settings.monitoring.enabled
    }

    pub fn detect_new_messages(&self) -> bool {
        self.settings.monitoring.detect_new_messages
    }

    pub fn notifications_enabled(&self) -> bool {
        self.settings.notifications.enabled
    }

    pub fn notification_methods(&self) -> &[String] {
        &self.settings.notifications.methods
    }

    pub fn new_message_actions(&self) -> &[ActionConfig] {
        &self.settings.on_new_message.actions
    }

    pub fn debugging_enabled(&self) -> bool {
        self.settings.debugging.enabled
    }

    pub fn save_screenshots(&self) -> bool {
        self.settings.debugging.enabled && self.settings.debugging.save_screenshots
    }

    pub fn screenshot_on_error(&self) -> bool {
        self.settings.debugging.enabled && self.settings.debugging.screenshot_on_error
    }

    pub fn log_level(&self) -> &str {
        &self.settings.debugging.log_level
    }

    pub fn log_file(&self) -> &Path {
        Path::new(&self.settings.debugging.log_file)
    }

    pub fn debug_dir(&self) -> &Path {
        Path::new(&self.settings.debugging.debug_dir)
    }

    /// Zero means no cap
    pub fn max_messages_per_conversation(&self) -> usize {
        self.settings.security.max_messages_per_conversation
    }

    pub fn selector_overrides(&self) -> &SelectorOverrides {
        &self.settings.selectors
    }

    /// Extraction runs without being asked when the mode is `extract`, or when an
    /// enabled scope rule asks for history or message saving
    pub fn should_auto_extract(&self) -> bool {
        if self.mode() == Mode::Extract {
            return true;
        }
        self.scope() == ConversationScope::Specific
            && self
                .settings
                .specific_conversations
                .iter()
                .filter(|rule| rule.enabled)
                .any(|rule| {
                    rule.actions
                        .iter()
                        .any(|a| a == "extract_history" || a == "save_messages")
                })
    }
}

fn collect_settings(data: &DataToCollect) -> CollectSettings {
    let messages = &data.messages;
    let mut media_types = Vec::new();
    for name in &data.media.types {
        match MediaKind::from_config_name(name) {
            Some(kind) if !media_types.contains(&kind) => media_types.push(kind),
            Some(_) => {}
            None => warn!(media_type = %name, "Ignoring unknown media type in config"),
        }
    }

    CollectSettings {
        text: messages.enabled,
        timestamps: messages.enabled && messages.include_timestamps,
        sender: messages.enabled && messages.include_sender_info,
        reactions: messages.enabled && messages.include_reactions,
        media: data.media.enabled && !media_types.is_empty(),
        media_types,
        load_history: messages.load_history,
        history_scroll_iterations: messages.history_scroll_iterations,
    }
}
