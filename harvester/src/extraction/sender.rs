//! Sender recovery from the accessible label of a message row.

/// Identity used for messages written by the signed-in account
pub const SELF_SENDER: &str = "You";

pub const UNKNOWN_SENDER: &str = "Unknown";

const SELF_PREFIXES: &[&str] = &[
    "you sent",
    "you replied",
    "you wrote",
    "you said",
    "you reacted",
    "you forwarded",
    "you:",
];

const ACTION_TOKENS: &[&str] = &[
    " sent ",
    " replied",
    " wrote",
    " reacted",
    " said",
    " forwarded",
];

/// Longest label prefix accepted as a `Name: text` actor
const MAX_COLON_ACTOR_LEN: usize = 60;

/// Parse an accessible label such as `"Alice sent a photo"` or `"You replied to Bob"`.
///
/// Self-authored labels yield [`SELF_SENDER`]; labels without a recognisable actor
/// yield [`UNKNOWN_SENDER`].
pub fn parse_sender(label: &str) -> String {
    let label = label.trim();
    // ASCII lowering keeps byte offsets valid for slicing `label`
    let lower = label.to_ascii_lowercase();

    if lower == "you" || SELF_PREFIXES.iter().any(|p| lower.starts_with(p)) {
        return SELF_SENDER.to_string();
    }

    let action = ACTION_TOKENS
        .iter()
        .filter_map(|token| lower.find(token))
        .min();
    if let Some(at) = action {
        let actor = label[..at].trim().trim_end_matches(':').trim();
        if !actor.is_empty() {
            return actor.to_string();
        }
    }

    if let Some(at) = label.find(':') {
        let actor = label[..at].trim();
        if !actor.is_empty() && actor.len() <= MAX_COLON_ACTOR_LEN {
            return actor.to_string();
        }
    }

    UNKNOWN_SENDER.to_string()
}
