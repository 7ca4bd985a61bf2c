//! `@mention` parsing for turn routing.
//!
//! Recognizes token-delimited `@name` where name is a known participant id or
//! `all`, case-insensitively. Unknown `@tokens` pass through untouched.

use std::sync::LazyLock;

use regex::Regex;

use roundtable_core::ids::ParticipantId;

static MENTION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"@([A-Za-z][A-Za-z0-9_-]*)\b").expect("mention pattern"));

/// Result of parsing mentions from a user message.
#[derive(Clone, Debug, PartialEq)]
pub struct ParsedMentions {
    /// Mentioned participants, deduplicated, in order of first appearance.
    pub mentions: Vec<ParticipantId>,
    /// The message with known mentions removed and whitespace normalized.
    pub clean_text: String,
    /// True when `@all` appeared.
    pub force_all: bool,
}

pub fn parse_mentions(text: &str, known: &[ParticipantId]) -> ParsedMentions {
    let mut mentions = Vec::new();
    let mut force_all = false;

    let is_known = |name: &str| {
        let id = ParticipantId::new(name);
        known.contains(&id).then_some(id)
    };

    for cap in MENTION_RE.captures_iter(text) {
        let name = &cap[1];
        if name.eq_ignore_ascii_case("all") {
            force_all = true;
        } else if let Some(id) = is_known(name) {
            if !mentions.contains(&id) {
                mentions.push(id);
            }
        }
    }

    // Strip only recognized mentions; unknown @tokens stay verbatim.
    let stripped = MENTION_RE.replace_all(text, |cap: &regex::Captures<'_>| {
        let name = &cap[1];
        if name.eq_ignore_ascii_case("all") || is_known(name).is_some() {
            String::new()
        } else {
            cap[0].to_string()
        }
    });

    let clean_text = stripped.split_whitespace().collect::<Vec<_>>().join(" ");

    ParsedMentions {
        mentions,
        clean_text,
        force_all,
    }
}

/// Participants forced to speak this turn: everyone on `@all`, otherwise the
/// mentioned participants that are actually enabled.
pub fn forced_speakers(parsed: &ParsedMentions, enabled: &[ParticipantId]) -> Vec<ParticipantId> {
    if parsed.force_all {
        return enabled.to_vec();
    }
    parsed
        .mentions
        .iter()
        .filter(|m| enabled.contains(m))
        .cloned()
        .collect()
}

/// Inverse of [`parse_mentions`] for a mention set: prefixes each id as an
/// `@mention` ahead of the text.
pub fn compose_mentions(ids: &[ParticipantId], text: &str) -> String {
    let mut parts: Vec<String> = ids.iter().map(|id| format!("@{id}")).collect();
    if !text.is_empty() {
        parts.push(text.to_string());
    }
    parts.join(" ")
}
