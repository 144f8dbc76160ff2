//! Topic router: picks the notebook and the epistemic mode for a transcript.
//!
//! Pure and deterministic. Topic matchers run in a fixed order and always end
//! at the `Untitled` bucket, so routing never fails:
//!
//! 1. Date-prefixed file name: `2025-12-29 Spin notes.m4a` → `Spin notes`
//! 2. Explicit `TOPIC: ...` line in the transcript
//! 3. Introductory phrase ("this is about ...", "talking about ...")
//! 4. Most frequent content words
//! 5. `Untitled`

use std::collections::HashMap;
use std::sync::OnceLock;

use chrono::NaiveDate;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::domain::{Mode, RouteDecision, TopicSource};

/// Bucket used when nothing else matches
pub const DEFAULT_TOPIC: &str = "Untitled";

/// Limits for inferred topics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingLimits {
    /// Keywords kept for a frequency-based topic
    pub max_words: usize,
    /// Characters kept for a phrase or keyword topic
    pub max_chars: usize,
}

impl Default for RoutingLimits {
    fn default() -> Self {
        Self {
            max_words: 6,
            max_chars: 80,
        }
    }
}

fn cached(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("router patterns are valid"))
}

fn date_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    cached(&RE, r"\b\d{4}-\d{2}-\d{2}\b")
}

fn explicit_topic_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    cached(&RE, r"(?im)^[ \t]*TOPIC[ \t]*:[ \t]*(.+?)[ \t]*$")
}

fn meta_line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    cached(&RE, r"(?i)^\s*(topic|mode)\s*:\s*.+$")
}

fn this_is_about_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    cached(
        &RE,
        r"(?i)\b(?:this\s+is\s+about|the\s+topic\s+is|topic\s+is)\s+(.{3,80}?)(?:[.\n\r!?]|$)",
    )
}

fn talking_about_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    cached(
        &RE,
        r"(?i)\b(?:talk(?:ing)?|think(?:ing)?|reflect(?:ing)?|focus(?:ing)?|rant(?:ing)?)\s+about\s+(.{3,80}?)(?:[.\n\r!?]|$)",
    )
}

fn word_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    cached(&RE, r"[a-z][a-z0-9']+")
}

fn whitespace_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    cached(&RE, r"\s+")
}

const STOPWORDS: &[&str] = &[
    "a", "about", "after", "again", "all", "also", "am", "an", "and", "any", "are", "as", "at",
    "back", "be", "because", "been", "before", "but", "by", "can", "could", "did", "do", "does",
    "doing", "down", "even", "for", "from", "get", "getting", "go", "going", "got", "had", "has",
    "have", "having", "he", "her", "here", "hers", "him", "his", "how", "i", "if", "in", "into",
    "is", "it", "its", "just", "like", "lot", "me", "more", "most", "my", "no", "not", "now",
    "of", "on", "one", "or", "our", "out", "really", "right", "said", "say", "saying", "see",
    "so", "some", "sort", "that", "the", "their", "them", "then", "there", "these", "they",
    "this", "to", "up", "us", "very", "was", "we", "were", "what", "when", "which", "with",
    "would", "yeah", "you", "your",
];

const ACRONYMS: &[&str] = &["ai", "ml", "uk", "us"];

/// Phrase lists per mode, in tie-break priority order
const MODE_PATTERNS: &[(Mode, &[&str])] = &[
    (
        Mode::PrepForSharing,
        &[
            r"\bwrite this up\b",
            r"\bfor sharing\b",
            r"\bpublish\b",
            r"\bblog\b",
            r"\bnewsletter\b",
            r"\bpresentation\b",
        ],
    ),
    (
        Mode::Claims,
        &[
            r"\bthis proves\b",
            r"\bobviously\b",
            r"\btherefore\b",
            r"\bthus\b",
            r"\bmust be\b",
            r"\bcauses\b",
            r"\bleads to\b",
            r"\bresults in\b",
            r"\bthe real reason is\b",
        ],
    ),
    (
        Mode::ModelForming,
        &[
            r"\bmodel\b",
            r"\bframework\b",
            r"\bassumptions?\b",
            r"\bmechanism\b",
            r"\bvariables?\b",
            r"\bequations?\b",
            r"\blet'?s\s+define\b",
            r"\boperationali[sz]e\b",
        ],
    ),
];

fn mode_regexes() -> &'static Vec<(Mode, Vec<Regex>)> {
    static RES: OnceLock<Vec<(Mode, Vec<Regex>)>> = OnceLock::new();
    RES.get_or_init(|| {
        MODE_PATTERNS
            .iter()
            .map(|(mode, patterns)| {
                let compiled = patterns
                    .iter()
                    .map(|p| Regex::new(p).expect("mode patterns are valid"))
                    .collect();
                (*mode, compiled)
            })
            .collect()
    })
}

/// Route a transcript to a topic and mode
pub fn route(file_name: &str, transcript: &str, limits: &RoutingLimits) -> RouteDecision {
    let (topic, topic_source) = match topic_from_filename(file_name) {
        Some(topic) => (topic, TopicSource::Filename),
        None => infer_topic(transcript, limits),
    };

    RouteDecision {
        topic,
        topic_source,
        mode: infer_mode(transcript),
    }
}

/// Topic from `<anything>YYYY-MM-DD<topic>.<ext>`.
///
/// The first token that is a real calendar date wins; the remainder after it
/// is trimmed of separators. `None` when there is no date or no remainder.
pub fn topic_from_filename(file_name: &str) -> Option<String> {
    let stem = match file_name.rfind('.') {
        Some(idx) if idx > 0 => &file_name[..idx],
        _ => file_name,
    };

    let date = date_re()
        .find_iter(stem)
        .find(|m| NaiveDate::parse_from_str(m.as_str(), "%Y-%m-%d").is_ok())?;

    let topic = stem[date.end()..]
        .trim_start_matches(|c: char| c.is_whitespace() || matches!(c, '_' | '-' | '–' | '—' | ':'))
        .trim();

    (!topic.is_empty()).then(|| topic.to_string())
}

/// Value of the first `TOPIC: ...` line
pub fn explicit_topic(transcript: &str) -> Option<String> {
    explicit_topic_re()
        .captures(transcript)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|t| !t.is_empty())
}

fn strip_meta_lines(transcript: &str) -> String {
    transcript
        .lines()
        .filter(|line| !meta_line_re().is_match(line.trim()))
        .collect::<Vec<_>>()
        .join("\n")
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect::<String>().trim_end().to_string()
}

fn title_word(word: &str) -> String {
    if ACRONYMS.contains(&word) {
        return word.to_ascii_uppercase();
    }
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Infer a topic from transcript content alone
pub fn infer_topic(transcript: &str, limits: &RoutingLimits) -> (String, TopicSource) {
    if let Some(topic) = explicit_topic(transcript) {
        return (topic, TopicSource::Explicit);
    }

    let cleaned = strip_meta_lines(transcript);

    for pattern in [this_is_about_re(), talking_about_re()] {
        if let Some(phrase) = pattern.captures(&cleaned).and_then(|c| c.get(1)) {
            let phrase = whitespace_re().replace_all(phrase.as_str().trim(), " ");
            let topic = truncate_chars(&phrase, limits.max_chars);
            if !topic.is_empty() {
                return (topic, TopicSource::Phrase);
            }
        }
    }

    let lowered = cleaned.to_lowercase();
    let mut freq: HashMap<&str, (usize, usize)> = HashMap::new();
    for (idx, m) in word_re().find_iter(&lowered).enumerate() {
        let word = m.as_str().trim_matches('\'');
        if word.len() < 2 || STOPWORDS.contains(&word) {
            continue;
        }
        freq.entry(word).or_insert((0, idx)).0 += 1;
    }

    let mut ranked: Vec<(&str, usize, usize)> =
        freq.into_iter().map(|(w, (n, pos))| (w, n, pos)).collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));

    let picked: Vec<String> = ranked
        .iter()
        .take(limits.max_words)
        .map(|(w, _, _)| title_word(w))
        .collect();
    let topic = truncate_chars(&picked.join(" "), limits.max_chars);
    if !topic.is_empty() {
        return (topic, TopicSource::Keywords);
    }

    (DEFAULT_TOPIC.to_string(), TopicSource::Default)
}

/// Score each mode by distinct phrases matched; ties go to the earlier mode
/// in priority order, no matches to `Brainstorming`.
pub fn infer_mode(transcript: &str) -> Mode {
    let text = strip_meta_lines(transcript).to_lowercase();

    let mut best = (Mode::Brainstorming, 0usize);
    for (mode, patterns) in mode_regexes() {
        let score = patterns.iter().filter(|p| p.is_match(&text)).count();
        if score > best.1 {
            best = (*mode, score);
        }
    }
    best.0
}

/// Make a topic safe as a file name.
///
/// Path separators become `-`, reserved and control characters are removed,
/// whitespace is collapsed and leading dots are dropped.
pub fn sanitize_topic(topic: &str) -> String {
    let mut out = String::with_capacity(topic.len());
    let mut last_was_sep = false;
    for c in topic.trim().chars() {
        if c == '/' || c == '\\' {
            if !last_was_sep {
                out.push('-');
            }
            last_was_sep = true;
            continue;
        }
        last_was_sep = false;
        if matches!(c, ':' | '*' | '?' | '"' | '<' | '>' | '|') || (c.is_control() && c != '\t' && c != '\n') {
            continue;
        }
        out.push(c);
    }

    let collapsed = whitespace_re().replace_all(&out, " ");
    let cleaned = collapsed.trim().trim_start_matches('.').trim_start();
    if cleaned.is_empty() {
        DEFAULT_TOPIC.to_string()
    } else {
        cleaned.to_string()
    }
}
