//! Keyword filter deciding which inbound texts are relayed.
//!
//! Checks run in a fixed order and fail closed:
//! 1. length over `max_length` characters → reject
//! 2. more than `max_emoticons` emoji code points → reject
//! 3. any block keyword present → reject
//! 4. otherwise relay iff a monitor keyword is present
//!
//! All keyword matching is case-insensitive substring matching.

use anyhow::{Context, Result};
use regex::{Captures, Regex};

use crate::config::FilterConfig;

/// Code point ranges counted as emoticons.
///
/// The last range is very wide (it spans CJK and most symbol blocks); it is
/// kept as-is because existing deployments are tuned to it.
const EMOTICON_RANGES: &[(u32, u32)] = &[
    (0x1F600, 0x1F64F),
    (0x1F300, 0x1F5FF),
    (0x1F680, 0x1F6FF),
    (0x1F700, 0x1F77F),
    (0x1F780, 0x1F7FF),
    (0x1F800, 0x1F8FF),
    (0x1F900, 0x1F9FF),
    (0x1FA00, 0x1FA6F),
    (0x1FA70, 0x1FAFF),
    (0x2700, 0x27BF),
    (0x24C2, 0x1F251),
];

/// Count code points that fall into one of the emoticon ranges.
pub fn count_emoticons(text: &str) -> usize {
    text.chars()
        .filter(|c| {
            let cp = *c as u32;
            EMOTICON_RANGES
                .iter()
                .any(|(start, end)| (*start..=*end).contains(&cp))
        })
        .count()
}

/// Why a text was or was not accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Relay,
    TooLong { length: usize },
    TooManyEmoticons { count: usize },
    Blocked { keyword: String },
    NoMatch,
}

impl Verdict {
    pub fn is_relay(&self) -> bool {
        matches!(self, Verdict::Relay)
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Verdict::Relay => write!(f, "relay"),
            Verdict::TooLong { length } => write!(f, "too long ({} chars)", length),
            Verdict::TooManyEmoticons { count } => write!(f, "too many emoticons ({})", count),
            Verdict::Blocked { keyword } => write!(f, "blocked keyword '{}'", keyword),
            Verdict::NoMatch => write!(f, "no monitor keyword"),
        }
    }
}

/// Wraps keyword occurrences in `**` markers.
///
/// Keywords are tried in configured order at each position, so when two
/// keywords overlap at the same offset the one listed first wins (not the
/// longest).
#[derive(Debug, Clone)]
pub struct Highlighter {
    pattern: Option<Regex>,
}

impl Highlighter {
    pub fn new<S: AsRef<str>>(keywords: &[S]) -> Result<Self> {
        let alternatives: Vec<String> = keywords
            .iter()
            .map(|k| k.as_ref())
            .filter(|k| !k.is_empty())
            .map(regex::escape)
            .collect();

        if alternatives.is_empty() {
            return Ok(Self { pattern: None });
        }

        let pattern = Regex::new(&format!("(?i)(?:{})", alternatives.join("|")))
            .context("Failed to compile keyword pattern")?;
        Ok(Self {
            pattern: Some(pattern),
        })
    }

    pub fn apply(&self, text: &str) -> String {
        match &self.pattern {
            Some(re) => re
                .replace_all(text, |caps: &Captures| format!("**{}**", &caps[0]))
                .into_owned(),
            None => text.to_string(),
        }
    }
}

/// Process-wide filter rules, read-only after construction.
#[derive(Debug, Clone)]
pub struct FilterRules {
    monitor_words: Vec<String>,
    block_keywords: Vec<String>,
    monitor_lower: Vec<String>,
    block_lower: Vec<String>,
    pub max_length: usize,
    pub max_emoticons: usize,
    highlighter: Highlighter,
}

impl FilterRules {
    pub fn new(
        monitor_words: Vec<String>,
        block_keywords: Vec<String>,
        max_length: usize,
        max_emoticons: usize,
    ) -> Result<Self> {
        let highlighter = Highlighter::new(&monitor_words)?;
        Ok(Self {
            monitor_lower: monitor_words.iter().map(|w| w.to_lowercase()).collect(),
            block_lower: block_keywords.iter().map(|w| w.to_lowercase()).collect(),
            monitor_words,
            block_keywords,
            max_length,
            max_emoticons,
            highlighter,
        })
    }

    pub fn from_config(config: &FilterConfig) -> Result<Self> {
        Self::new(
            config.monitor_words.clone(),
            config.block_keywords.clone(),
            config.max_message_length,
            config.max_emoticons,
        )
    }

    pub fn monitor_words(&self) -> &[String] {
        &self.monitor_words
    }

    /// Run every check and report the first one that rejects the text.
    pub fn classify(&self, text: &str) -> Verdict {
        let length = text.chars().count();
        if length > self.max_length {
            return Verdict::TooLong { length };
        }

        let count = count_emoticons(text);
        if count > self.max_emoticons {
            return Verdict::TooManyEmoticons { count };
        }

        let lowered = text.to_lowercase();
        if let Some(idx) = self
            .block_lower
            .iter()
            .position(|k| !k.is_empty() && lowered.contains(k.as_str()))
        {
            return Verdict::Blocked {
                keyword: self.block_keywords[idx].clone(),
            };
        }

        // An empty monitor list never matches
        if self
            .monitor_lower
            .iter()
            .any(|k| !k.is_empty() && lowered.contains(k.as_str()))
        {
            Verdict::Relay
        } else {
            Verdict::NoMatch
        }
    }

    pub fn should_relay(&self, text: &str) -> bool {
        self.classify(text).is_relay()
    }

    /// Highlight monitor keywords in `text`.
    pub fn highlight(&self, text: &str) -> String {
        self.highlighter.apply(text)
    }
}
