//! Maps a free-text message onto an intent category and the user's servers
//! that can serve it.
//!
//! Scoring, per category whose patterns match:
//!
//! - 0.5 base plus 0.2 for the match itself
//! - 0.1 when the strongest matching pattern is long (specific)
//! - 0.2 when the message contains an action word
//! - 0.05 for every further pattern of the same category that matches
//!
//! capped at 1.0. The highest score above the threshold wins; on a tie the
//! category declared first in the catalog wins.

use {
    regex::Regex,
    serde::Serialize,
    toolgate_config::IntentConfig,
    toolgate_mcp::ServerConfig,
    tracing::debug,
};

use crate::{
    catalog::{CATALOG, IntentEntry, IntentKind},
    error::Result,
};

const BASE_SCORE: f64 = 0.5;
const MATCH_BONUS: f64 = 0.2;
const SPECIFIC_PATTERN_BONUS: f64 = 0.1;
const SPECIFIC_PATTERN_LEN: usize = 20;
const ACTION_WORD_BONUS: f64 = 0.2;
const EXTRA_PATTERN_BONUS: f64 = 0.05;

const ACTION_WORDS: &[&str] = &["send", "create", "search", "run", "execute", "check", "view"];

/// A server as referenced from an intent match or a confirmation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerRef {
    pub id: String,
    pub name: String,
}

impl From<&ServerConfig> for ServerRef {
    fn from(server: &ServerConfig) -> Self {
        Self {
            id: server.id.clone(),
            name: server.name.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IntentMatch {
    pub kind: IntentKind,
    pub confidence: f64,
    /// The user's servers offering one of `capabilities`. May be empty.
    pub matched_servers: Vec<ServerRef>,
    pub capabilities: &'static [&'static str],
}

impl IntentMatch {
    #[must_use]
    pub fn has_servers(&self) -> bool {
        !self.matched_servers.is_empty()
    }
}

struct CompiledPattern {
    regex: Regex,
    not_followed_by: Option<Regex>,
    specific: bool,
}

impl CompiledPattern {
    fn matches(&self, message: &str) -> bool {
        self.regex.find_iter(message).any(|m| {
            self.not_followed_by
                .as_ref()
                .is_none_or(|reject| !reject.is_match(&message[m.end()..]))
        })
    }
}

struct CompiledIntent {
    entry: &'static IntentEntry,
    patterns: Vec<CompiledPattern>,
}

pub struct IntentDetector {
    intents: Vec<CompiledIntent>,
    threshold: f64,
}

impl IntentDetector {
    pub fn new(threshold: f64) -> Result<Self> {
        let intents = CATALOG
            .iter()
            .map(|entry| -> Result<CompiledIntent> {
                let patterns = entry
                    .patterns
                    .iter()
                    .map(|p| -> Result<CompiledPattern> {
                        Ok(CompiledPattern {
                            regex: Regex::new(&format!("(?i){}", p.pattern))?,
                            not_followed_by: p
                                .not_followed_by
                                .map(|reject| Regex::new(&format!("(?i){reject}")))
                                .transpose()?,
                            specific: p.pattern.len() > SPECIFIC_PATTERN_LEN,
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(CompiledIntent { entry, patterns })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { intents, threshold })
    }

    pub fn from_config(config: &IntentConfig) -> Result<Self> {
        Self::new(config.threshold)
    }

    #[must_use]
    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Best-scoring intent for `message`, with the servers able to serve it.
    #[must_use]
    pub fn detect(&self, message: &str, servers: &[ServerConfig]) -> Option<IntentMatch> {
        let has_action_word = message
            .split(|c: char| !c.is_alphanumeric())
            .any(|word| ACTION_WORDS.iter().any(|a| word.eq_ignore_ascii_case(a)));

        let mut best: Option<(&CompiledIntent, f64)> = None;
        for intent in &self.intents {
            let Some(score) = score(intent, message, has_action_word) else {
                continue;
            };
            debug!(intent = %intent.entry.kind, score, "intent pattern matched");
            if score > self.threshold && best.is_none_or(|(_, top)| score > top) {
                best = Some((intent, score));
            }
        }

        let (intent, confidence) = best?;
        let matched_servers = servers
            .iter()
            .filter(|server| offers_any(server, intent.entry.capabilities))
            .map(ServerRef::from)
            .collect();
        Some(IntentMatch {
            kind: intent.entry.kind,
            confidence,
            matched_servers,
            capabilities: intent.entry.capabilities,
        })
    }
}

fn score(intent: &CompiledIntent, message: &str, has_action_word: bool) -> Option<f64> {
    let matching: Vec<&CompiledPattern> = intent
        .patterns
        .iter()
        .filter(|p| p.matches(message))
        .collect();
    if matching.is_empty() {
        return None;
    }
    let mut score = BASE_SCORE + MATCH_BONUS;
    if matching.iter().any(|p| p.specific) {
        score += SPECIFIC_PATTERN_BONUS;
    }
    if has_action_word {
        score += ACTION_WORD_BONUS;
    }
    score += EXTRA_PATTERN_BONUS * (matching.len() - 1) as f64;
    Some(score.min(1.0))
}

/// Substring match of capability tags against the server's name, endpoint
/// and description, ignoring case and punctuation.
fn offers_any(server: &ServerConfig, capabilities: &[&str]) -> bool {
    let haystack = [
        Some(server.name.as_str()),
        Some(server.endpoint.as_str()),
        server.description.as_deref(),
    ]
    .into_iter()
    .flatten()
    .map(normalize)
    .collect::<Vec<_>>();
    capabilities.iter().any(|tag| {
        let tag = normalize(tag);
        haystack.iter().any(|field| field.contains(&tag))
    })
}

fn normalize(text: &str) -> String {
    text.chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_lowercase())
        .collect()
}
