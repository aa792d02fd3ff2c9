//! The fixed intent catalog. Declaration order is the tie-break order.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentKind {
    Email,
    FileOperations,
    Calendar,
    WebSearch,
    CodeExecution,
    Database,
}

impl IntentKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::FileOperations => "file_operations",
            Self::Calendar => "calendar",
            Self::WebSearch => "web_search",
            Self::CodeExecution => "code_execution",
            Self::Database => "database",
        }
    }

    /// Title-cased label for prompts.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Email => "Email",
            Self::FileOperations => "File Operations",
            Self::Calendar => "Calendar",
            Self::WebSearch => "Web Search",
            Self::CodeExecution => "Code Execution",
            Self::Database => "Database",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim().to_ascii_lowercase();
        CATALOG
            .iter()
            .map(|entry| entry.kind)
            .find(|kind| kind.as_str() == value)
    }
}

impl fmt::Display for IntentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A pattern, optionally rejected when the text right after the match
/// matches `not_followed_by`.
#[derive(Debug, Clone, Copy)]
pub struct PatternSpec {
    pub pattern: &'static str,
    pub not_followed_by: Option<&'static str>,
}

const fn p(pattern: &'static str) -> PatternSpec {
    PatternSpec {
        pattern,
        not_followed_by: None,
    }
}

#[derive(Debug, Clone, Copy)]
pub struct IntentEntry {
    pub kind: IntentKind,
    pub patterns: &'static [PatternSpec],
    /// Tags matched against a server's name, endpoint and description.
    pub capabilities: &'static [&'static str],
    pub description: &'static str,
    pub setup_guide: &'static str,
    pub confirmation_message: &'static str,
}

pub const CATALOG: &[IntentEntry] = &[
    IntentEntry {
        kind: IntentKind::Email,
        patterns: &[
            p(r"\b(send|write|compose|draft|reply to|forward)\s+(?:an?\s+)?(?:email|mail|message)\b"),
            p(r"\bemail\s+(?:to|for|about)\b"),
            p(r"\bgmail\b"),
            p(r"\boutlook\b"),
            p(r"\bcheck\s+(?:my\s+)?(?:emails?|mail|inbox)\b"),
            p(r"\bsearch\s+(?:my\s+)?(?:emails?|mail)\b"),
        ],
        capabilities: &["gmail", "outlook"],
        description: "Email operations (send, read, search)",
        setup_guide: "To use email features, you need to configure Gmail or Outlook MCP servers in your settings.",
        confirmation_message: "I can help you with email operations. This will require access to your email account. Would you like me to proceed?",
    },
    IntentEntry {
        kind: IntentKind::FileOperations,
        patterns: &[
            p(r"\b(create|write|save|edit|modify|update)\s+(?:a\s+)?(?:file|document|text)\b"),
            p(r"\b(read|open|view|show|list)\s+(?:my\s+|the\s+)?(?:files?|documents?)\b"),
            p(r"\bsearch\s+(?:for\s+)?(?:files?|documents?)\b"),
            p(r"\b(delete|remove|trash)\s+(?:a\s+)?(?:file|document)\b"),
            p(r"\b(organize|sort|move)\s+(?:files?|documents?)\b"),
            p(r"\bgoogle\s+drive\b"),
            p(r"\b(list|show|view)\s+(?:my\s+)?google\s+drive\s+files\b"),
        ],
        capabilities: &["filesystem", "google_drive", "dropbox"],
        description: "File and document operations",
        setup_guide: "To use file operations, you need to configure Filesystem, Google Drive, or Dropbox MCP servers in your settings.",
        confirmation_message: "I can help you with file operations. This will require access to your file system. Would you like me to proceed?",
    },
    IntentEntry {
        kind: IntentKind::Calendar,
        patterns: &[
            p(r"\b(create|schedule|book|set up)\s+(?:an?\s+)?(?:meeting|appointment|event)\b"),
            p(r"\b(check|view|show)\s+(?:my\s+)?(?:calendar|schedule)\b"),
            p(r"\b(remind|reminder)\b"),
            p(r"\b(google\s+)?calendar\b"),
        ],
        capabilities: &["google_calendar", "outlook_calendar"],
        description: "Calendar and scheduling operations",
        setup_guide: "To use calendar features, you need to configure Google Calendar or Outlook Calendar MCP servers in your settings.",
        confirmation_message: "I can help you with calendar operations. This will require access to your calendar. Would you like me to proceed?",
    },
    IntentEntry {
        kind: IntentKind::WebSearch,
        patterns: &[
            p(r"\b(search|find|look up)\s+(?:for\s+)?(?:information|data|news)\b"),
            PatternSpec {
                pattern: r"\b(google|bing|search\s+engine)\b",
                not_followed_by: Some(r"^\s*(drive|calendar)"),
            },
            p(r"\b(latest|current|recent)\s+(?:news|information)\b"),
            p(r"\b(weather|temperature)\s+(?:in|for)\b"),
        ],
        capabilities: &["web_search", "weather"],
        description: "Web search and information retrieval",
        setup_guide: "To use web search features, you need to configure Web Search or Weather MCP servers in your settings.",
        confirmation_message: "I can help you search the web for information. Would you like me to proceed?",
    },
    IntentEntry {
        kind: IntentKind::CodeExecution,
        patterns: &[
            p(r"\b(run|execute|test)\s+(?:this\s+)?(?:code|script|program)\b"),
            p(r"\b(debug|fix|test)\s+(?:my\s+)?(?:code|script)\b"),
            p(r"\b(terminal|command\s+line|shell)\b"),
            p(r"\b(install|setup|configure)\s+(?:package|dependency)\b"),
        ],
        capabilities: &["terminal", "code_executor"],
        description: "Code execution and terminal operations",
        setup_guide: "To use code execution features, you need to configure Terminal or Code Executor MCP servers in your settings.",
        confirmation_message: "I can help you execute code or run terminal commands. This will run on your system. Would you like me to proceed?",
    },
    IntentEntry {
        kind: IntentKind::Database,
        patterns: &[
            p(r"\b(query|search|find)\s+(?:in\s+)?(?:database|db)\b"),
            p(r"\b(insert|add|create)\s+(?:record|entry|data)\b"),
            p(r"\b(update|modify|change)\s+(?:record|entry|data)\b"),
            p(r"\b(delete|remove)\s+(?:record|entry|data)\b"),
        ],
        capabilities: &["database", "sql"],
        description: "Database operations",
        setup_guide: "To use database features, you need to configure Database or SQL MCP servers in your settings.",
        confirmation_message: "I can help you with database operations. This will require access to your database. Would you like me to proceed?",
    },
];

#[must_use]
pub fn entry_for(kind: IntentKind) -> &'static IntentEntry {
    CATALOG
        .iter()
        .find(|entry| entry.kind == kind)
        .unwrap_or(&CATALOG[0])
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn every_kind_has_one_entry() {
        for entry in CATALOG {
            assert_eq!(entry_for(entry.kind).kind, entry.kind);
            assert_eq!(IntentKind::parse(entry.kind.as_str()), Some(entry.kind));
        }
        assert_eq!(IntentKind::parse("teleport"), None);
    }

    #[test]
    fn labels_are_title_case() {
        assert_eq!(IntentKind::FileOperations.label(), "File Operations");
        assert_eq!(
            serde_json::to_string(&IntentKind::WebSearch).unwrap(),
            "\"web_search\""
        );
    }
}
