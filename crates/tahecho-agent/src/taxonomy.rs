//! Error taxonomy and the user-facing message table
//!
//! Raw failure text from executors and the model client is reduced to a set of
//! [`ErrorTag`]s. When several tags apply in one turn the lowest one in
//! precedence order wins, so the user always sees exactly one message.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Error categories, declared in precedence order (first wins)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorTag {
    /// The language-model call itself failed
    ModelAccess,
    /// The issue tracker rejected our credentials
    DomainAuth,
    /// Timeout or refused connection to a remote dependency
    Connectivity,
    /// The requested resource does not exist upstream
    NotFound,
    /// A required dependency is not configured
    Unavailable,
    Unknown,
}

impl ErrorTag {
    pub const ALL: [ErrorTag; 6] = [
        ErrorTag::ModelAccess,
        ErrorTag::DomainAuth,
        ErrorTag::Connectivity,
        ErrorTag::NotFound,
        ErrorTag::Unavailable,
        ErrorTag::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorTag::ModelAccess => "model_access",
            ErrorTag::DomainAuth => "domain_auth",
            ErrorTag::Connectivity => "connectivity",
            ErrorTag::NotFound => "not_found",
            ErrorTag::Unavailable => "unavailable",
            ErrorTag::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == s)
    }
}

impl std::fmt::Display for ErrorTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when composing an answer fails outright
pub const APOLOGY: &str = "I'm sorry, but I encountered an unexpected issue. Please try again.";

/// Map a tag to its fixed user-facing message. Pure and total.
pub fn normalize(tag: ErrorTag) -> &'static str {
    match tag {
        ErrorTag::ModelAccess => {
            "I'm having trouble connecting to my language processing service. This might be a temporary issue. Please try again in a moment."
        }
        ErrorTag::DomainAuth => {
            "I'm unable to access your Jira information right now. Please check your Jira credentials and try again."
        }
        ErrorTag::Connectivity => {
            "I'm experiencing connection issues with one of my services. Please try again in a moment."
        }
        ErrorTag::NotFound => {
            "I couldn't find the requested information in Jira. Please check that the issue key or project name is correct."
        }
        ErrorTag::Unavailable => {
            "That capability isn't configured right now, so I can't answer this request. Please check the assistant's configuration."
        }
        ErrorTag::Unknown => {
            "I encountered an issue while processing your request. Please try rephrasing your question or try again later."
        }
    }
}

/// Pick the highest-precedence tag; an empty set resolves to `Unknown`
pub fn resolve(tags: impl IntoIterator<Item = ErrorTag>) -> ErrorTag {
    tags.into_iter().min().unwrap_or(ErrorTag::Unknown)
}

static TAG_PATTERNS: LazyLock<Vec<(ErrorTag, Regex)>> = LazyLock::new(|| {
    [
        (ErrorTag::ModelAccess, r"(?i)api.?key|openai|language model"),
        (
            ErrorTag::DomainAuth,
            r"(?i)\b40[13]\b|unauthori[sz]ed|forbidden|authentication|invalid credentials",
        ),
        (
            ErrorTag::Connectivity,
            r"(?i)time[d ]?\s?out|connection|refused|unreachable|dns error",
        ),
        (ErrorTag::NotFound, r"(?i)\b404\b|not found|does not exist"),
        (ErrorTag::Unavailable, r"(?i)not configured|unavailable"),
    ]
    .into_iter()
    .filter_map(|(tag, p)| Regex::new(p).ok().map(|re| (tag, re)))
    .collect()
});

/// Every tag whose pattern matches the raw failure text, in precedence order
pub fn tags_in(text: &str) -> Vec<ErrorTag> {
    TAG_PATTERNS
        .iter()
        .filter(|(_, re)| re.is_match(text))
        .map(|(tag, _)| *tag)
        .collect()
}

/// Tag a failure from the language-model client.
///
/// Connectivity problems keep their own tag; anything else means the model
/// could not be used.
pub fn tag_model_error(error: &tahecho_ai::Error) -> ErrorTag {
    if error.is_connectivity() {
        ErrorTag::Connectivity
    } else {
        ErrorTag::ModelAccess
    }
}
