//! Classifies console entries by level and pattern, and buckets errors
//! into network/script/resource/cors/other categories for summary
//! reporting.

use crate::types::{ConsoleLevel, ConsoleLogEntry};
use regex::Regex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchType {
    Exact,
    Contains,
    Regex,
}

#[derive(Debug, Clone)]
pub enum Pattern {
    Exact(String),
    Contains(String),
    Regex(Regex),
}

impl Pattern {
    /// A pattern wrapped in slashes, `/foo/i`, is treated as regex
    /// (case-insensitive with the trailing `i`); anything else is a
    /// plain case-insensitive substring match. Used wherever the
    /// engine accepts author-facing pattern strings (assertions.rs).
    pub fn parse(raw: &str) -> Pattern {
        if let Some(rest) = raw.strip_prefix('/') {
            if let Some(body) = rest.strip_suffix("/i") {
                if let Ok(re) = Regex::new(&format!("(?i){body}")) {
                    return Pattern::Regex(re);
                }
            } else if let Some(body) = rest.strip_suffix('/') {
                if let Ok(re) = Regex::new(body) {
                    return Pattern::Regex(re);
                }
            }
        }
        Pattern::Contains(raw.to_lowercase())
    }

    /// Builds a pattern with an explicit match type, as opposed to
    /// `parse`'s implicit `/.../ ` regex sniffing.
    pub fn with_match_type(raw: &str, match_type: MatchType) -> Pattern {
        match match_type {
            MatchType::Exact => Pattern::Exact(raw.to_string()),
            MatchType::Contains => Pattern::Contains(raw.to_lowercase()),
            MatchType::Regex => match Regex::new(raw) {
                Ok(re) => Pattern::Regex(re),
                Err(_) => Pattern::Contains(raw.to_lowercase()),
            },
        }
    }

    pub fn matches(&self, text: &str) -> bool {
        match self {
            Pattern::Exact(needle) => text == needle,
            Pattern::Contains(needle) => text.to_lowercase().contains(needle),
            Pattern::Regex(re) => re.is_match(text),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Network,
    Script,
    Resource,
    Cors,
    Other,
}

/// CORS is matched first (most specific), then network, script,
/// resource, and finally other.
pub fn categorize(message: &str) -> ErrorCategory {
    let lower = message.to_lowercase();
    if lower.contains("cors") || lower.contains("cross-origin") {
        ErrorCategory::Cors
    } else if lower.contains("network")
        || lower.contains("fetch failed")
        || lower.contains("net::err")
        || lower.contains("connection refused")
    {
        ErrorCategory::Network
    } else if lower.contains("uncaught")
        || lower.contains("referenceerror")
        || lower.contains("typeerror")
        || lower.contains("syntaxerror")
    {
        ErrorCategory::Script
    } else if lower.contains("failed to load resource") || lower.contains("404") {
        ErrorCategory::Resource
    } else {
        ErrorCategory::Other
    }
}

pub fn filter_by_level(entries: &[ConsoleLogEntry], level: ConsoleLevel) -> Vec<ConsoleLogEntry> {
    entries.iter().filter(|e| e.level == level).cloned().collect()
}

pub fn get_errors(entries: &[ConsoleLogEntry]) -> Vec<ConsoleLogEntry> {
    filter_by_level(entries, ConsoleLevel::Error)
}

pub fn get_warnings(entries: &[ConsoleLogEntry]) -> Vec<ConsoleLogEntry> {
    filter_by_level(entries, ConsoleLevel::Warn)
}

pub fn filter_by_pattern(entries: &[ConsoleLogEntry], pattern: &Pattern) -> Vec<ConsoleLogEntry> {
    entries
        .iter()
        .filter(|e| pattern.matches(&e.message))
        .cloned()
        .collect()
}

pub fn filter_by_patterns(entries: &[ConsoleLogEntry], patterns: &[Pattern]) -> Vec<ConsoleLogEntry> {
    entries
        .iter()
        .filter(|e| patterns.iter().any(|p| p.matches(&e.message)))
        .cloned()
        .collect()
}

/// Entries that do NOT match any allowed pattern.
pub fn filter_allowed_patterns(
    entries: &[ConsoleLogEntry],
    allowed: &[Pattern],
) -> Vec<ConsoleLogEntry> {
    entries
        .iter()
        .filter(|e| !allowed.iter().any(|p| p.matches(&e.message)))
        .cloned()
        .collect()
}

/// Entries that DO match a forbidden pattern.
pub fn filter_forbidden_patterns(
    entries: &[ConsoleLogEntry],
    forbidden: &[Pattern],
) -> Vec<ConsoleLogEntry> {
    filter_by_patterns(entries, forbidden)
}

#[derive(Debug, Clone, Default)]
pub struct ErrorSummary {
    pub total: usize,
    pub network: usize,
    pub script: usize,
    pub resource: usize,
    pub cors: usize,
    pub other: usize,
}

pub fn generate_summary(entries: &[ConsoleLogEntry]) -> ErrorSummary {
    let errors = get_errors(entries);
    let mut summary = ErrorSummary {
        total: errors.len(),
        ..Default::default()
    };
    for entry in &errors {
        match categorize(&entry.message) {
            ErrorCategory::Network => summary.network += 1,
            ErrorCategory::Script => summary.script += 1,
            ErrorCategory::Resource => summary.resource += 1,
            ErrorCategory::Cors => summary.cors += 1,
            ErrorCategory::Other => summary.other += 1,
        }
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn error(message: &str) -> ConsoleLogEntry {
        ConsoleLogEntry {
            timestamp: Utc::now(),
            level: ConsoleLevel::Error,
            message: message.to_string(),
            args: vec![],
            stack: None,
            source: None,
        }
    }

    #[test]
    fn categorizes_cors_before_network() {
        assert_eq!(
            categorize("Access blocked by CORS policy: network request failed"),
            ErrorCategory::Cors
        );
    }

    #[test]
    fn categorizes_script_errors() {
        assert_eq!(
            categorize("Uncaught TypeError: x is not a function"),
            ErrorCategory::Script
        );
    }

    #[test]
    fn allowed_pattern_removes_matching_entries() {
        let entries = vec![error("deprecated warning here"), error("payment failed")];
        let allowed = vec![Pattern::parse("/deprecated/i")];
        let filtered = filter_allowed_patterns(&entries, &allowed);
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].message, "payment failed");
    }

    #[test]
    fn summary_counts_by_category() {
        let entries = vec![
            error("net::ERR_CONNECTION_REFUSED"),
            error("CORS request did not succeed"),
        ];
        let summary = generate_summary(&entries);
        assert_eq!(summary.total, 2);
        assert_eq!(summary.network, 1);
        assert_eq!(summary.cors, 1);
    }
}
