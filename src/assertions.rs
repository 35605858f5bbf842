//! Evaluates the two assertion families a checkpoint can declare: DOM
//! assertions against a captured HTML string, and console assertions
//! against a captured log-entry slice.

use crate::error::EngineError;
use crate::error_filter::{
    filter_allowed_patterns, filter_by_patterns, get_errors, get_warnings, Pattern,
};
use crate::storage::dom_store::query_html_by_selector;
use crate::types::{ConsoleAssertions, ConsoleLogEntry, DomAssertion, ValidationResult};

fn passed(assertion: impl Into<String>, message: impl Into<String>) -> ValidationResult {
    ValidationResult {
        assertion: assertion.into(),
        passed: true,
        expected: None,
        actual: None,
        message: message.into(),
    }
}

fn failed(
    assertion: impl Into<String>,
    expected: Option<String>,
    actual: Option<String>,
    message: impl Into<String>,
) -> ValidationResult {
    ValidationResult {
        assertion: assertion.into(),
        passed: false,
        expected,
        actual,
        message: message.into(),
    }
}

fn count_matches(count: usize, op: &str, n: usize) -> Option<bool> {
    match op {
        "eq" => Some(count == n),
        "gt" => Some(count > n),
        "gte" => Some(count >= n),
        "lt" => Some(count < n),
        "lte" => Some(count <= n),
        _ => None,
    }
}

/// Evaluates a single DOM assertion against a captured HTML document.
/// Returns an `EngineError` only for an engine-internal fault (a
/// malformed CSS selector); an element that is simply missing is a
/// failed `ValidationResult`, not an error.
pub fn evaluate_dom(html: &str, assertion: &DomAssertion) -> Result<ValidationResult, EngineError> {
    match assertion {
        DomAssertion::Exists { selector } => {
            let elements = query_html_by_selector(html, selector)?;
            let name = format!("dom.exists({selector})");
            if elements.is_empty() {
                Ok(failed(name, None, Some("0 matches".into()), format!("no element matched '{selector}'")))
            } else {
                Ok(passed(name, format!("{} element(s) matched '{selector}'", elements.len())))
            }
        }
        DomAssertion::NotExists { selector } => {
            let elements = query_html_by_selector(html, selector)?;
            let name = format!("dom.notExists({selector})");
            if elements.is_empty() {
                Ok(passed(name, format!("no element matched '{selector}'")))
            } else {
                Ok(failed(
                    name,
                    Some("0 matches".into()),
                    Some(format!("{} matches", elements.len())),
                    format!("expected no element to match '{selector}'"),
                ))
            }
        }
        DomAssertion::TextEquals { selector, value } => {
            let elements = query_html_by_selector(html, selector)?;
            let name = format!("dom.textEquals({selector})");
            match elements.first() {
                None => Ok(failed(
                    name,
                    Some(value.clone()),
                    None,
                    format!("no element matched '{selector}'"),
                )),
                Some(el) => {
                    let actual = el.text.trim().to_string();
                    if actual == value.trim() {
                        Ok(passed(name, format!("text of '{selector}' equals '{value}'")))
                    } else {
                        Ok(failed(
                            name,
                            Some(value.clone()),
                            Some(actual.clone()),
                            format!("text of '{selector}' was '{actual}', expected '{value}'"),
                        ))
                    }
                }
            }
        }
        DomAssertion::TextContains { selector, value } => {
            let elements = query_html_by_selector(html, selector)?;
            let name = format!("dom.textContains({selector})");
            match elements.first() {
                None => Ok(failed(
                    name,
                    Some(value.clone()),
                    None,
                    format!("no element matched '{selector}'"),
                )),
                Some(el) => {
                    let actual = el.text.trim().to_string();
                    if actual.contains(value.as_str()) {
                        Ok(passed(name, format!("text of '{selector}' contains '{value}'")))
                    } else {
                        Ok(failed(
                            name,
                            Some(value.clone()),
                            Some(actual.clone()),
                            format!("text of '{selector}' did not contain '{value}'"),
                        ))
                    }
                }
            }
        }
        DomAssertion::AttributeEquals {
            selector,
            attribute,
            value,
        } => {
            let elements = query_html_by_selector(html, selector)?;
            let name = format!("dom.attributeEquals({selector}.{attribute})");
            match elements.first().and_then(|el| el.attributes.get(attribute)) {
                None => Ok(failed(
                    name,
                    Some(value.clone()),
                    None,
                    format!("'{selector}' has no attribute '{attribute}'"),
                )),
                Some(actual) if actual == value => {
                    Ok(passed(name, format!("attribute '{attribute}' of '{selector}' equals '{value}'")))
                }
                Some(actual) => Ok(failed(
                    name,
                    Some(value.clone()),
                    Some(actual.clone()),
                    format!("attribute '{attribute}' of '{selector}' was '{actual}', expected '{value}'"),
                )),
            }
        }
        DomAssertion::Count { selector, op, n } => {
            let elements = query_html_by_selector(html, selector)?;
            let name = format!("dom.count({selector} {op} {n})");
            match count_matches(elements.len(), op, *n) {
                None => Err(EngineError::ValidationEngineError(format!("unknown count operator '{op}'"))),
                Some(true) => Ok(passed(
                    name,
                    format!("{} element(s) matched '{selector}' ({op} {n})", elements.len()),
                )),
                Some(false) => Ok(failed(
                    name,
                    Some(format!("{op} {n}")),
                    Some(elements.len().to_string()),
                    format!("{} element(s) matched '{selector}', expected {op} {n}", elements.len()),
                )),
            }
        }
    }
}

/// Evaluates every declared console assertion. `allowed` patterns are
/// subtracted from the error set before `noErrors`/`maxErrors` count it;
/// `forbidden`/`required` match across the whole entry set regardless
/// of level.
pub fn evaluate_console(entries: &[ConsoleLogEntry], assertions: &ConsoleAssertions) -> Vec<ValidationResult> {
    let mut results = Vec::new();

    let allowed: Vec<Pattern> = assertions.allowed.iter().map(|p| Pattern::parse(p)).collect();
    let errors = get_errors(entries);
    let unfiltered_errors = filter_allowed_patterns(&errors, &allowed);

    if assertions.no_errors {
        let name = "console.noErrors";
        if unfiltered_errors.is_empty() {
            results.push(passed(name, "no unfiltered error-level entries"));
        } else {
            results.push(failed(
                name,
                Some("0".into()),
                Some(unfiltered_errors.len().to_string()),
                format!(
                    "{} unfiltered error(s), e.g. '{}'",
                    unfiltered_errors.len(),
                    unfiltered_errors[0].message
                ),
            ));
        }
    }

    if assertions.no_warnings {
        let warnings = get_warnings(entries);
        let name = "console.noWarnings";
        if warnings.is_empty() {
            results.push(passed(name, "no warning-level entries"));
        } else {
            results.push(failed(
                name,
                Some("0".into()),
                Some(warnings.len().to_string()),
                format!("{} warning(s), e.g. '{}'", warnings.len(), warnings[0].message),
            ));
        }
    }

    if let Some(max) = assertions.max_errors {
        let name = format!("console.maxErrors({max})");
        if unfiltered_errors.len() <= max {
            results.push(passed(name, format!("{} unfiltered error(s) <= {max}", unfiltered_errors.len())));
        } else {
            results.push(failed(
                name,
                Some(max.to_string()),
                Some(unfiltered_errors.len().to_string()),
                format!("{} unfiltered error(s) exceeds max {max}", unfiltered_errors.len()),
            ));
        }
    }

    if let Some(max) = assertions.max_warnings {
        let warnings = get_warnings(entries);
        let name = format!("console.maxWarnings({max})");
        if warnings.len() <= max {
            results.push(passed(name, format!("{} warning(s) <= {max}", warnings.len())));
        } else {
            results.push(failed(
                name,
                Some(max.to_string()),
                Some(warnings.len().to_string()),
                format!("{} warning(s) exceeds max {max}", warnings.len()),
            ));
        }
    }

    if !assertions.forbidden.is_empty() {
        let patterns: Vec<Pattern> = assertions.forbidden.iter().map(|p| Pattern::parse(p)).collect();
        let matches = filter_by_patterns(entries, &patterns);
        let name = "console.forbidden";
        if matches.is_empty() {
            results.push(passed(name, "no entry matched a forbidden pattern"));
        } else {
            results.push(failed(
                name,
                None,
                Some(matches[0].message.clone()),
                format!("entry '{}' matched a forbidden pattern", matches[0].message),
            ));
        }
    }

    for raw in &assertions.required {
        let pattern = Pattern::parse(raw);
        let name = format!("console.required({raw})");
        if entries.iter().any(|e| pattern.matches(&e.message)) {
            results.push(passed(name, format!("an entry matched required pattern '{raw}'")));
        } else {
            results.push(failed(
                name,
                Some(raw.clone()),
                None,
                format!("no entry matched required pattern '{raw}'"),
            ));
        }
    }

    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn entry(level: crate::types::ConsoleLevel, message: &str) -> ConsoleLogEntry {
        ConsoleLogEntry {
            timestamp: Utc::now(),
            level,
            message: message.to_string(),
            args: vec![],
            stack: None,
            source: None,
        }
    }

    #[test]
    fn exists_passes_when_element_present() {
        let html = "<html><body><h1>hi</h1></body></html>";
        let result = evaluate_dom(html, &DomAssertion::Exists { selector: "h1".into() }).unwrap();
        assert!(result.passed);
    }

    #[test]
    fn text_equals_fails_with_actual_value() {
        let html = "<html><head><title>Real Title</title></head></html>";
        let result = evaluate_dom(
            html,
            &DomAssertion::TextEquals {
                selector: "title".into(),
                value: "NotThisTitle".into(),
            },
        )
        .unwrap();
        assert!(!result.passed);
        assert_eq!(result.actual.as_deref(), Some("Real Title"));
    }

    #[test]
    fn count_uses_requested_operator() {
        let html = "<html><body><div class=\"card\"></div><div class=\"card\"></div></body></html>";
        let result = evaluate_dom(
            html,
            &DomAssertion::Count {
                selector: "div.card".into(),
                op: "eq".into(),
                n: 2,
            },
        )
        .unwrap();
        assert!(result.passed);
    }

    #[test]
    fn no_errors_ignores_allowed_pattern() {
        let entries = vec![
            entry(crate::types::ConsoleLevel::Warn, "deprecated warning here"),
            entry(crate::types::ConsoleLevel::Error, "payment failed"),
        ];
        let assertions = ConsoleAssertions {
            no_errors: true,
            allowed: vec!["/deprecated/i".into()],
            ..Default::default()
        };
        let results = evaluate_console(&entries, &assertions);
        assert_eq!(results.len(), 1);
        assert!(!results[0].passed);
    }

    #[test]
    fn required_pattern_must_be_present() {
        let entries = vec![entry(crate::types::ConsoleLevel::Log, "app ready")];
        let assertions = ConsoleAssertions {
            required: vec!["ready".into()],
            ..Default::default()
        };
        let results = evaluate_console(&entries, &assertions);
        assert!(results[0].passed);
    }
}
