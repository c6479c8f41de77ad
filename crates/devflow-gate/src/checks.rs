//! Individual gate checks. Each returns a score in [0, 1] and its issues.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;

use devflow_utils::types::QualityIssue;

use crate::policy::{GatePolicy, PLACEHOLDER_MARKERS};

pub(crate) const TESTS_PRESENT: &str = "tests_present";
pub(crate) const ESTIMATED_COVERAGE: &str = "estimated_coverage";
pub(crate) const STRUCTURAL_VALIDITY: &str = "structural_validity";
pub(crate) const PLACEHOLDERS: &str = "placeholders";
pub(crate) const SECURITY_CONTROLS: &str = "security_controls";

pub(crate) const WEIGHTS: [(&str, f64); 4] = [
    (TESTS_PRESENT, 0.30),
    (ESTIMATED_COVERAGE, 0.30),
    (STRUCTURAL_VALIDITY, 0.25),
    (PLACEHOLDERS, 0.15),
];

static FUNCTION_DEF: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?:fn|def|function|func)\s+([A-Za-z_][A-Za-z0-9_]*)").expect("static regex")
});

pub(crate) struct Outcome {
    pub score: f64,
    pub detail: String,
    pub issues: Vec<QualityIssue>,
}

pub(crate) fn tests_present(tests: &str, policy: &GatePolicy) -> Outcome {
    let count: usize = policy
        .test_markers()
        .map(|marker| tests.matches(marker).count())
        .sum();
    if count == 0 {
        return Outcome {
            score: 0.0,
            detail: "0 test markers".to_string(),
            issues: vec![QualityIssue::blocking(
                TESTS_PRESENT,
                "missing tests: no recognizable test cases",
            )],
        };
    }
    Outcome {
        score: 1.0,
        detail: format!("{count} test marker(s)"),
        issues: Vec::new(),
    }
}

/// Names of functions defined in `source`, in sorted order.
pub(crate) fn defined_functions(source: &str) -> BTreeSet<String> {
    FUNCTION_DEF
        .captures_iter(source)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .collect()
}

fn mentions_word(haystack: &str, word: &str) -> bool {
    haystack.match_indices(word).any(|(start, _)| {
        let before = haystack[..start].chars().next_back();
        let after = haystack[start + word.len()..].chars().next();
        let is_ident = |c: char| c.is_alphanumeric() || c == '_';
        !before.is_some_and(is_ident) && !after.is_some_and(is_ident)
    })
}

/// Fraction of implementation functions referenced from the tests.
pub(crate) fn estimated_coverage(
    implementation: &str,
    tests: &str,
    tests_found: bool,
    policy: &GatePolicy,
) -> Outcome {
    let functions = defined_functions(implementation);
    let coverage = if functions.is_empty() {
        if tests_found { 1.0 } else { 0.0 }
    } else {
        let covered = functions.iter().filter(|f| mentions_word(tests, f)).count();
        #[allow(clippy::cast_precision_loss)]
        let ratio = covered as f64 / functions.len() as f64;
        ratio
    };

    let mut issues = Vec::new();
    if tests_found && coverage < policy.min_coverage {
        issues.push(QualityIssue::advisory(
            ESTIMATED_COVERAGE,
            format!(
                "estimated coverage {:.0}% is below {:.0}%",
                coverage * 100.0,
                policy.min_coverage * 100.0
            ),
        ));
    }
    Outcome {
        score: coverage,
        detail: format!("{:.0}% of {} function(s)", coverage * 100.0, functions.len()),
        issues,
    }
}

/// Whether `()`, `[]`, and `{}` balance, ignoring double-quoted strings and
/// `//` line comments.
pub(crate) fn delimiters_balanced(source: &str) -> bool {
    let mut stack = Vec::new();
    let mut chars = source.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '"' => {
                while let Some(inner) = chars.next() {
                    match inner {
                        '\\' => {
                            chars.next();
                        }
                        '"' => break,
                        _ => {}
                    }
                }
            }
            '/' if chars.peek() == Some(&'/') => {
                for inner in chars.by_ref() {
                    if inner == '\n' {
                        break;
                    }
                }
            }
            '(' | '[' | '{' => stack.push(c),
            ')' | ']' | '}' => {
                let expected = match c {
                    ')' => '(',
                    ']' => '[',
                    _ => '{',
                };
                if stack.pop() != Some(expected) {
                    return false;
                }
            }
            _ => {}
        }
    }
    stack.is_empty()
}

pub(crate) fn structural_validity(implementation: &str, tests: &str) -> Outcome {
    let mut issues = Vec::new();
    if implementation.trim().is_empty() {
        issues.push(QualityIssue::blocking(
            STRUCTURAL_VALIDITY,
            "implementation is empty",
        ));
    } else if !delimiters_balanced(implementation) {
        issues.push(QualityIssue::blocking(
            STRUCTURAL_VALIDITY,
            "implementation has unbalanced delimiters",
        ));
    }
    if !tests.trim().is_empty() && !delimiters_balanced(tests) {
        issues.push(QualityIssue::blocking(
            STRUCTURAL_VALIDITY,
            "tests have unbalanced delimiters",
        ));
    }
    Outcome {
        score: if issues.is_empty() { 1.0 } else { 0.0 },
        detail: if issues.is_empty() { "valid" } else { "invalid" }.to_string(),
        issues,
    }
}

pub(crate) fn placeholders(implementation: &str) -> Outcome {
    let found: Vec<&str> = PLACEHOLDER_MARKERS
        .iter()
        .copied()
        .filter(|marker| implementation.contains(marker))
        .collect();
    if found.is_empty() {
        return Outcome {
            score: 1.0,
            detail: "none".to_string(),
            issues: Vec::new(),
        };
    }
    Outcome {
        score: 0.0,
        detail: found.join(", "),
        issues: vec![QualityIssue::advisory(
            PLACEHOLDERS,
            format!("implementation contains placeholders: {}", found.join(", ")),
        )],
    }
}

/// Controls count as addressed when named in the implementation, with
/// spaces or underscores between words, case-insensitively.
pub(crate) fn security_controls(implementation: &str, controls: &[String]) -> Vec<QualityIssue> {
    let haystack = implementation.to_lowercase();
    controls
        .iter()
        .filter(|control| !control.trim().is_empty())
        .filter(|control| {
            let spaced = control.trim().to_lowercase();
            let snake = spaced.split_whitespace().collect::<Vec<_>>().join("_");
            !haystack.contains(&spaced) && !haystack.contains(&snake)
        })
        .map(|control| {
            QualityIssue::blocking(
                SECURITY_CONTROLS,
                format!("security control '{}' is not addressed", control.trim()),
            )
        })
        .collect()
}
