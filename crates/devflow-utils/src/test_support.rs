//! Shared fixtures for unit and integration tests.

use crate::types::{Priority, TaskSpec};

/// Implementation artifact that passes every quality check.
pub const CLEAN_IMPLEMENTATION: &str = r#"pub fn add(a: i32, b: i32) -> i32 {
    a + b
}

pub fn is_even(n: i32) -> bool {
    n % 2 == 0
}
"#;

/// Tests exercising every function of [`CLEAN_IMPLEMENTATION`].
pub const CLEAN_TESTS: &str = r#"#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adds() {
        assert_eq!(add(2, 3), 5);
    }

    #[test]
    fn detects_even() {
        assert!(is_even(4));
    }
}
"#;

/// Test artifact with no recognizable test cases.
pub const MISSING_TESTS: &str = "// tests will be added later\n";

/// Implementation whose delimiters do not balance.
pub const BROKEN_IMPLEMENTATION: &str = "pub fn add(a: i32, b: i32) -> i32 {\n    a + b\n";

/// A valid submission with one functional requirement.
#[must_use]
pub fn sample_spec(tenant: &str) -> TaskSpec {
    TaskSpec::new(tenant, "web", "Add arithmetic helpers")
        .with_description("Provide add and is_even helpers")
        .with_priority(Priority::High)
        .with_requirement("functional", ["add two integers", "detect even numbers"])
}

/// Wrap content in the structured response envelope phases expect.
#[must_use]
pub fn envelope(content: &str, confidence: f64) -> String {
    serde_json::json!({ "content": content, "confidence": confidence }).to_string()
}

/// Number of proptest cases, overridable with `PROPTEST_CASES`.
#[must_use]
pub fn proptest_cases(default: u32) -> u32 {
    std::env::var("PROPTEST_CASES")
        .ok()
        .and_then(|s| s.parse::<u32>().ok())
        .unwrap_or(default)
}
