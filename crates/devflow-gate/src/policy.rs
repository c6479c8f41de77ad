use serde::{Deserialize, Serialize};

use devflow_config::Config;

/// Markers recognized as test cases in any supported language.
pub const DEFAULT_TEST_MARKERS: &[&str] = &[
    "#[test]",
    "#[tokio::test]",
    "def test_",
    "it(",
    "test(",
    "@Test",
    "func Test",
];

/// Markers of unfinished code.
pub const PLACEHOLDER_MARKERS: &[&str] = &[
    "TODO",
    "FIXME",
    "unimplemented!",
    "todo!(",
    "NotImplementedError",
];

/// Thresholds the gate evaluates against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatePolicy {
    /// Minimum score to pass, in (0, 1].
    pub threshold: f64,
    /// Estimated coverage below this raises an advisory issue.
    pub min_coverage: f64,
    /// Extra test markers on top of [`DEFAULT_TEST_MARKERS`].
    #[serde(default)]
    pub extra_test_markers: Vec<String>,
}

impl Default for GatePolicy {
    fn default() -> Self {
        Self {
            threshold: devflow_config::DEFAULT_QUALITY_THRESHOLD,
            min_coverage: devflow_config::DEFAULT_MIN_COVERAGE,
            extra_test_markers: Vec::new(),
        }
    }
}

impl GatePolicy {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            threshold: config.quality_threshold(),
            min_coverage: config.min_coverage(),
            extra_test_markers: config.quality_gate.test_markers.clone(),
        }
    }

    pub(crate) fn test_markers(&self) -> impl Iterator<Item = &str> {
        DEFAULT_TEST_MARKERS
            .iter()
            .copied()
            .chain(self.extra_test_markers.iter().map(String::as_str))
    }
}
