use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use strum::{EnumIter, IntoEnumIterator};

use crate::error::ValidationError;

/// Maximum accepted length (in characters) of a task title.
pub const MAX_TITLE_CHARS: usize = 200;

/// Percentage reported once a task has completed.
pub const COMPLETE_PERCENT: u8 = 100;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_id!(
    /// Identifier of a task, unique per orchestrator and store.
    TaskId
);
string_id!(
    /// Identifier of the tenant that owns a task; quota is accounted per tenant.
    TenantId
);
string_id!(ProjectId);

impl TaskId {
    /// Allocate a fresh random task identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

/// Phases of the development pipeline.
///
/// Every task runs the phases in this fixed order:
///
/// ```text
/// Analysis → Architecture → Implementation → TestGeneration → Validation → Documentation
/// ```
///
/// Each phase maps to a progress checkpoint reported once it succeeds
/// (see [`PhaseId::checkpoint`]).
///
/// # Example
///
/// ```rust
/// use devflow_utils::types::{PhaseId, PhasePass};
///
/// assert_eq!(PhaseId::TestGeneration.as_str(), "test_generation");
/// assert_eq!(PhaseId::Implementation.checkpoint(PhasePass::Initial), 50);
/// assert_eq!(PhaseId::SEQUENCE.len(), 6);
/// ```
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, EnumIter,
)]
#[serde(rename_all = "snake_case")]
pub enum PhaseId {
    /// Requirement analysis and scoping.
    Analysis,
    /// Component and interface design.
    Architecture,
    /// Code generation.
    Implementation,
    /// Test generation for the implementation.
    TestGeneration,
    /// Review of implementation and tests; feeds the quality gate.
    Validation,
    /// User and API documentation.
    Documentation,
}

impl PhaseId {
    /// Execution order of the pipeline.
    pub const SEQUENCE: [PhaseId; 6] = [
        PhaseId::Analysis,
        PhaseId::Architecture,
        PhaseId::Implementation,
        PhaseId::TestGeneration,
        PhaseId::Validation,
        PhaseId::Documentation,
    ];

    /// Phases re-run by self-correction, in order.
    pub const CORRECTION_SEQUENCE: [PhaseId; 4] = [
        PhaseId::Implementation,
        PhaseId::TestGeneration,
        PhaseId::Validation,
        PhaseId::Documentation,
    ];

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Analysis => "analysis",
            Self::Architecture => "architecture",
            Self::Implementation => "implementation",
            Self::TestGeneration => "test_generation",
            Self::Validation => "validation",
            Self::Documentation => "documentation",
        }
    }

    /// Human-readable label used in progress steps.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Analysis => "Analysis",
            Self::Architecture => "Architecture",
            Self::Implementation => "Implementation",
            Self::TestGeneration => "Test generation",
            Self::Validation => "Validation",
            Self::Documentation => "Documentation",
        }
    }

    /// Zero-based position within [`PhaseId::SEQUENCE`].
    #[must_use]
    pub const fn index(&self) -> usize {
        match self {
            Self::Analysis => 0,
            Self::Architecture => 1,
            Self::Implementation => 2,
            Self::TestGeneration => 3,
            Self::Validation => 4,
            Self::Documentation => 5,
        }
    }

    #[must_use]
    pub const fn next(&self) -> Option<PhaseId> {
        match self {
            Self::Analysis => Some(Self::Architecture),
            Self::Architecture => Some(Self::Implementation),
            Self::Implementation => Some(Self::TestGeneration),
            Self::TestGeneration => Some(Self::Validation),
            Self::Validation => Some(Self::Documentation),
            Self::Documentation => None,
        }
    }

    /// Progress percentage reported when this phase succeeds in the given pass.
    ///
    /// Initial pass checkpoints are 15/25/50/65/80/90. The self-correction
    /// pass only re-runs the last four phases and reports 92/94/96/98 so that
    /// progress keeps strictly increasing; 100 is reserved for completion.
    #[must_use]
    pub const fn checkpoint(&self, pass: PhasePass) -> u8 {
        match pass {
            PhasePass::Initial => match self {
                Self::Analysis => 15,
                Self::Architecture => 25,
                Self::Implementation => 50,
                Self::TestGeneration => 65,
                Self::Validation => 80,
                Self::Documentation => 90,
            },
            PhasePass::SelfCorrection => match self {
                Self::Analysis | Self::Architecture => 90,
                Self::Implementation => 92,
                Self::TestGeneration => 94,
                Self::Validation => 96,
                Self::Documentation => 98,
            },
        }
    }

    /// Whether the phase produces source code (fenced blocks are accepted as output).
    #[must_use]
    pub const fn produces_code(&self) -> bool {
        matches!(self, Self::Implementation | Self::TestGeneration)
    }

    pub fn all() -> impl Iterator<Item = PhaseId> {
        Self::iter()
    }
}

impl fmt::Display for PhaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PhaseId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        Self::iter()
            .find(|phase| phase.as_str() == normalized)
            .ok_or_else(|| format!("unknown phase '{s}'"))
    }
}

/// Which pass through the pipeline a phase execution belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhasePass {
    Initial,
    SelfCorrection,
}

impl PhasePass {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Initial => "initial",
            Self::SelfCorrection => "self_correction",
        }
    }
}

impl fmt::Display for PhasePass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

impl Priority {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Urgent => "urgent",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a task.
///
/// ```text
/// Queued ──► Running ──► Completed
///   │           │  ╲
///   │           │   ► SelfCorrecting ──► Completed | Failed | Cancelled
///   │           ├──► Failed
///   └──► Cancelled ◄──┘
/// ```
///
/// `SelfCorrecting` is a sub-state of running: the task still holds its
/// agent slot and counts against the tenant's running cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    Running,
    SelfCorrecting,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::SelfCorrecting => "self_correcting",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Running or self-correcting: the task occupies an agent slot.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        matches!(self, Self::Running | Self::SelfCorrecting)
    }

    #[must_use]
    pub const fn can_transition_to(&self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (Self::Queued, Self::Running)
                | (Self::Queued, Self::Cancelled)
                | (Self::Running, Self::SelfCorrecting)
                | (Self::Running, Self::Completed)
                | (Self::Running, Self::Failed)
                | (Self::Running, Self::Cancelled)
                | (Self::SelfCorrecting, Self::Completed)
                | (Self::SelfCorrecting, Self::Failed)
                | (Self::SelfCorrecting, Self::Cancelled)
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Requirement category whose lines are security controls the implementation
/// must address.
pub const SECURITY_CATEGORY: &str = "security";

/// Requirements attached to a task: named categories of requirement lines,
/// or an explicit statement that there are none.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Requirements {
    None,
    Categories(BTreeMap<String, Vec<String>>),
}

impl Default for Requirements {
    fn default() -> Self {
        Self::Categories(BTreeMap::new())
    }
}

impl Requirements {
    /// Requirement lines of a category; empty when the category is absent.
    #[must_use]
    pub fn category(&self, name: &str) -> &[String] {
        match self {
            Self::None => &[],
            Self::Categories(map) => map.get(name).map(Vec::as_slice).unwrap_or(&[]),
        }
    }

    #[must_use]
    pub fn is_explicit_none(&self) -> bool {
        matches!(self, Self::None)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<String>)> {
        let map = match self {
            Self::None => None,
            Self::Categories(map) => Some(map),
        };
        map.into_iter().flat_map(|m| m.iter())
    }

    fn validate(&self) -> Result<(), ValidationError> {
        match self {
            Self::None => Ok(()),
            Self::Categories(map) if map.is_empty() => Err(ValidationError::MissingRequirements),
            Self::Categories(map) => {
                if map.keys().any(|key| key.trim().is_empty()) {
                    return Err(ValidationError::EmptyRequirementCategory);
                }
                Ok(())
            }
        }
    }
}

/// Submission payload for a new task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub tenant_id: TenantId,
    pub project_id: ProjectId,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub requirements: Requirements,
}

impl TaskSpec {
    pub fn new(
        tenant_id: impl Into<TenantId>,
        project_id: impl Into<ProjectId>,
        title: impl Into<String>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            project_id: project_id.into(),
            title: title.into(),
            description: String::new(),
            priority: Priority::default(),
            requirements: Requirements::default(),
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    #[must_use]
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Add (or extend) a requirement category.
    #[must_use]
    pub fn with_requirement<I, S>(mut self, category: impl Into<String>, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut map = match self.requirements {
            Requirements::Categories(map) => map,
            Requirements::None => BTreeMap::new(),
        };
        map.entry(category.into())
            .or_default()
            .extend(lines.into_iter().map(Into::into));
        self.requirements = Requirements::Categories(map);
        self
    }

    #[must_use]
    pub fn with_no_requirements(mut self) -> Self {
        self.requirements = Requirements::None;
        self
    }

    /// Check the submission before admission is requested.
    ///
    /// # Errors
    ///
    /// Returns the first [`ValidationError`] found: blank tenant or project,
    /// blank or oversized title, or missing requirement categories.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.tenant_id.as_str().trim().is_empty() {
            return Err(ValidationError::EmptyTenant);
        }
        if self.project_id.as_str().trim().is_empty() {
            return Err(ValidationError::EmptyProject);
        }
        let title = self.title.trim();
        if title.is_empty() {
            return Err(ValidationError::EmptyTitle);
        }
        let chars = title.chars().count();
        if chars > MAX_TITLE_CHARS {
            return Err(ValidationError::TitleTooLong {
                max: MAX_TITLE_CHARS,
                actual: chars,
            });
        }
        self.requirements.validate()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueSeverity {
    /// Fails the gate regardless of score.
    Blocking,
    /// Lowers the score only.
    Advisory,
}

/// A single finding reported by the quality gate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QualityIssue {
    /// Name of the check that produced the issue.
    pub check: String,
    pub message: String,
    pub severity: IssueSeverity,
}

impl QualityIssue {
    pub fn blocking(check: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            check: check.into(),
            message: message.into(),
            severity: IssueSeverity::Blocking,
        }
    }

    pub fn advisory(check: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            check: check.into(),
            message: message.into(),
            severity: IssueSeverity::Advisory,
        }
    }

    #[must_use]
    pub fn is_blocking(&self) -> bool {
        self.severity == IssueSeverity::Blocking
    }
}

impl fmt::Display for QualityIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            IssueSeverity::Blocking => "blocking",
            IssueSeverity::Advisory => "advisory",
        };
        write!(f, "[{tag}] {}: {}", self.check, self.message)
    }
}

/// Findings reported by the validation phase itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    #[serde(default)]
    pub blocking: Vec<String>,
    #[serde(default)]
    pub advisory: Vec<String>,
}

impl ValidationReport {
    pub const CHECK_NAME: &'static str = "validation_report";

    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.blocking.is_empty() && self.advisory.is_empty()
    }

    #[must_use]
    pub fn issues(&self) -> Vec<QualityIssue> {
        self.blocking
            .iter()
            .map(|msg| QualityIssue::blocking(Self::CHECK_NAME, msg.clone()))
            .chain(
                self.advisory
                    .iter()
                    .map(|msg| QualityIssue::advisory(Self::CHECK_NAME, msg.clone())),
            )
            .collect()
    }
}

/// Where a configuration value came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigSource {
    Defaults,
    ConfigFile(String),
    Environment,
    Programmatic,
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Defaults => write!(f, "defaults"),
            Self::ConfigFile(path) => write!(f, "config file ({path})"),
            Self::Environment => write!(f, "environment"),
            Self::Programmatic => write!(f, "programmatic"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_matches_index_and_next() {
        for (i, phase) in PhaseId::SEQUENCE.iter().enumerate() {
            assert_eq!(phase.index(), i);
            assert_eq!(phase.next(), PhaseId::SEQUENCE.get(i + 1).copied());
        }
        assert_eq!(PhaseId::all().count(), PhaseId::SEQUENCE.len());
    }

    #[test]
    fn checkpoints_strictly_increase_across_both_passes() {
        let mut last = 0u8;
        for phase in PhaseId::SEQUENCE {
            let pct = phase.checkpoint(PhasePass::Initial);
            assert!(pct > last, "{phase} checkpoint {pct} <= {last}");
            last = pct;
        }
        assert_eq!(last, 90);
        for phase in PhaseId::CORRECTION_SEQUENCE {
            let pct = phase.checkpoint(PhasePass::SelfCorrection);
            assert!(pct > last);
            last = pct;
        }
        assert!(last < COMPLETE_PERCENT);
    }

    #[test]
    fn phase_id_parses_loosely() {
        assert_eq!("Test-Generation".parse::<PhaseId>(), Ok(PhaseId::TestGeneration));
        assert_eq!(" analysis ".parse::<PhaseId>(), Ok(PhaseId::Analysis));
        assert!("deploy".parse::<PhaseId>().is_err());
    }

    #[test]
    fn phase_id_serializes_snake_case() {
        let json = serde_json::to_string(&PhaseId::TestGeneration).unwrap();
        assert_eq!(json, "\"test_generation\"");
    }

    #[test]
    fn status_transitions() {
        use TaskStatus::*;
        assert!(Queued.can_transition_to(Running));
        assert!(Queued.can_transition_to(Cancelled));
        assert!(!Queued.can_transition_to(Completed));
        assert!(Running.can_transition_to(SelfCorrecting));
        assert!(!SelfCorrecting.can_transition_to(Running));
        assert!(!SelfCorrecting.can_transition_to(SelfCorrecting));
        for terminal in [Completed, Failed, Cancelled] {
            assert!(terminal.is_terminal());
            for next in [Queued, Running, SelfCorrecting, Completed, Failed, Cancelled] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn empty_title_is_rejected() {
        let spec = TaskSpec::new("acme", "web", "   ").with_no_requirements();
        assert_eq!(spec.validate(), Err(ValidationError::EmptyTitle));
    }

    #[test]
    fn overlong_title_is_rejected() {
        let spec = TaskSpec::new("acme", "web", "x".repeat(MAX_TITLE_CHARS + 1))
            .with_no_requirements();
        assert!(matches!(
            spec.validate(),
            Err(ValidationError::TitleTooLong { .. })
        ));
    }

    #[test]
    fn requirements_must_be_present_or_explicitly_none() {
        let spec = TaskSpec::new("acme", "web", "Add login");
        assert_eq!(spec.validate(), Err(ValidationError::MissingRequirements));

        let spec = spec.with_no_requirements();
        assert_eq!(spec.validate(), Ok(()));

        let spec = TaskSpec::new("acme", "web", "Add login").with_requirement("", ["x"]);
        assert_eq!(spec.validate(), Err(ValidationError::EmptyRequirementCategory));

        let spec = TaskSpec::new("acme", "web", "Add login")
            .with_requirement("functional", ["users can log in"]);
        assert_eq!(spec.validate(), Ok(()));
        assert_eq!(spec.requirements.category("functional").len(), 1);
        assert!(spec.requirements.category("security").is_empty());
    }

    #[test]
    fn validation_report_maps_severity() {
        let report = ValidationReport {
            blocking: vec!["missing tests".into()],
            advisory: vec!["long function".into()],
        };
        let issues = report.issues();
        assert_eq!(issues.len(), 2);
        assert!(issues[0].is_blocking());
        assert!(!issues[1].is_blocking());
        assert_eq!(
            issues[0].to_string(),
            "[blocking] validation_report: missing tests"
        );
    }
}
