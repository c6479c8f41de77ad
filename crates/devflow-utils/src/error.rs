use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::types::{PhaseId, QualityIssue, TaskStatus};

/// Library-level error type with rich context and user-friendly reporting.
///
/// `DevflowError` is returned by orchestrator operations. Each variant maps to
/// one class of failure:
///
/// | Variant | Raised by | Retried? |
/// |---------|-----------|----------|
/// | `Validation` | `submit` | never |
/// | `QuotaExceeded` | `submit`, `run` | never (caller decides) |
/// | `PhaseExecution` | phase executor, after its retry budget | never at task level |
/// | `SelfCorrection` | second quality-gate failure | terminal |
/// | `System` / `Io` | store or collaborator outage | left for operators |
///
/// A failed quality gate on its own is not an error: it routes the task into
/// self-correction.
///
/// Use [`display_for_user()`](Self::display_for_user) for a formatted message
/// with context and suggestions.
#[derive(Error, Debug)]
pub enum DevflowError {
    #[error("Invalid task submission: {0}")]
    Validation(#[from] ValidationError),

    #[error("Quota exceeded for tenant {tenant}")]
    QuotaExceeded { tenant: String },

    #[error("Phase execution error: {0}")]
    PhaseExecution(#[from] PhaseError),

    #[error(
        "Self-correction failed: {} original issue(s), {} issue(s) after correction",
        .original.len(),
        .corrective.len()
    )]
    SelfCorrection {
        original: Vec<QualityIssue>,
        corrective: Vec<QualityIssue>,
    },

    #[error("Task {task_id} cannot {action} while {from}")]
    InvalidTransition {
        task_id: String,
        from: TaskStatus,
        action: String,
    },

    #[error("Task {task_id} not found")]
    TaskNotFound { task_id: String },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Completion backend error: {0}")]
    Llm(#[from] LlmError),

    #[error("System error: {reason}")]
    System { reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DevflowError {
    pub fn system(reason: impl Into<String>) -> Self {
        Self::System {
            reason: reason.into(),
        }
    }

    /// Format the error with its context and suggestions for an operator.
    #[must_use]
    pub fn display_for_user(&self) -> String {
        let mut output = format!("Error: {}\n", self.user_message());

        if let Some(ctx) = self.context() {
            output.push_str(&format!("\nContext: {ctx}\n"));
        }

        let suggestions = self.suggestions();
        if !suggestions.is_empty() {
            output.push_str("\nSuggestions:\n");
            for suggestion in suggestions {
                output.push_str(&format!("  • {suggestion}\n"));
            }
        }

        output
    }
}

impl From<anyhow::Error> for DevflowError {
    fn from(err: anyhow::Error) -> Self {
        Self::System {
            reason: format!("{err:#}"),
        }
    }
}

/// Trait for providing user-friendly error reporting with context and suggestions
pub trait UserFriendlyError {
    /// Get a user-friendly error message
    fn user_message(&self) -> String;

    /// Get contextual information about the error
    fn context(&self) -> Option<String>;

    /// Get suggested actions to resolve the error
    fn suggestions(&self) -> Vec<String>;

    /// Get the error category for grouping similar errors
    fn category(&self) -> ErrorCategory;
}

/// Categories of errors for better organization and handling
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Validation,
    Quota,
    PhaseExecution,
    QualityGate,
    CompletionBackend,
    Persistence,
    Concurrency,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration => write!(f, "Configuration"),
            Self::Validation => write!(f, "Validation"),
            Self::Quota => write!(f, "Quota"),
            Self::PhaseExecution => write!(f, "Phase Execution"),
            Self::QualityGate => write!(f, "Quality Gate"),
            Self::CompletionBackend => write!(f, "Completion Backend"),
            Self::Persistence => write!(f, "Persistence"),
            Self::Concurrency => write!(f, "Concurrency"),
        }
    }
}

/// Rejections raised synchronously by `submit`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("task title must not be empty")]
    EmptyTitle,

    #[error("task title is {actual} characters, maximum is {max}")]
    TitleTooLong { max: usize, actual: usize },

    #[error("tenant id must not be empty")]
    EmptyTenant,

    #[error("project id must not be empty")]
    EmptyProject,

    #[error("at least one requirement category (or an explicit \"none\") is required")]
    MissingRequirements,

    #[error("requirement category names must not be empty")]
    EmptyRequirementCategory,
}

impl UserFriendlyError for ValidationError {
    fn user_message(&self) -> String {
        format!("Task submission rejected: {self}")
    }

    fn context(&self) -> Option<String> {
        Some("Submissions are validated before any quota is reserved.".to_string())
    }

    fn suggestions(&self) -> Vec<String> {
        match self {
            Self::EmptyTitle | Self::TitleTooLong { .. } => {
                vec!["Provide a short, non-blank title describing the task".to_string()]
            }
            Self::EmptyTenant | Self::EmptyProject => {
                vec!["Submit the task with the tenant and project it belongs to".to_string()]
            }
            Self::MissingRequirements | Self::EmptyRequirementCategory => vec![
                "Add at least one named requirement category, e.g. 'functional'".to_string(),
                "Or mark the task as having no requirements explicitly".to_string(),
            ],
        }
    }

    fn category(&self) -> ErrorCategory {
        ErrorCategory::Validation
    }
}

/// Phase execution failures surfaced once the retry budget is spent.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PhaseError {
    #[error("Phase {phase} failed after {attempts} attempt(s): {last_error}")]
    RetriesExhausted {
        phase: PhaseId,
        attempts: u32,
        last_error: String,
    },

    #[error("Phase {phase} failed with a non-retryable error: {reason}")]
    NonRetryable { phase: PhaseId, reason: String },

    #[error("Phase {phase} dependency not satisfied: missing {dependency}")]
    DependencyNotSatisfied { phase: PhaseId, dependency: PhaseId },

    #[error("Phase {phase} timed out after {timeout_seconds} seconds")]
    Timeout { phase: PhaseId, timeout_seconds: u64 },

    #[error("Phase {phase} produced malformed output: {reason}")]
    MalformedOutput { phase: PhaseId, reason: String },

    #[error("Phase {phase} stopped retrying after {attempts} attempt(s): task cancelled")]
    Cancelled { phase: PhaseId, attempts: u32 },
}

impl PhaseError {
    #[must_use]
    pub fn phase(&self) -> PhaseId {
        match self {
            Self::RetriesExhausted { phase, .. }
            | Self::NonRetryable { phase, .. }
            | Self::DependencyNotSatisfied { phase, .. }
            | Self::Timeout { phase, .. }
            | Self::MalformedOutput { phase, .. }
            | Self::Cancelled { phase, .. } => *phase,
        }
    }
}

impl UserFriendlyError for PhaseError {
    fn user_message(&self) -> String {
        match self {
            Self::RetriesExhausted {
                phase,
                attempts,
                last_error,
            } => format!("The {phase} phase failed {attempts} time(s); last error: {last_error}"),
            Self::NonRetryable { phase, reason } => {
                format!("The {phase} phase cannot succeed: {reason}")
            }
            Self::DependencyNotSatisfied { phase, dependency } => {
                format!("The {phase} phase needs the output of {dependency}, which is missing")
            }
            Self::Timeout {
                phase,
                timeout_seconds,
            } => format!("The {phase} phase did not finish within {timeout_seconds}s"),
            Self::MalformedOutput { phase, reason } => {
                format!("The {phase} phase returned output that could not be parsed: {reason}")
            }
            Self::Cancelled { phase, .. } => {
                format!("The {phase} phase was abandoned because the task was cancelled")
            }
        }
    }

    fn context(&self) -> Option<String> {
        match self {
            Self::RetriesExhausted { .. } => Some(
                "Transient completion failures are retried with exponential backoff before the task fails."
                    .to_string(),
            ),
            Self::NonRetryable { .. } => Some(
                "Authentication, configuration, and budget errors are not retried.".to_string(),
            ),
            Self::DependencyNotSatisfied { .. } => {
                Some("Phases consume the outputs of earlier phases.".to_string())
            }
            Self::Timeout { .. } | Self::MalformedOutput { .. } | Self::Cancelled { .. } => None,
        }
    }

    fn suggestions(&self) -> Vec<String> {
        match self {
            Self::RetriesExhausted { .. } | Self::Timeout { .. } => vec![
                "Check the completion provider's availability".to_string(),
                "Increase 'phase_timeout' for slow phases".to_string(),
                "Resubmit the task once the provider is healthy".to_string(),
            ],
            Self::NonRetryable { .. } => vec![
                "Verify the provider credentials and model configuration".to_string(),
                "Check the configured call budget".to_string(),
            ],
            Self::DependencyNotSatisfied { .. } => {
                vec!["Run phases in pipeline order".to_string()]
            }
            Self::MalformedOutput { .. } => vec![
                "Confirm the model follows the structured response format".to_string(),
            ],
            Self::Cancelled { .. } => Vec::new(),
        }
    }

    fn category(&self) -> ErrorCategory {
        ErrorCategory::PhaseExecution
    }
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid configuration file: {0}")]
    InvalidFile(String),

    #[error("Missing required configuration: {0}")]
    MissingRequired(String),

    #[error("Invalid configuration value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("Configuration file not found at {path}")]
    NotFound { path: String },

    #[error("Configuration discovery failed: {reason}")]
    DiscoveryFailed { reason: String },
}

impl UserFriendlyError for ConfigError {
    fn user_message(&self) -> String {
        match self {
            Self::InvalidFile(msg) => format!("Configuration file is invalid: {msg}"),
            Self::MissingRequired(key) => format!("Required configuration '{key}' is missing"),
            Self::InvalidValue { key, value } => {
                format!("Configuration value '{value}' is not valid for '{key}'")
            }
            Self::NotFound { path } => format!("Configuration file not found: {path}"),
            Self::DiscoveryFailed { reason } => {
                format!("Could not locate configuration: {reason}")
            }
        }
    }

    fn context(&self) -> Option<String> {
        Some(
            "Configuration is read from .devflow/config.toml, DEVFLOW_* environment variables, and programmatic overrides."
                .to_string(),
        )
    }

    fn suggestions(&self) -> Vec<String> {
        match self {
            Self::InvalidFile(_) => vec!["Check the TOML syntax of the configuration file".to_string()],
            Self::MissingRequired(key) => vec![format!("Set '{key}' in the configuration file")],
            Self::InvalidValue { key, .. } => {
                vec![format!("Correct the value of '{key}'; see the documented ranges")]
            }
            Self::NotFound { .. } => vec![
                "Create .devflow/config.toml or unset DEVFLOW_CONFIG".to_string(),
            ],
            Self::DiscoveryFailed { .. } => {
                vec!["Pass an explicit configuration path".to_string()]
            }
        }
    }

    fn category(&self) -> ErrorCategory {
        ErrorCategory::Configuration
    }
}

/// Errors raised by completion backends.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LlmError {
    /// Transport-level failure (HTTP connectivity)
    #[error("Transport error: {0}")]
    Transport(String),

    /// Provider authentication failure (401, 403, missing API key)
    #[error("Provider authentication error: {0}")]
    ProviderAuth(String),

    /// Provider quota/rate limit exceeded (429)
    #[error("Provider quota exceeded: {0}")]
    ProviderQuota(String),

    /// Provider service outage (5xx errors)
    #[error("Provider outage: {0}")]
    ProviderOutage(String),

    /// Invocation timed out
    #[error("Timeout after {duration:?}")]
    Timeout { duration: Duration },

    /// Budget limit exceeded
    #[error("Budget exceeded: attempted {attempted} calls, limit is {limit}")]
    BudgetExceeded { limit: u32, attempted: u32 },

    /// Response could not be interpreted
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// Configuration error
    #[error("Misconfiguration: {0}")]
    Misconfiguration(String),

    /// Unsupported feature or provider
    #[error("Unsupported: {0}")]
    Unsupported(String),
}

impl LlmError {
    /// Whether another attempt may succeed without operator action.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Transport(_)
                | Self::ProviderQuota(_)
                | Self::ProviderOutage(_)
                | Self::Timeout { .. }
                | Self::MalformedResponse(_)
        )
    }
}

impl UserFriendlyError for LlmError {
    fn user_message(&self) -> String {
        match self {
            Self::Transport(msg) => format!("Completion transport error: {msg}"),
            Self::ProviderAuth(msg) => format!("Completion provider authentication failed: {msg}"),
            Self::ProviderQuota(msg) => format!("Completion provider quota exceeded: {msg}"),
            Self::ProviderOutage(msg) => format!("Completion provider service outage: {msg}"),
            Self::Timeout { duration } => format!("Completion timed out after {duration:?}"),
            Self::BudgetExceeded { limit, attempted } => format!(
                "Completion budget exceeded: attempted {attempted} calls, limit is {limit}"
            ),
            Self::MalformedResponse(msg) => format!("Completion response was malformed: {msg}"),
            Self::Misconfiguration(msg) => format!("Completion backend configuration error: {msg}"),
            Self::Unsupported(msg) => format!("Completion feature not supported: {msg}"),
        }
    }

    fn context(&self) -> Option<String> {
        match self {
            Self::Transport(_) => {
                Some("Transport errors occur when the provider cannot be reached.".to_string())
            }
            Self::ProviderAuth(_) => Some(
                "Authentication errors indicate missing or invalid API keys.".to_string(),
            ),
            Self::ProviderQuota(_) => {
                Some("Rate limits or usage limits were exceeded at the provider.".to_string())
            }
            Self::ProviderOutage(_) => {
                Some("Provider outages are temporary service disruptions.".to_string())
            }
            Self::Timeout { .. } => Some(
                "Each phase bounds its completion call with the configured phase timeout."
                    .to_string(),
            ),
            Self::BudgetExceeded { .. } => {
                Some("The call budget bounds completion cost per process.".to_string())
            }
            Self::MalformedResponse(_) => None,
            Self::Misconfiguration(_) | Self::Unsupported(_) => Some(
                "Check the [llm] section of the configuration.".to_string(),
            ),
        }
    }

    fn suggestions(&self) -> Vec<String> {
        match self {
            Self::Transport(_) | Self::ProviderOutage(_) => {
                vec!["Check network connectivity and the provider status page".to_string()]
            }
            Self::ProviderAuth(_) => vec![
                "Export the API key named by 'llm.api_key_env'".to_string(),
            ],
            Self::ProviderQuota(_) => vec!["Wait for the rate limit window to reset".to_string()],
            Self::Timeout { .. } => vec!["Increase 'phase_timeout'".to_string()],
            Self::BudgetExceeded { .. } => vec!["Raise 'llm.budget'".to_string()],
            Self::MalformedResponse(_) => {
                vec!["Use a model that follows the structured response format".to_string()]
            }
            Self::Misconfiguration(_) | Self::Unsupported(_) => {
                vec!["Set 'llm.provider' to a supported value".to_string()]
            }
        }
    }

    fn category(&self) -> ErrorCategory {
        ErrorCategory::CompletionBackend
    }
}

fn issue_lines(issues: &[QualityIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl UserFriendlyError for DevflowError {
    fn user_message(&self) -> String {
        match self {
            Self::Validation(err) => err.user_message(),
            Self::QuotaExceeded { tenant } => {
                format!("Tenant '{tenant}' has no free concurrent task slots")
            }
            Self::PhaseExecution(err) => err.user_message(),
            Self::SelfCorrection {
                original,
                corrective,
            } => format!(
                "Quality gate failed twice. Original issues: {}. After correction: {}",
                issue_lines(original),
                issue_lines(corrective)
            ),
            Self::InvalidTransition {
                task_id,
                from,
                action,
            } => format!("Cannot {action} task {task_id}: it is {from}"),
            Self::TaskNotFound { task_id } => format!("No task with id {task_id}"),
            Self::Config(err) => err.user_message(),
            Self::Llm(err) => err.user_message(),
            Self::System { reason } => format!("Internal failure: {reason}"),
            Self::Io(err) => format!("File system operation failed: {err}"),
        }
    }

    fn context(&self) -> Option<String> {
        match self {
            Self::Validation(err) => err.context(),
            Self::QuotaExceeded { .. } => Some(
                "The quota service caps how many tasks a tenant may run concurrently.".to_string(),
            ),
            Self::PhaseExecution(err) => err.context(),
            Self::SelfCorrection { .. } => {
                Some("Self-correction is attempted at most once per task.".to_string())
            }
            Self::InvalidTransition { .. } => {
                Some("Completed, failed, and cancelled tasks are immutable.".to_string())
            }
            Self::TaskNotFound { .. } => None,
            Self::Config(err) => err.context(),
            Self::Llm(err) => err.context(),
            Self::System { .. } | Self::Io(_) => Some(
                "The task was left in its last durable state for manual recovery.".to_string(),
            ),
        }
    }

    fn suggestions(&self) -> Vec<String> {
        match self {
            Self::Validation(err) => err.suggestions(),
            Self::QuotaExceeded { .. } => vec![
                "Wait for a running task to finish, then resubmit".to_string(),
                "Ask for a higher concurrency allowance".to_string(),
            ],
            Self::PhaseExecution(err) => err.suggestions(),
            Self::SelfCorrection { .. } => vec![
                "Review the reported issues and refine the task requirements".to_string(),
            ],
            Self::InvalidTransition { .. } | Self::TaskNotFound { .. } => {
                vec!["Query the task status before acting on it".to_string()]
            }
            Self::Config(err) => err.suggestions(),
            Self::Llm(err) => err.suggestions(),
            Self::System { .. } | Self::Io(_) => vec![
                "Check the task store's availability".to_string(),
                "Inspect the task's execution log before retrying".to_string(),
            ],
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Validation(_) => ErrorCategory::Validation,
            Self::QuotaExceeded { .. } => ErrorCategory::Quota,
            Self::PhaseExecution(_) => ErrorCategory::PhaseExecution,
            Self::SelfCorrection { .. } => ErrorCategory::QualityGate,
            Self::InvalidTransition { .. } | Self::TaskNotFound { .. } => {
                ErrorCategory::Concurrency
            }
            Self::Config(_) => ErrorCategory::Configuration,
            Self::Llm(_) => ErrorCategory::CompletionBackend,
            Self::System { .. } | Self::Io(_) => ErrorCategory::Persistence,
        }
    }
}
