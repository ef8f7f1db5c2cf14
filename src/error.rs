//! # Error Handling
//!
//! Error taxonomy for the scheduler control plane. Every failure a caller can
//! observe is a [`GspnError`]: one variant per failure class, each carrying an
//! [`ErrorContext`] with timestamp, operation, recovery suggestion and
//! classification flags.
//!
//! ## Error Classes
//!
//! | Class | Variant | Typical reaction |
//! |-------|---------|------------------|
//! | Admission | `ResourceExhausted`, `Suspended` | retry or fail the batch |
//! | Binding | `NoFreeCore` | job stays queued |
//! | Resolve | `Resolve`, `Coefficient` | job abandoned, slot released |
//! | Hardware configuration | `HwConfig` | logged with register dump, core freed |
//! | Timeout | `Timeout` | core recovered, job failed |
//! | Lifecycle | `InvalidState` | caller bug |
//! | Setup | `Config`, `Validation` | fix input |
//!
//! ## Usage
//!
//! ```rust
//! use gspn::error::{GspnError, Retryable};
//!
//! let error = GspnError::resource_exhausted("job_slots", 4, 1)
//!     .with_context("acquiring slots for a 4-job batch")
//!     .with_recovery_suggestion("Wait for in-flight jobs to complete");
//!
//! assert!(error.is_retryable());
//! ```

use std::{collections::HashMap, error::Error as StdError, fmt, time::SystemTime};

use gspn_coef::CoefError;

/// Severity levels for errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
    Fatal,
}

/// Metadata about when and where an error occurred
#[derive(Debug, Clone)]
pub struct ErrorContext {
    pub timestamp: SystemTime,
    /// The operation being performed when the error occurred
    pub operation: Option<String>,
    pub context: Option<String>,
    pub recovery_suggestion: Option<String>,
    pub severity: ErrorSeverity,
    pub retryable: bool,
    pub recoverable: bool,
    pub metadata: HashMap<String, String>,
}

impl Default for ErrorContext {
    fn default() -> Self {
        Self {
            timestamp: SystemTime::now(),
            operation: None,
            context: None,
            recovery_suggestion: None,
            severity: ErrorSeverity::Error,
            retryable: false,
            recoverable: false,
            metadata: HashMap::new(),
        }
    }
}

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = Some(operation.into());
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn with_severity(mut self, severity: ErrorSeverity) -> Self {
        self.severity = severity;
        self
    }
}

/// Crate-wide error type
#[derive(Debug)]
pub enum GspnError {
    /// Not enough free job slots before the admission deadline
    ResourceExhausted {
        resource: String,
        requested: usize,
        available: usize,
        context: ErrorContext,
    },
    /// Operation refused because the scheduler is suspending or suspended
    Suspended {
        operation: String,
        context: ErrorContext,
    },
    /// Lifecycle violation (wrong slot status, wrong core state)
    InvalidState {
        current_state: String,
        attempted_operation: String,
        reason: String,
        context: ErrorContext,
    },
    /// No core in the Free state
    NoFreeCore { context: ErrorContext },
    /// Buffer handle could not be resolved to a hardware address
    Resolve {
        layer: usize,
        handle: u64,
        reason: String,
        context: ErrorContext,
    },
    /// Coefficient generation or scaling plan failure
    Coefficient {
        source: CoefError,
        context: ErrorContext,
    },
    /// Register programmer returned a non-benign code
    HwConfig {
        core: usize,
        code: i32,
        context: ErrorContext,
    },
    /// Wait or execution budget exceeded
    Timeout {
        operation: String,
        duration_ms: u64,
        context: ErrorContext,
    },
    /// Configuration validation errors
    Config {
        field: String,
        value: String,
        reason: String,
        context: ErrorContext,
    },
    /// Job parameter validation errors
    Validation {
        field: String,
        constraint: String,
        value: String,
        context: ErrorContext,
    },
    Io {
        operation: String,
        path: Option<String>,
        source: std::io::Error,
        context: ErrorContext,
    },
    External {
        library: String,
        source: Box<dyn StdError + Send + Sync>,
        context: ErrorContext,
    },
}

impl GspnError {
    pub fn resource_exhausted(resource: impl Into<String>, requested: usize, available: usize) -> Self {
        Self::ResourceExhausted {
            resource: resource.into(),
            requested,
            available,
            context: ErrorContext::new(),
        }
    }

    pub fn suspended(operation: impl Into<String>) -> Self {
        Self::Suspended {
            operation: operation.into(),
            context: ErrorContext::new(),
        }
    }

    pub fn invalid_state(
        current_state: impl Into<String>,
        attempted_operation: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidState {
            current_state: current_state.into(),
            attempted_operation: attempted_operation.into(),
            reason: reason.into(),
            context: ErrorContext::new(),
        }
    }

    pub fn no_free_core() -> Self {
        Self::NoFreeCore {
            context: ErrorContext::new(),
        }
    }

    pub fn resolve(layer: usize, handle: u64, reason: impl Into<String>) -> Self {
        Self::Resolve {
            layer,
            handle,
            reason: reason.into(),
            context: ErrorContext::new(),
        }
    }

    pub fn coefficient(source: CoefError) -> Self {
        Self::Coefficient {
            source,
            context: ErrorContext::new(),
        }
    }

    pub fn hw_config(core: usize, code: i32) -> Self {
        Self::HwConfig {
            core,
            code,
            context: ErrorContext::new(),
        }
    }

    pub fn timeout(operation: impl Into<String>, duration_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration_ms,
            context: ErrorContext::new(),
        }
    }

    pub fn config(
        field: impl Into<String>,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::Config {
            field: field.into(),
            value: value.into(),
            reason: reason.into(),
            context: ErrorContext::new(),
        }
    }

    pub fn validation(
        field: impl Into<String>,
        constraint: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self::Validation {
            field: field.into(),
            constraint: constraint.into(),
            value: value.into(),
            context: ErrorContext::new(),
        }
    }

    pub fn io(operation: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            operation: operation.into(),
            path: None,
            source,
            context: ErrorContext::new(),
        }
    }

    pub fn external(
        library: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self::External {
            library: library.into(),
            source: Box::new(source),
            context: ErrorContext::new(),
        }
    }

    /// Attach a path to an I/O error; no-op for other variants.
    pub fn with_path(mut self, new_path: impl Into<String>) -> Self {
        if let Self::Io { path, .. } = &mut self {
            *path = Some(new_path.into());
        }
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context_mut().context = Some(context.into());
        self
    }

    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.context_mut().operation = Some(operation.into());
        self
    }

    pub fn with_recovery_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.context_mut().recovery_suggestion = Some(suggestion.into());
        self
    }

    pub fn with_severity(mut self, severity: ErrorSeverity) -> Self {
        self.context_mut().severity = severity;
        self
    }

    pub fn retryable(mut self) -> Self {
        self.context_mut().retryable = true;
        self
    }

    pub fn recoverable(mut self) -> Self {
        self.context_mut().recoverable = true;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context_mut().metadata.insert(key.into(), value.into());
        self
    }

    pub fn context(&self) -> &ErrorContext {
        match self {
            Self::ResourceExhausted { context, .. } => context,
            Self::Suspended { context, .. } => context,
            Self::InvalidState { context, .. } => context,
            Self::NoFreeCore { context } => context,
            Self::Resolve { context, .. } => context,
            Self::Coefficient { context, .. } => context,
            Self::HwConfig { context, .. } => context,
            Self::Timeout { context, .. } => context,
            Self::Config { context, .. } => context,
            Self::Validation { context, .. } => context,
            Self::Io { context, .. } => context,
            Self::External { context, .. } => context,
        }
    }

    fn context_mut(&mut self) -> &mut ErrorContext {
        match self {
            Self::ResourceExhausted { context, .. } => context,
            Self::Suspended { context, .. } => context,
            Self::InvalidState { context, .. } => context,
            Self::NoFreeCore { context } => context,
            Self::Resolve { context, .. } => context,
            Self::Coefficient { context, .. } => context,
            Self::HwConfig { context, .. } => context,
            Self::Timeout { context, .. } => context,
            Self::Config { context, .. } => context,
            Self::Validation { context, .. } => context,
            Self::Io { context, .. } => context,
            Self::External { context, .. } => context,
        }
    }

    /// Error category as a string
    pub fn category(&self) -> &'static str {
        match self {
            Self::ResourceExhausted { .. } => "resource_exhausted",
            Self::Suspended { .. } => "suspended",
            Self::InvalidState { .. } => "invalid_state",
            Self::NoFreeCore { .. } => "no_free_core",
            Self::Resolve { .. } => "resolve",
            Self::Coefficient { .. } => "coefficient",
            Self::HwConfig { .. } => "hw_config",
            Self::Timeout { .. } => "timeout",
            Self::Config { .. } => "config",
            Self::Validation { .. } => "validation",
            Self::Io { .. } => "io",
            Self::External { .. } => "external",
        }
    }
}

impl fmt::Display for GspnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GspnError::ResourceExhausted {
                resource,
                requested,
                available,
                ..
            } => {
                write!(
                    f,
                    "Resource exhausted: {} requested {}, {} available",
                    resource, requested, available
                )
            }
            GspnError::Suspended { operation, .. } => {
                write!(f, "Scheduler suspended, refusing {}", operation)
            }
            GspnError::InvalidState {
                current_state,
                attempted_operation,
                reason,
                ..
            } => {
                write!(
                    f,
                    "Invalid state '{}' when attempting '{}': {}",
                    current_state, attempted_operation, reason
                )
            }
            GspnError::NoFreeCore { .. } => write!(f, "No free core"),
            GspnError::Resolve {
                layer,
                handle,
                reason,
                ..
            } => {
                write!(
                    f,
                    "Failed to resolve buffer {:#x} for layer {}: {}",
                    handle, layer, reason
                )
            }
            GspnError::Coefficient { source, .. } => {
                write!(f, "Coefficient generation failed: {}", source)
            }
            GspnError::HwConfig { core, code, .. } => {
                write!(f, "Core {} rejected configuration (code {:#x})", core, code)
            }
            GspnError::Timeout {
                operation,
                duration_ms,
                ..
            } => {
                write!(f, "Timeout during {} after {}ms", operation, duration_ms)
            }
            GspnError::Config {
                field,
                value,
                reason,
                ..
            } => {
                write!(
                    f,
                    "Configuration error in '{}': {} (value: {})",
                    field, reason, value
                )
            }
            GspnError::Validation {
                field,
                constraint,
                value,
                ..
            } => {
                write!(
                    f,
                    "Validation failed for '{}': {} (value: {})",
                    field, constraint, value
                )
            }
            GspnError::Io {
                operation,
                path,
                source,
                ..
            } => {
                if let Some(path) = path {
                    write!(f, "I/O error during {} on '{}': {}", operation, path, source)
                } else {
                    write!(f, "I/O error during {}: {}", operation, source)
                }
            }
            GspnError::External {
                library, source, ..
            } => {
                write!(f, "External library error in {}: {}", library, source)
            }
        }
    }
}

impl StdError for GspnError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Coefficient { source, .. } => Some(source),
            Self::External { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

/// Result type alias using the crate error type
pub type GspnResult<T> = Result<T, GspnError>;

/// Errors that can be retried
pub trait Retryable {
    fn is_retryable(&self) -> bool;

    /// Recommended retry delay in milliseconds
    fn retry_delay_ms(&self) -> Option<u64> {
        None
    }

    fn max_retries(&self) -> Option<usize> {
        None
    }
}

impl Retryable for GspnError {
    fn is_retryable(&self) -> bool {
        self.context().retryable
            || matches!(
                self,
                Self::ResourceExhausted { .. } | Self::NoFreeCore { .. } | Self::Timeout { .. }
            )
    }

    fn retry_delay_ms(&self) -> Option<u64> {
        match self {
            Self::ResourceExhausted { .. } => Some(10),
            Self::NoFreeCore { .. } => Some(2),
            Self::Timeout { .. } => Some(100),
            _ => None,
        }
    }

    fn max_retries(&self) -> Option<usize> {
        match self {
            Self::ResourceExhausted { .. } => Some(10),
            Self::NoFreeCore { .. } => Some(50),
            Self::Timeout { .. } => Some(3),
            _ => None,
        }
    }
}

/// Errors that can be recovered from
pub trait Recoverable {
    fn is_recoverable(&self) -> bool;

    fn recovery_strategies(&self) -> Vec<RecoveryStrategy>;
}

/// Recovery strategies for handling errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryStrategy {
    Retry { max_attempts: usize, delay_ms: u64 },
    /// Drop the job and report it failed
    Abandon { reason: String },
    /// Reset the named component
    Reinitialize { component: String },
    /// Wait for the given condition before resubmitting
    WaitFor { condition: String },
}

impl Recoverable for GspnError {
    fn is_recoverable(&self) -> bool {
        self.context().recoverable
            || matches!(
                self,
                Self::ResourceExhausted { .. }
                    | Self::Suspended { .. }
                    | Self::NoFreeCore { .. }
                    | Self::Resolve { .. }
                    | Self::Coefficient { .. }
                    | Self::HwConfig { .. }
                    | Self::Timeout { .. }
            )
    }

    fn recovery_strategies(&self) -> Vec<RecoveryStrategy> {
        match self {
            Self::ResourceExhausted { .. } => vec![RecoveryStrategy::Retry {
                max_attempts: 10,
                delay_ms: 10,
            }],
            Self::Suspended { .. } => vec![RecoveryStrategy::WaitFor {
                condition: "resume".to_string(),
            }],
            Self::NoFreeCore { .. } => vec![RecoveryStrategy::WaitFor {
                condition: "core_free".to_string(),
            }],
            Self::Resolve { .. } | Self::Coefficient { .. } => vec![RecoveryStrategy::Abandon {
                reason: "job parameters cannot be executed".to_string(),
            }],
            Self::HwConfig { core, .. } => vec![
                RecoveryStrategy::Abandon {
                    reason: "register configuration rejected".to_string(),
                },
                RecoveryStrategy::Reinitialize {
                    component: format!("core{}", core),
                },
            ],
            Self::Timeout { .. } => vec![
                RecoveryStrategy::Reinitialize {
                    component: "core".to_string(),
                },
                RecoveryStrategy::Retry {
                    max_attempts: 3,
                    delay_ms: 100,
                },
            ],
            _ => vec![],
        }
    }
}

/// Errors with severity levels
pub trait HasSeverity {
    fn severity(&self) -> ErrorSeverity;
}

impl HasSeverity for GspnError {
    fn severity(&self) -> ErrorSeverity {
        self.context().severity
    }
}

/// Errors that provide recovery suggestions
pub trait HasRecoverySuggestion {
    fn recovery_suggestion(&self) -> Option<&str>;
}

impl HasRecoverySuggestion for GspnError {
    fn recovery_suggestion(&self) -> Option<&str> {
        self.context().recovery_suggestion.as_deref()
    }
}

/// Error classification utilities
pub mod classify {
    use super::*;

    /// Transient errors may resolve themselves
    pub fn is_transient(error: &GspnError) -> bool {
        matches!(
            error,
            GspnError::ResourceExhausted { .. }
                | GspnError::NoFreeCore { .. }
                | GspnError::Timeout { .. }
                | GspnError::Suspended { .. }
        )
    }

    /// Fatal errors cannot be recovered from by retrying the same input
    pub fn is_fatal(error: &GspnError) -> bool {
        matches!(
            error,
            GspnError::Config { .. } | GspnError::Validation { .. } | GspnError::InvalidState { .. }
        ) || error.severity() == ErrorSeverity::Fatal
    }

    /// True when the failure is attributed to a single job rather than the system
    pub fn is_job_scoped(error: &GspnError) -> bool {
        matches!(
            error,
            GspnError::Resolve { .. } | GspnError::Coefficient { .. } | GspnError::HwConfig { .. }
        )
    }

    /// Error priority (higher numbers = higher priority)
    pub fn priority(error: &GspnError) -> u8 {
        match error.severity() {
            ErrorSeverity::Debug => 0,
            ErrorSeverity::Info => 1,
            ErrorSeverity::Warning => 2,
            ErrorSeverity::Error => 3,
            ErrorSeverity::Critical => 4,
            ErrorSeverity::Fatal => 5,
        }
    }
}

impl From<std::io::Error> for GspnError {
    fn from(error: std::io::Error) -> Self {
        Self::io("unknown", error)
    }
}

impl From<serde_json::Error> for GspnError {
    fn from(error: serde_json::Error) -> Self {
        Self::external("serde_json", error)
    }
}

impl From<CoefError> for GspnError {
    fn from(error: CoefError) -> Self {
        Self::coefficient(error)
    }
}

/// Fluent error construction
pub struct ErrorBuilder {
    error: GspnError,
}

impl ErrorBuilder {
    pub fn new(error: GspnError) -> Self {
        Self { error }
    }

    pub fn context(mut self, context: impl Into<String>) -> Self {
        self.error = self.error.with_context(context);
        self
    }

    pub fn operation(mut self, operation: impl Into<String>) -> Self {
        self.error = self.error.with_operation(operation);
        self
    }

    pub fn recovery_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.error = self.error.with_recovery_suggestion(suggestion);
        self
    }

    pub fn severity(mut self, severity: ErrorSeverity) -> Self {
        self.error = self.error.with_severity(severity);
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.error = self.error.with_metadata(key, value);
        self
    }

    pub fn build(self) -> GspnError {
        self.error
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let error = GspnError::config("core_count", "3", "must be 1 or 2");
        assert_eq!(error.category(), "config");
        assert!(!error.is_retryable());
        assert!(classify::is_fatal(&error));
    }

    #[test]
    fn test_error_with_context() {
        let error = GspnError::hw_config(1, 0x21)
            .with_context("programming layer 0")
            .with_recovery_suggestion("check layer geometry")
            .with_severity(ErrorSeverity::Critical);

        assert_eq!(error.category(), "hw_config");
        assert!(error.is_recoverable());
        assert!(classify::is_job_scoped(&error));
        assert_eq!(error.recovery_suggestion(), Some("check layer geometry"));
        assert_eq!(classify::priority(&error), 4);
        assert_eq!(error.to_string(), "Core 1 rejected configuration (code 0x21)");
    }

    #[test]
    fn test_error_traits() {
        let timeout = GspnError::timeout("sync_wait", 3000);
        assert!(timeout.is_retryable());
        assert_eq!(timeout.retry_delay_ms(), Some(100));
        assert_eq!(timeout.max_retries(), Some(3));
        assert!(classify::is_transient(&timeout));

        let invalid = GspnError::invalid_state("Idle", "submit", "slot not filled");
        assert!(!invalid.is_retryable());
        assert!(invalid.recovery_strategies().is_empty());
    }

    #[test]
    fn test_coefficient_source_chain() {
        let error: GspnError = CoefError::UnsupportedTaps(3).into();
        assert_eq!(error.category(), "coefficient");
        assert!(error.source().is_some());
    }

    #[test]
    fn test_builder_metadata() {
        let error = ErrorBuilder::new(GspnError::timeout("sync_wait", 50))
            .operation("submit_batch")
            .metadata("completed", "1")
            .build();
        assert_eq!(error.context().operation.as_deref(), Some("submit_batch"));
        assert_eq!(
            error.context().metadata.get("completed").map(String::as_str),
            Some("1")
        );
    }
}
