//! Error types for the Volume Group Operator
//!
//! Provides structured error types for the reconciliation state machine,
//! the sync engine, the device selector and the host adapters.

use crate::inventory::selector::SelectorError;
use std::time::Duration;
use thiserror::Error;

/// Unified error type for the operator
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Reconciliation pass timed out after {0:?}")]
    Timeout(Duration),

    // =========================================================================
    // Kubernetes Errors
    // =========================================================================
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("Resource not found: {kind}/{name}")]
    ResourceNotFound { kind: String, name: String },

    // =========================================================================
    // Volume Group Subsystem Errors
    // =========================================================================
    #[error("Volume group not found on host: {name}")]
    SubsystemNotFound { name: String },

    #[error("Device loss detected: {details}: {message}")]
    DeviceLossDetected {
        details: DeviceLossDetails,
        message: String,
    },

    #[error("Subsystem operation failed: {operation}: {reason}")]
    SubsystemOperationFailed { operation: String, reason: String },

    // =========================================================================
    // Selector Errors
    // =========================================================================
    #[error("Selector evaluation failed: {0}")]
    Selector(#[from] SelectorError),

    // =========================================================================
    // Parse Errors
    // =========================================================================
    #[error("Quantity conversion failed for {field}: {reason}")]
    QuantityConversion { field: String, reason: String },

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    // =========================================================================
    // IO Errors
    // =========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // =========================================================================
    // Composite
    // =========================================================================
    #[error("{}", join_messages(.0))]
    Aggregate(Vec<Error>),
}

/// Details extracted from a missing physical volume report
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceLossDetails {
    pub missing_vg: Option<String>,
    pub missing_pv: Option<String>,
    pub last_write_path: Option<String>,
}

impl std::fmt::Display for DeviceLossDetails {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "volume group {} is missing physical volume {} (last written to {})",
            self.missing_vg.as_deref().unwrap_or("<unknown>"),
            self.missing_pv.as_deref().unwrap_or("<unknown>"),
            self.last_write_path.as_deref().unwrap_or("<unknown>"),
        )
    }
}

fn join_messages(errors: &[Error]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Action to take on error during reconciliation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    /// Requeue with the controller's default error delay
    RequeueWithBackoff,
    /// Requeue after specific duration
    RequeueAfter(Duration),
    /// Don't requeue, wait for changes
    NoRequeue,
}

impl Error {
    /// Combine collected errors into one, keeping single errors as they are.
    /// Returns `None` if nothing failed.
    pub fn join(mut errors: Vec<Error>) -> Option<Error> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(Error::Aggregate(errors)),
        }
    }

    /// Wrap a failed host call
    pub fn operation(operation: impl Into<String>, reason: impl ToString) -> Self {
        Error::SubsystemOperationFailed {
            operation: operation.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether this is (or contains only) a host-side "not found"
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::SubsystemNotFound { .. } => true,
            Error::Aggregate(errors) => !errors.is_empty() && errors.iter().all(Error::is_not_found),
            _ => false,
        }
    }

    /// Determine what action to take for this error
    pub fn action(&self) -> ErrorAction {
        match self {
            // Transient errors - retry with backoff
            Error::Kube(_) | Error::Timeout(_) | Error::SubsystemOperationFailed { .. } => {
                ErrorAction::RequeueWithBackoff
            }

            // Missing devices need an operator or policy change, poll slowly
            Error::DeviceLossDetected { .. } => ErrorAction::RequeueAfter(Duration::from_secs(60)),

            // Inventory may change as devices appear
            Error::Selector(_) => ErrorAction::RequeueAfter(Duration::from_secs(30)),

            // Configuration errors - don't retry automatically
            Error::Configuration(_) => ErrorAction::NoRequeue,

            Error::Aggregate(errors) => errors
                .iter()
                .map(Error::action)
                .min_by_key(|action| match action {
                    ErrorAction::RequeueWithBackoff => 0,
                    ErrorAction::RequeueAfter(_) => 1,
                    ErrorAction::NoRequeue => 2,
                })
                .unwrap_or(ErrorAction::RequeueWithBackoff),

            // All other errors - retry with backoff
            _ => ErrorAction::RequeueWithBackoff,
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        !matches!(self.action(), ErrorAction::NoRequeue)
    }
}

/// Result type alias for the operator
pub type Result<T> = std::result::Result<T, Error>;
