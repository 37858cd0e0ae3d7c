//! Engine errors
//!
//! Two layers: [`ActionError`] is what the action executor hands back for a
//! single wire call, [`EngineError`] is what the engine surfaces to the
//! resource code after classification.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Wire status meaning "the dry-run request would have succeeded"
pub const DRY_RUN_PASSED_STATUS: u16 = 412;

/// Classification assigned at the executor boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionErrorKind {
    /// Remote object does not exist
    NotFound,
    /// Dry-run validation passed (status 412)
    DryRunPassed,
    /// Anything else
    Other,
}

/// Failure of one wire action
#[derive(Debug, Clone)]
pub struct ActionError {
    pub kind: ActionErrorKind,
    pub status: Option<u16>,
    pub code: Option<String>,
    pub message: String,
    pub request_id: Option<String>,
}

impl fmt::Display for ActionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.status, &self.code) {
            (Some(status), Some(code)) => write!(f, "[{}] {}: {}", status, code, self.message),
            (Some(status), None) => write!(f, "[{}] {}", status, self.message),
            (None, Some(code)) => write!(f, "{}: {}", code, self.message),
            (None, None) => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for ActionError {}

impl ActionError {
    /// Build an error and classify it from status, code and message
    pub fn classify(status: Option<u16>, code: Option<String>, message: impl Into<String>) -> Self {
        let message = message.into();
        let kind = classify_kind(status, code.as_deref(), &message);
        Self {
            kind,
            status,
            code,
            message,
            request_id: None,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            kind: ActionErrorKind::NotFound,
            status: Some(404),
            code: Some("NotFound".to_string()),
            message: message.into(),
            request_id: None,
        }
    }

    pub fn dry_run_passed() -> Self {
        Self {
            kind: ActionErrorKind::DryRunPassed,
            status: Some(DRY_RUN_PASSED_STATUS),
            code: Some("DryRunOperation".to_string()),
            message: "Request validation has been passed with DryRun flag set".to_string(),
            request_id: None,
        }
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self {
            kind: ActionErrorKind::Other,
            status: None,
            code: None,
            message: message.into(),
            request_id: None,
        }
    }

    pub fn with_request_id(mut self, request_id: Option<String>) -> Self {
        self.request_id = request_id;
        self
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == ActionErrorKind::NotFound
    }

    pub fn is_dry_run_passed(&self) -> bool {
        self.kind == ActionErrorKind::DryRunPassed
    }
}

fn classify_kind(status: Option<u16>, code: Option<&str>, message: &str) -> ActionErrorKind {
    if status == Some(DRY_RUN_PASSED_STATUS) {
        return ActionErrorKind::DryRunPassed;
    }
    if status == Some(404) {
        return ActionErrorKind::NotFound;
    }
    if let Some(code) = code {
        if code.contains("NotFound") || code.ends_with(".NotExist") {
            return ActionErrorKind::NotFound;
        }
    }
    // Some endpoints only say so in the message text.
    if message.contains("not exist") || message.contains("NotFound") {
        return ActionErrorKind::NotFound;
    }
    ActionErrorKind::Other
}

/// Errors surfaced by the reconciliation engine
#[derive(Debug, Error)]
pub enum EngineError {
    /// A transform rule or schema mismatch. Never retried.
    #[error("mapping error at `{path}`: {reason}")]
    Mapping { path: String, reason: String },

    /// The remote object is absent
    #[error("{action}: resource {resource_id} not found")]
    NotFound {
        action: String,
        resource_id: String,
        #[source]
        source: Option<ActionError>,
    },

    /// Failure on a delete/disassociate path that may clear up on retry
    #[error("{action} on {resource_id} failed, will retry: {source}")]
    Transient {
        action: String,
        resource_id: String,
        #[source]
        source: ActionError,
    },

    /// Any other execution failure
    #[error("{action} failed for resource {resource_id}: {source}")]
    Fatal {
        action: String,
        resource_id: String,
        #[source]
        source: ActionError,
    },

    /// A state wait observed a designated failure state
    #[error("resource {resource_id} entered failure state `{state}`")]
    Convergence { resource_id: String, state: String },

    /// A wait or retry exceeded its ceiling
    #[error("timeout after {timeout:?} waiting for {what} (last state: {last_state})")]
    Timeout {
        what: String,
        timeout: Duration,
        last_state: String,
    },

    /// Writing a listing to its output file failed
    #[error("failed to write {path}: {source}")]
    Output {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl EngineError {
    pub fn mapping(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Mapping {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Wrap an executor failure with the action and resource identifier
    pub fn from_action(action: &str, resource_id: &str, source: ActionError) -> Self {
        if source.is_not_found() {
            Self::NotFound {
                action: action.to_string(),
                resource_id: resource_id.to_string(),
                source: Some(source),
            }
        } else {
            Self::Fatal {
                action: action.to_string(),
                resource_id: resource_id.to_string(),
                source,
            }
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. } | Self::NotFound { .. })
    }
}

pub type Result<T, E = EngineError> = std::result::Result<T, E>;
