use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{domain::ProposalId, phase::WorkflowPhase};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    ReadFailed,
    WriteRejected,
    UnknownPhase,
    EnrichmentUnavailable,
    InvalidAddress,
    UnexpectedValue,
    MalformedLog,
    NotReady,
    NoPhaseAction,
}

/// Caller-visible record of a problem, fatal or not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub code: ErrorCode,
    pub message: String,
}

impl Diagnostic {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VotingError {
    #[error("read of `{function}` failed: {cause}")]
    ReadFailed { function: String, cause: String },
    #[error("`{action}` was rejected: {cause}")]
    WriteRejected { action: String, cause: String },
    #[error("unknown workflow phase code {0}")]
    UnknownPhase(i128),
    #[error("description for proposal #{proposal_id} unavailable: {cause}")]
    EnrichmentUnavailable {
        proposal_id: ProposalId,
        cause: String,
    },
    #[error("invalid address `{0}`")]
    InvalidAddress(String),
    #[error("`{function}` returned an unexpected value, expected {expected}")]
    UnexpectedValue {
        function: String,
        expected: &'static str,
    },
    #[error("malformed `{event}` log: {reason}")]
    MalformedLog { event: &'static str, reason: String },
    #[error("session is {0}, expected ready")]
    NotReady(String),
    #[error("no phase-advancing action from {0:?}")]
    NoPhaseAction(Option<WorkflowPhase>),
}

impl VotingError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::ReadFailed { .. } => ErrorCode::ReadFailed,
            Self::WriteRejected { .. } => ErrorCode::WriteRejected,
            Self::UnknownPhase(_) => ErrorCode::UnknownPhase,
            Self::EnrichmentUnavailable { .. } => ErrorCode::EnrichmentUnavailable,
            Self::InvalidAddress(_) => ErrorCode::InvalidAddress,
            Self::UnexpectedValue { .. } => ErrorCode::UnexpectedValue,
            Self::MalformedLog { .. } => ErrorCode::MalformedLog,
            Self::NotReady(_) => ErrorCode::NotReady,
            Self::NoPhaseAction(_) => ErrorCode::NoPhaseAction,
        }
    }

    pub fn read_failed(function: impl Into<String>, cause: impl ToString) -> Self {
        Self::ReadFailed {
            function: function.into(),
            cause: cause.to_string(),
        }
    }

    pub fn write_rejected(action: impl Into<String>, cause: impl ToString) -> Self {
        Self::WriteRejected {
            action: action.into(),
            cause: cause.to_string(),
        }
    }
}

impl From<&VotingError> for Diagnostic {
    fn from(value: &VotingError) -> Self {
        Self {
            code: value.code(),
            message: value.to_string(),
        }
    }
}

impl From<VotingError> for Diagnostic {
    fn from(value: VotingError) -> Self {
        Diagnostic::from(&value)
    }
}
