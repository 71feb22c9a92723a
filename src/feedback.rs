//! Outcome messages for the presentation layer.

use serde::Serialize;

use crate::preview::PreviewError;
use crate::review::ReviewError;
use crate::transport::TransportError;
use crate::upload::UploadError;
use crate::validator::ValidationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackKind {
    Success,
    /// Refused locally; the user can fix the input.
    ValidationFailure,
    /// The server or network failed; retrying may help.
    TransportFailure,
    /// Disk or local state failed after the server answered.
    LocalFailure,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionFeedback {
    pub success: bool,
    pub message: String,
    pub kind: FeedbackKind,
}

/// Errors that can be shown to the user.
pub trait UserFacingError: std::fmt::Display {
    fn feedback_kind(&self) -> FeedbackKind;
}

impl UserFacingError for ValidationError {
    fn feedback_kind(&self) -> FeedbackKind {
        FeedbackKind::ValidationFailure
    }
}

impl UserFacingError for TransportError {
    fn feedback_kind(&self) -> FeedbackKind {
        FeedbackKind::TransportFailure
    }
}

impl UserFacingError for PreviewError {
    fn feedback_kind(&self) -> FeedbackKind {
        match self {
            Self::Transport(_) => FeedbackKind::TransportFailure,
            Self::Blob(_) => FeedbackKind::LocalFailure,
        }
    }
}

impl UserFacingError for UploadError {
    fn feedback_kind(&self) -> FeedbackKind {
        match self {
            e if e.is_validation() => FeedbackKind::ValidationFailure,
            Self::Transport(_) => FeedbackKind::TransportFailure,
            Self::Preview(e) => e.feedback_kind(),
            _ => FeedbackKind::LocalFailure,
        }
    }
}

impl UserFacingError for ReviewError {
    fn feedback_kind(&self) -> FeedbackKind {
        if self.is_validation() {
            FeedbackKind::ValidationFailure
        } else {
            FeedbackKind::TransportFailure
        }
    }
}

impl ActionFeedback {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            kind: FeedbackKind::Success,
        }
    }

    pub fn failure<E: UserFacingError>(err: &E) -> Self {
        Self {
            success: false,
            message: err.to_string(),
            kind: err.feedback_kind(),
        }
    }

    pub fn from_result<T, E: UserFacingError>(
        result: &Result<T, E>,
        success_message: impl Into<String>,
    ) -> Self {
        match result {
            Ok(_) => Self::success(success_message),
            Err(e) => Self::failure(e),
        }
    }
}
