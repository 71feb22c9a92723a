//! Reviewer decisions. A `VerificationDecision` only exists in validated form:
//! a reject always carries a non-blank reason and a bulk target is never empty.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::document::{DocumentId, SubjectId};
use super::enums::VerificationOutcome;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecisionError {
    #[error("A reason is required to reject a document")]
    MissingRejectReason,

    #[error("There are no unverified documents to act on")]
    EmptySnapshot,
}

/// What a decision applies to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DecisionTarget {
    Single(DocumentId),
    /// Every document of the subject that was not verified when the decision
    /// was opened. The id list is fixed at that moment.
    All {
        subject_id: SubjectId,
        snapshot: Vec<DocumentId>,
    },
}

impl DecisionTarget {
    pub fn document_ids(&self) -> &[DocumentId] {
        match self {
            Self::Single(id) => std::slice::from_ref(id),
            Self::All { snapshot, .. } => snapshot,
        }
    }

    pub fn is_bulk(&self) -> bool {
        matches!(self, Self::All { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationDecision {
    target: DecisionTarget,
    outcome: VerificationOutcome,
    notes: Option<String>,
}

impl VerificationDecision {
    pub fn new(
        target: DecisionTarget,
        outcome: VerificationOutcome,
        notes: &str,
    ) -> Result<Self, DecisionError> {
        let notes = notes.trim();
        if outcome == VerificationOutcome::Rejected && notes.is_empty() {
            return Err(DecisionError::MissingRejectReason);
        }
        if target.document_ids().is_empty() {
            return Err(DecisionError::EmptySnapshot);
        }

        Ok(Self {
            target,
            outcome,
            notes: (!notes.is_empty()).then(|| notes.to_string()),
        })
    }

    pub fn target(&self) -> &DecisionTarget {
        &self.target
    }

    pub fn outcome(&self) -> VerificationOutcome {
        self.outcome
    }

    pub fn notes(&self) -> Option<&str> {
        self.notes.as_deref()
    }
}
