//! Apply a confirmed reviewer decision to the local registry without a
//! round-trip.
//!
//! Only ever called after the remote call succeeded. A bulk decision touches
//! exactly the ids in its snapshot: documents that arrived after the decision
//! was opened keep their status, and snapshot ids that vanished are skipped.

use serde::Serialize;

use crate::models::{DocumentId, VerificationDecision, VerificationStatus};
use crate::registry::DocumentRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The id is no longer in the registry.
    Missing,
    /// The document's current status has no edge to the outcome.
    IllegalTransition(VerificationStatus),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub updated: Vec<DocumentId>,
    pub skipped: Vec<(DocumentId, SkipReason)>,
    /// Set when a follow-up re-fetch was wanted but failed, so the local view
    /// is the optimistic one.
    pub stale: bool,
}

impl ReconcileReport {
    pub fn is_clean(&self) -> bool {
        self.skipped.is_empty() && !self.stale
    }
}

/// Reflect a successful decision in the registry.
pub fn apply(registry: &mut DocumentRegistry, decision: &VerificationDecision) -> ReconcileReport {
    let next: VerificationStatus = decision.outcome().into();
    let notes = decision.notes().map(str::to_string);
    let mut report = ReconcileReport::default();

    for id in decision.target().document_ids() {
        let current = match registry.get(id) {
            Some(doc) => doc.verification_status,
            None => {
                tracing::warn!(document_id = %id, "Decision target no longer in registry");
                report.skipped.push((id.clone(), SkipReason::Missing));
                continue;
            }
        };

        if !current.can_transition_to(next) {
            tracing::warn!(
                document_id = %id,
                from = %current,
                to = %next,
                "Skipping illegal status transition"
            );
            report
                .skipped
                .push((id.clone(), SkipReason::IllegalTransition(current)));
            continue;
        }

        registry.set_verification(id, next, notes.clone());
        report.updated.push(id.clone());
    }

    tracing::info!(
        subject = %registry.subject_id(),
        outcome = %decision.outcome(),
        bulk = decision.target().is_bulk(),
        updated = report.updated.len(),
        skipped = report.skipped.len(),
        "Verification decision reconciled"
    );

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DecisionTarget, DocumentType, VerificationOutcome};
    use crate::registry::tests::{doc, registry_with, subject};

    fn single(id: &str, outcome: VerificationOutcome, notes: &str) -> VerificationDecision {
        VerificationDecision::new(DecisionTarget::Single(DocumentId::new(id)), outcome, notes)
            .unwrap()
    }

    #[test]
    fn single_decision_touches_only_its_target() {
        let mut registry = registry_with(vec![
            doc("l", DocumentType::License, VerificationStatus::Pending),
            doc("c", DocumentType::Certificate, VerificationStatus::Pending),
        ]);

        let report = apply(
            &mut registry,
            &single("c", VerificationOutcome::Rejected, "blurry scan"),
        );

        assert_eq!(report.updated, vec![DocumentId::new("c")]);
        let c = registry.get(&DocumentId::new("c")).unwrap();
        assert_eq!(c.verification_status, VerificationStatus::Rejected);
        assert_eq!(c.verification_notes.as_deref(), Some("blurry scan"));
        let l = registry.get(&DocumentId::new("l")).unwrap();
        assert_eq!(l.verification_status, VerificationStatus::Pending);
        assert_eq!(l.verification_notes, None);
    }

    #[test]
    fn bulk_applies_to_snapshot_not_current_state() {
        let mut registry = registry_with(vec![
            doc("l", DocumentType::License, VerificationStatus::Pending),
            doc("c", DocumentType::Certificate, VerificationStatus::Uploaded),
            doc("e", DocumentType::Experience, VerificationStatus::Pending),
        ]);
        let snapshot = registry.unverified_ids();
        let decision = VerificationDecision::new(
            DecisionTarget::All {
                subject_id: subject(),
                snapshot,
            },
            VerificationOutcome::Verified,
            "ok",
        )
        .unwrap();

        // The subject replaces the experience letter after the decision opened.
        registry.remove(&DocumentId::new("e"));
        registry
            .insert(doc("e2", DocumentType::Experience, VerificationStatus::Pending))
            .unwrap();

        let report = apply(&mut registry, &decision);

        assert_eq!(
            report.updated,
            vec![DocumentId::new("l"), DocumentId::new("c")]
        );
        assert_eq!(
            report.skipped,
            vec![(DocumentId::new("e"), SkipReason::Missing)]
        );
        for id in ["l", "c"] {
            let d = registry.get(&DocumentId::new(id)).unwrap();
            assert_eq!(d.verification_status, VerificationStatus::Verified);
            assert_eq!(d.verification_notes.as_deref(), Some("ok"));
        }
        let late = registry.get(&DocumentId::new("e2")).unwrap();
        assert_eq!(late.verification_status, VerificationStatus::Pending);
    }

    #[test]
    fn bulk_never_changes_documents_verified_at_snapshot() {
        let mut registry = registry_with(vec![
            doc("l", DocumentType::License, VerificationStatus::Verified),
            doc("c", DocumentType::Certificate, VerificationStatus::Pending),
        ]);
        let decision = VerificationDecision::new(
            DecisionTarget::All {
                subject_id: subject(),
                snapshot: registry.unverified_ids(),
            },
            VerificationOutcome::Rejected,
            "expired",
        )
        .unwrap();

        apply(&mut registry, &decision);

        let l = registry.get(&DocumentId::new("l")).unwrap();
        assert_eq!(l.verification_status, VerificationStatus::Verified);
        assert_eq!(l.verification_notes, None);
    }

    #[test]
    fn verified_document_is_not_demoted() {
        let mut registry =
            registry_with(vec![doc("l", DocumentType::License, VerificationStatus::Verified)]);
        let rev = registry.revision();

        let report = apply(
            &mut registry,
            &single("l", VerificationOutcome::Rejected, "changed my mind"),
        );

        assert!(report.updated.is_empty());
        assert_eq!(
            report.skipped,
            vec![(
                DocumentId::new("l"),
                SkipReason::IllegalTransition(VerificationStatus::Verified)
            )]
        );
        assert_eq!(registry.revision(), rev);
    }

    #[test]
    fn rejected_document_can_be_verified_by_reviewer() {
        let mut registry =
            registry_with(vec![doc("c", DocumentType::Certificate, VerificationStatus::Rejected)]);
        let report = apply(&mut registry, &single("c", VerificationOutcome::Verified, ""));
        assert!(report.is_clean());
        let c = registry.get(&DocumentId::new("c")).unwrap();
        assert_eq!(c.verification_status, VerificationStatus::Verified);
        assert_eq!(c.verification_notes, None);
    }

    #[test]
    fn gate_flags_follow_reconciliation() {
        let mut registry = registry_with(vec![
            doc("l", DocumentType::License, VerificationStatus::Pending),
            doc("c", DocumentType::Certificate, VerificationStatus::Pending),
        ]);
        assert!(!registry.all_required_verified());

        apply(&mut registry, &single("l", VerificationOutcome::Verified, ""));
        apply(&mut registry, &single("c", VerificationOutcome::Verified, ""));

        assert!(registry.all_required_verified());
        assert!(!registry.can_submit_for_review());
    }
}
