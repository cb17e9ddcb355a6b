// Release gate: checklist, rejection and signed release

mod fixtures;

use cssd_trace::journal::AuditEvent;
use cssd_trace::validation::content_hash;
use cssd_trace::{
    lot_id_for, Checklist, ChecklistItem, CssdError, CycleStatus, EntityRef, Operator, Outcome,
    RejectionReason, Stage,
};
use fixtures::{context, qc, supervisor, tech, Harness};

#[tokio::test]
async fn test_technician_cannot_validate() {
    let h = Harness::new();
    let ids = h.packaged(&["BSK001"], 2_000).await;
    let cycle = h.completed_cycle(&ids).await;

    let err = h
        .service
        .submit_validation(&cycle.id, Checklist::uniform(true), "", &tech())
        .await
        .unwrap_err();
    assert!(matches!(err, CssdError::Unauthorized { ref role, .. } if role == "technician"));
    assert!(h.service.validations().await.is_empty());
}

#[tokio::test]
async fn test_running_cycle_cannot_be_validated() {
    let h = Harness::new();
    let ids = h.packaged(&["BSK001"], 2_000).await;
    let cycle = h.running_cycle(&ids).await;

    let err = h
        .service
        .submit_validation(&cycle.id, Checklist::uniform(true), "", &qc())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "illegal_transition");
}

#[tokio::test]
async fn test_incomplete_checklist_names_missing_checks() {
    let h = Harness::new();
    let ids = h.packaged(&["BSK001"], 2_000).await;
    let cycle = h.completed_cycle(&ids).await;

    let mut checklist = Checklist::default();
    checklist.set(ChecklistItem::PackagingIntegrity, true);
    checklist.set(ChecklistItem::SterileBarrier, true);
    let err = h
        .service
        .submit_validation(&cycle.id, checklist, "", &qc())
        .await
        .unwrap_err();
    match err {
        CssdError::IncompleteChecklist { missing, .. } => {
            assert_eq!(missing, vec!["label_quality", "visual_inspection"]);
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(h.service.cycle(&cycle.id).await.unwrap().status, CycleStatus::PendingValidation);
}

#[tokio::test]
async fn test_approval_waits_for_signature() {
    let h = Harness::new();
    let ids = h.packaged(&["BSK001", "BSK002"], 2_000).await;
    let cycle = h.completed_cycle(&ids).await;

    let record = h
        .service
        .submit_validation(&cycle.id, Checklist::uniform(true), "  indicators ok ", &qc())
        .await
        .unwrap();
    assert_eq!(record.outcome, Outcome::Approved);
    assert!(record.awaiting_signature());
    assert_eq!(record.comments, "indicators ok");
    assert_eq!(record.content_hash.len(), 64);
    assert_eq!(
        record.content_hash,
        content_hash(&cycle.id, &Checklist::uniform(true), "indicators ok").unwrap()
    );

    // nothing is released before the signature
    assert_eq!(h.service.cycle(&cycle.id).await.unwrap().status, CycleStatus::PendingValidation);
    assert_eq!(h.service.item("BSK001").await.unwrap().stage, Stage::PendingValidation);
    assert_eq!(h.service.dashboard().await.awaiting_signature, vec![record.id.clone()]);

    let err = h
        .service
        .submit_validation(&cycle.id, Checklist::uniform(true), "again", &qc())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "illegal_transition");
}

#[tokio::test]
async fn test_signature_must_acknowledge_record_hash() {
    let h = Harness::new();
    let ids = h.packaged(&["BSK001"], 2_000).await;
    let cycle = h.completed_cycle(&ids).await;
    let record = h
        .service
        .submit_validation(&cycle.id, Checklist::uniform(true), "ok", &qc())
        .await
        .unwrap();

    let err = h
        .service
        .sign_release(&record.id, &supervisor(), "deadbeef")
        .await
        .unwrap_err();
    assert!(matches!(err, CssdError::SignatureMismatch { ref provided, .. } if provided == "deadbeef"));
    assert_eq!(h.service.cycle(&cycle.id).await.unwrap().status, CycleStatus::PendingValidation);
    assert!(h.service.validation(&record.id).await.unwrap().signature.is_none());

    let err = h
        .service
        .sign_release(&record.id, &tech(), &record.content_hash)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "unauthorized");
}

#[tokio::test]
async fn test_signed_release_commits_everything_together() {
    let h = Harness::new();
    let (cycle, record) = h.released_cycle(&["BSK001", "ITR002"]).await;

    assert_eq!(cycle.status, CycleStatus::Validated);
    let signature = record.signature.as_ref().unwrap();
    assert_eq!(signature.signer, "QC-001");
    assert_eq!(signature.content_hash, record.content_hash);
    assert!(record.is_released());

    for id in ["BSK001", "ITR002"] {
        let item = h.service.item(id).await.unwrap();
        assert_eq!(item.stage, Stage::Validated);
        let release = item.release.unwrap();
        assert_eq!(release.lot_id, lot_id_for(&cycle.id, id));
        assert_eq!(release.validation_id, record.id);
        assert_eq!(h.service.origin_of(&release.lot_id).await.as_deref(), Some(cycle.id.as_str()));
    }

    let err = h
        .service
        .sign_release(&record.id, &qc(), &record.content_hash)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "illegal_transition");

    let trail = h.service.audit_trail(&EntityRef::Validation(record.id.clone())).await.unwrap();
    let kinds: Vec<&str> = trail
        .iter()
        .map(|e| match e.event {
            AuditEvent::ValidationSubmitted { .. } => "submitted",
            AuditEvent::ReleaseSigned { .. } => "signed",
            _ => "other",
        })
        .collect();
    assert_eq!(kinds, vec!["submitted", "signed"]);
}

#[tokio::test]
async fn test_failed_check_rejects_load() {
    let h = Harness::new();
    let ids = h.packaged(&["BSK001", "BSK002"], 2_000).await;
    let cycle = h.completed_cycle(&ids).await;

    let mut checklist = Checklist::uniform(true);
    checklist.set(ChecklistItem::SterileBarrier, false);
    checklist.set(ChecklistItem::VisualInspection, false);
    let record = h
        .service
        .submit_validation(&cycle.id, checklist, "wrap torn", &qc())
        .await
        .unwrap();
    assert_eq!(record.outcome, Outcome::Rejected);
    assert_eq!(record.rejection_reason, Some(RejectionReason::SterileBarrier));
    assert!(!record.awaiting_signature());

    assert_eq!(h.service.cycle(&cycle.id).await.unwrap().status, CycleStatus::Rejected);
    for id in &ids {
        let item = h.service.item(id).await.unwrap();
        assert_eq!(item.stage, Stage::Cleaning);
        let stages: Vec<Stage> = item.history.iter().rev().take(2).map(|t| t.to).collect();
        assert_eq!(stages, vec![Stage::Cleaning, Stage::Rejected]);
    }

    // a rejected cycle never reaches a patient
    let err = h
        .service
        .link_pack_to_procedure(
            &lot_id_for(&cycle.id, "BSK001"),
            &cycle.id,
            "PROC-1",
            "PAT-1",
            context(),
            &tech(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CssdError::UnknownCycle { ref status, .. } if status == "rejected"));
    assert_eq!(h.service.metrics().get_stats().loads_rejected, 1);
}

#[tokio::test]
async fn test_reject_load_requires_reason() {
    let h = Harness::new();
    let ids = h.packaged(&["BSK001"], 2_000).await;
    let cycle = h.completed_cycle(&ids).await;
    let manager = Operator::new("MGR-001", cssd_trace::Role::Manager);

    let err = h.service.reject_load(&cycle.id, None, "bad", &manager).await.unwrap_err();
    assert_eq!(err.kind(), "missing_reason");
    let err = h
        .service
        .reject_load(&cycle.id, Some(RejectionReason::Other), "  ", &manager)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "missing_reason");
    assert_eq!(h.service.cycle(&cycle.id).await.unwrap().status, CycleStatus::PendingValidation);

    let record = h
        .service
        .reject_load(&cycle.id, Some(RejectionReason::Other), "label smudged by condensate", &manager)
        .await
        .unwrap();
    assert_eq!(record.rejection_reason, Some(RejectionReason::Other));
    assert_eq!(record.comments, "label smudged by condensate");
    assert_eq!(h.service.item("BSK001").await.unwrap().stage, Stage::Cleaning);

    let err = h
        .service
        .reject_load(&cycle.id, Some(RejectionReason::BiologicalIndicatorFailure), "", &manager)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "illegal_transition");
}

#[tokio::test]
async fn test_reprocessed_item_gets_a_new_lot() {
    let h = Harness::new();
    let ids = h.packaged(&["BSK001"], 2_000).await;
    let cycle = h.completed_cycle(&ids).await;
    h.service
        .reject_load(&cycle.id, Some(RejectionReason::ChemicalIndicatorFailure), "", &qc())
        .await
        .unwrap();

    // back through packaging and a second cycle
    let op = tech();
    h.service.advance("BSK001", Stage::Packaging, &op).await.unwrap();
    h.service.record_inspection("BSK001", true, None, &op).await.unwrap();
    h.service.complete_packaging("BSK001", 2_000, &op).await.unwrap();
    let second = h.completed_cycle(&ids).await;
    assert_ne!(second.id, cycle.id);

    let record = h
        .service
        .submit_validation(&second.id, Checklist::uniform(true), "", &qc())
        .await
        .unwrap();
    h.service.sign_release(&record.id, &qc(), &record.content_hash).await.unwrap();
    let release = h.service.item("BSK001").await.unwrap().release.unwrap();
    assert_eq!(release.lot_id, lot_id_for(&second.id, "BSK001"));
}

#[tokio::test]
async fn test_rejection_supersedes_pending_approval() {
    let h = Harness::new();
    let ids = h.packaged(&["BSK001"], 2_000).await;
    let cycle = h.completed_cycle(&ids).await;

    let approval = h
        .service
        .submit_validation(&cycle.id, Checklist::uniform(true), "indicators ok", &qc())
        .await
        .unwrap();
    let rejection = h
        .service
        .reject_load(&cycle.id, Some(RejectionReason::BiologicalIndicatorFailure), "BI positive", &supervisor())
        .await
        .unwrap();

    let approval = h.service.validation(&approval.id).await.unwrap();
    assert_eq!(approval.superseded_by.as_deref(), Some(rejection.id.as_str()));
    assert!(!approval.awaiting_signature());
    assert!(h.service.dashboard().await.awaiting_signature.is_empty());
    assert_eq!(h.service.cycle(&cycle.id).await.unwrap().status, CycleStatus::Rejected);

    let err = h
        .service
        .sign_release(&approval.id, &qc(), &approval.content_hash)
        .await
        .unwrap_err();
    assert!(matches!(err, CssdError::IllegalTransition { ref from, .. } if from == "superseded"));
    assert_eq!(h.service.item("BSK001").await.unwrap().stage, Stage::Cleaning);

    let trail = h
        .service
        .audit_trail(&EntityRef::Validation(approval.id.clone()))
        .await
        .unwrap();
    assert!(matches!(
        &trail.last().unwrap().event,
        AuditEvent::ValidationSuperseded { superseded_by, .. } if *superseded_by == rejection.id
    ));
}

#[tokio::test]
async fn test_failed_journal_write_leaves_rejection_uncommitted() {
    let h = Harness::new();
    let ids = h.packaged(&["BSK001", "BSK002"], 2_000).await;
    let cycle = h.completed_cycle(&ids).await;
    let written = h.service.journal_entries().await.unwrap().len();

    h.journal.set_failing(true);
    let err = h
        .service
        .reject_load(&cycle.id, Some(RejectionReason::PressureDeviation), "", &qc())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "journal_error");
    h.journal.set_failing(false);

    assert_eq!(h.service.journal_entries().await.unwrap().len(), written);
    assert_eq!(h.service.cycle(&cycle.id).await.unwrap().status, CycleStatus::PendingValidation);
    assert!(h.service.validations().await.is_empty());
    for id in &ids {
        assert_eq!(h.service.item(id).await.unwrap().stage, Stage::PendingValidation);
    }

    // the retry commits the record, the rejection and both item steps together
    h.service
        .reject_load(&cycle.id, Some(RejectionReason::PressureDeviation), "", &qc())
        .await
        .unwrap();
    let entries = h.service.journal_entries().await.unwrap();
    assert_eq!(entries.len(), written + 2 + 2 * ids.len());
    let sequences: Vec<u64> = entries[written..].iter().map(|e| e.sequence).collect();
    assert!(sequences.windows(2).all(|w| w[1] == w[0] + 1));
    for id in &ids {
        let item = h.service.item(id).await.unwrap();
        assert_eq!(item.stage, Stage::Cleaning);
        assert_eq!(item.version, item.history.len() as u64 + 1);
    }
}

#[tokio::test]
async fn test_failed_journal_write_leaves_release_unsigned() {
    let h = Harness::new();
    let ids = h.packaged(&["BSK001"], 2_000).await;
    let cycle = h.completed_cycle(&ids).await;
    let record = h
        .service
        .submit_validation(&cycle.id, Checklist::uniform(true), "", &qc())
        .await
        .unwrap();
    let lot = lot_id_for(&cycle.id, "BSK001");

    h.journal.set_failing(true);
    let err = h
        .service
        .sign_release(&record.id, &qc(), &record.content_hash)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "journal_error");
    h.journal.set_failing(false);

    assert!(h.service.validation(&record.id).await.unwrap().awaiting_signature());
    assert_eq!(h.service.cycle(&cycle.id).await.unwrap().status, CycleStatus::PendingValidation);
    assert_eq!(h.service.origin_of(&lot).await, None);
    assert!(h.service.item("BSK001").await.unwrap().release.is_none());

    h.service
        .sign_release(&record.id, &qc(), &record.content_hash)
        .await
        .unwrap();
    assert_eq!(h.service.origin_of(&lot).await.as_deref(), Some(cycle.id.as_str()));
}
