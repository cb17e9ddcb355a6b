// Pack-to-patient links, forward/backward tracing and recall impact

mod fixtures;

use chrono::Duration;
use std::collections::BTreeSet;

use cssd_trace::journal::AuditEvent;
use cssd_trace::{lot_id_for, CssdError, EntityRef, ExpiryStatus, ProcedureContext};
use fixtures::{context, tech, Harness};

#[tokio::test]
async fn test_link_requires_validated_cycle() {
    let h = Harness::new();
    let err = h
        .service
        .link_pack_to_procedure("SP-X-1", "AC001-2026-9999", "PROC-1", "PAT-1", context(), &tech())
        .await
        .unwrap_err();
    assert!(matches!(err, CssdError::UnknownCycle { ref status, .. } if status == "unknown"));

    let ids = h.packaged(&["BSK001"], 2_000).await;
    let cycle = h.completed_cycle(&ids).await;
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
    assert!(matches!(err, CssdError::UnknownCycle { ref status, .. } if status == "pending_validation"));
    assert!(h.service.recall_impact(&cycle.id).await.is_empty());
}

#[tokio::test]
async fn test_link_validates_required_fields() {
    let h = Harness::new();
    let (cycle, _) = h.released_cycle(&["BSK001"]).await;
    let lot = lot_id_for(&cycle.id, "BSK001");

    let err = h
        .service
        .link_pack_to_procedure(&lot, &cycle.id, "PROC-1", " ", context(), &tech())
        .await
        .unwrap_err();
    assert!(matches!(err, CssdError::Validation { ref field, .. } if field == "patient_id"));

    let no_surgeon = ProcedureContext {
        surgeon: String::new(),
        ..context()
    };
    let err = h
        .service
        .link_pack_to_procedure(&lot, &cycle.id, "PROC-1", "PAT-1", no_surgeon, &tech())
        .await
        .unwrap_err();
    assert!(matches!(err, CssdError::Validation { ref field, .. } if field == "surgeon"));
}

#[tokio::test]
async fn test_link_is_idempotent_and_journaled() {
    let h = Harness::new();
    let (cycle, _) = h.released_cycle(&["BSK001"]).await;
    let lot = lot_id_for(&cycle.id, "BSK001");

    let first = h
        .service
        .link_pack_to_procedure(&lot, &cycle.id, "PROC-1", "PAT-1", context(), &tech())
        .await
        .unwrap();
    assert_eq!(first.operating_room, "OR-2");
    assert_eq!(first.linked_by, "TECH-001");

    let again = h
        .service
        .link_pack_to_procedure(&lot.to_lowercase(), &cycle.id, "PROC-1", "PAT-1", context(), &tech())
        .await
        .unwrap();
    assert_eq!(again, first);
    assert_eq!(h.service.trace_forward_from_cycle(&cycle.id).await.count(), 1);

    let trail = h
        .service
        .audit_trail(&EntityRef::Procedure("PROC-1".to_string()))
        .await
        .unwrap();
    assert_eq!(trail.len(), 1);
    assert!(matches!(&trail[0].event, AuditEvent::PackLinked { link } if link.lot_id == lot));
}

#[tokio::test]
async fn test_lot_and_procedure_bindings_are_exclusive() {
    let h = Harness::new();
    let (first, _) = h.released_cycle(&["BSK001"]).await;
    let (second, _) = h.released_cycle(&["BSK002"]).await;
    let lot = lot_id_for(&first.id, "BSK001");

    let err = h
        .service
        .link_pack_to_procedure(&lot, &second.id, "PROC-1", "PAT-1", context(), &tech())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "validation_error");

    h.service
        .link_pack_to_procedure(&lot, &first.id, "PROC-1", "PAT-1", context(), &tech())
        .await
        .unwrap();
    let err = h
        .service
        .link_pack_to_procedure(
            &lot_id_for(&second.id, "BSK002"),
            &second.id,
            "PROC-1",
            "PAT-2",
            context(),
            &tech(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "validation_error");
}

#[tokio::test]
async fn test_lot_without_release_is_refused() {
    let h = Harness::new();
    let (cycle, _) = h.released_cycle(&["BSK010"]).await;

    for lot in ["sp-legacy-77", "BSK-TYPO-999", "SP-AC001-2026-0001-BSK011"] {
        let err = h
            .service
            .link_pack_to_procedure(lot, &cycle.id, "PROC-9", "PAT-9", context(), &tech())
            .await
            .unwrap_err();
        assert!(matches!(err, CssdError::Validation { ref field, .. } if field == "lot_id"), "{lot}: {err}");
        assert_eq!(h.service.origin_of(lot).await, None);
    }

    let impact = h.service.recall_impact(&cycle.id).await;
    assert_eq!(impact.lots, BTreeSet::from([lot_id_for(&cycle.id, "BSK010")]));
    assert!(impact.procedures.is_empty());
}

#[tokio::test]
async fn test_expired_lot_cannot_be_linked() {
    let h = Harness::new();
    let (cycle, _) = h.released_cycle(&["BSK001", "BSK002"]).await;
    let fresh = lot_id_for(&cycle.id, "BSK001");
    let stale = lot_id_for(&cycle.id, "BSK002");

    let origin = h.service.lot(&fresh).await.unwrap();
    assert_eq!(origin.expires_at - origin.released_at, Duration::days(180));
    let release = h.service.item("BSK001").await.unwrap().release.unwrap();
    assert_eq!(release.expires_at, origin.expires_at);

    h.clock.set(origin.expires_at - Duration::seconds(1));
    h.service
        .link_pack_to_procedure(&fresh, &cycle.id, "PROC-1", "PAT-1", context(), &tech())
        .await
        .unwrap();

    h.clock.set(origin.expires_at);
    let err = h
        .service
        .link_pack_to_procedure(&stale, &cycle.id, "PROC-2", "PAT-2", context(), &tech())
        .await
        .unwrap_err();
    assert!(matches!(err, CssdError::Validation { ref reason, .. } if reason.contains("expired")));

    // an already recorded use stays readable after expiry
    h.service
        .link_pack_to_procedure(&fresh, &cycle.id, "PROC-1", "PAT-1", context(), &tech())
        .await
        .unwrap();
    assert_eq!(h.service.trace_forward_from_cycle(&cycle.id).await.count(), 1);
}

#[tokio::test]
async fn test_expiring_packs_window() {
    let h = Harness::new();
    let (cycle, _) = h.released_cycle(&["BSK001", "BSK002"]).await;
    let used = lot_id_for(&cycle.id, "BSK001");
    let unused = lot_id_for(&cycle.id, "BSK002");
    h.service
        .link_pack_to_procedure(&used, &cycle.id, "PROC-1", "PAT-1", context(), &tech())
        .await
        .unwrap();
    let expires_at = h.service.lot(&unused).await.unwrap().expires_at;
    let window = Duration::days(30);

    h.clock.set(expires_at - window - Duration::seconds(1));
    assert!(h.service.expiring_packs(window).await.is_empty());
    assert!(h.service.dashboard().await.expiring_packs.is_empty());

    h.clock.set(expires_at - window);
    let expiring = h.service.expiring_packs(window).await;
    assert_eq!(expiring.len(), 1, "linked packs are never flagged");
    assert_eq!(expiring[0].lot_id, unused);
    assert_eq!(expiring[0].status, ExpiryStatus::ExpiringSoon);
    assert_eq!(h.service.dashboard().await.expiring_packs, expiring);

    h.clock.set(expires_at);
    let expiring = h.service.expiring_packs(window).await;
    assert_eq!(expiring[0].status, ExpiryStatus::Expired);
}

#[tokio::test]
async fn test_forward_backward_and_recall() {
    let h = Harness::new();
    let (cycle_a, _) = h.released_cycle(&["BSK001", "BSK002", "BSK003"]).await;
    let (cycle_b, _) = h.released_cycle(&["ITR010"]).await;
    let op = tech();

    let links = [
        (lot_id_for(&cycle_a.id, "BSK001"), &cycle_a.id, "PROC-1", "PAT-1"),
        (lot_id_for(&cycle_a.id, "BSK002"), &cycle_a.id, "PROC-2", "PAT-2"),
        (lot_id_for(&cycle_b.id, "ITR010"), &cycle_b.id, "PROC-2", "PAT-2"),
    ];
    for (lot, cycle, procedure, patient) in &links {
        h.service
            .link_pack_to_procedure(lot, cycle, procedure, patient, context(), &op)
            .await
            .unwrap();
    }

    let forward: BTreeSet<String> = h
        .service
        .trace_forward_from_cycle(&cycle_a.id)
        .await
        .map(|l| l.procedure_id)
        .collect();
    assert_eq!(forward, BTreeSet::from(["PROC-1".to_string(), "PROC-2".to_string()]));

    let backward: BTreeSet<String> = h
        .service
        .trace_backward_from_patient("PAT-2")
        .await
        .map(|p| p.cycle_id)
        .collect();
    assert_eq!(backward, BTreeSet::from([cycle_a.id.clone(), cycle_b.id.clone()]));

    let impact = h.service.recall_impact(&cycle_a.id).await;
    assert_eq!(impact.lots.len(), 3, "every released lot is in scope, linked or not");
    assert_eq!(impact.procedures.len(), 2);
    assert_eq!(impact.patients, BTreeSet::from(["PAT-1".to_string(), "PAT-2".to_string()]));

    let impact_b = h.service.recall_impact(&cycle_b.id).await;
    assert_eq!(impact_b.patients, BTreeSet::from(["PAT-2".to_string()]));
    assert_eq!(h.service.trace_backward_from_patient("PAT-404").await.count(), 0);
}
