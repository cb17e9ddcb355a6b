// Racing callers against the same item, autoclave and cycle

mod fixtures;

use futures::future::join_all;

use cssd_trace::{ContaminationLevel, CssdError, Registration, Stage};
use fixtures::{tech, Harness, AUTOCLAVE, PROGRAM};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_advances_with_same_version_have_one_winner() {
    let h = Harness::new();
    let id = h.register("BSK001", ContaminationLevel::Standard).await;
    let version = h.service.item(&id).await.unwrap().version;
    let op = tech();

    let results = join_all(
        (0..8).map(|_| h.service.advance_expecting(&id, Stage::Soaking, version, &op)),
    )
    .await;

    let winners = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(winners, 1);
    for result in results.iter().filter(|r| r.is_err()) {
        assert!(matches!(
            result,
            Err(CssdError::Conflict { expected, actual, .. }) if *expected == version && *actual == version + 1
        ));
    }

    let item = h.service.item(&id).await.unwrap();
    assert_eq!(item.stage, Stage::Soaking);
    assert_eq!(item.history.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_registration_of_one_scan() {
    let h = Harness::new();
    let op = tech();

    let results = join_all((0..6).map(|_| {
        h.service
            .register_item("BSK042", Registration::new("Surgery", ContaminationLevel::Medium, 4), &op)
    }))
    .await;

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| e.kind() == "validation_error"));
    assert_eq!(h.service.items().await.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_registration_of_distinct_scans() {
    let h = Harness::new();
    let op = tech();
    let scans: Vec<String> = (1..=20).map(|n| format!("ITR{n:03}")).collect();

    let results = join_all(scans.iter().map(|scan| {
        h.service
            .register_item(scan, Registration::new("Orthopedics", ContaminationLevel::Standard, 12), &op)
    }))
    .await;

    assert!(results.iter().all(|r| r.is_ok()));
    assert_eq!(h.service.items().await.len(), 20);
    assert_eq!(h.service.metrics().get_stats().items_registered, 20);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_one_autoclave_runs_one_cycle() {
    let h = Harness::new();
    let op = tech();
    let mut loads = Vec::new();
    for scan in ["BSK001", "BSK002", "BSK003"] {
        let ids = h.packaged(&[scan], 5_000).await;
        loads.push(h.service.build_load(AUTOCLAVE, &ids, &op).await.unwrap());
    }

    let results = join_all(loads.iter().map(|load| h.service.start_cycle(&load.id, PROGRAM, &op))).await;

    let started: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    assert_eq!(started.len(), 1);
    for err in results.iter().filter_map(|r| r.as_ref().err()) {
        assert!(matches!(err, CssdError::AutoclaveBusy { autoclave, .. } if autoclave == AUTOCLAVE));
    }
    assert_eq!(h.service.cycles().await.len(), 1);

    // losers keep their items on the load
    let loaded = h
        .service
        .items()
        .await
        .into_iter()
        .filter(|item| item.stage == Stage::Loaded)
        .count();
    assert_eq!(loaded, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_item_cannot_join_two_loads() {
    let h = Harness::new();
    let ids = h.packaged(&["BSK001"], 1_000).await;
    let op = tech();

    let results = join_all(
        ["AC-001", "AC-002", "AC-003"]
            .iter()
            .map(|autoclave| h.service.build_load(autoclave, &ids, &op)),
    )
    .await;

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    let item = h.service.item("BSK001").await.unwrap();
    assert_eq!(item.stage, Stage::Loaded);
    assert!(item.load_id.is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_duplicate_samples_record_once() {
    let h = Harness::new();
    let ids = h.packaged(&["BSK001"], 1_000).await;
    let op = tech();
    let load = h.service.build_load(AUTOCLAVE, &ids, &op).await.unwrap();
    let cycle = h.service.start_cycle(&load.id, PROGRAM, &op).await.unwrap();

    let (hold_start, _) = cycle.program.hold_window();
    let at = cycle.started_at + hold_start;
    h.clock.set(at);

    let results = join_all((0..5).map(|_| h.service.record_sample(&cycle.id, 135.5, 2.1, at))).await;
    assert!(results.iter().all(|r| r.is_ok()));

    let cycle = h.service.cycle(&cycle.id).await.unwrap();
    assert_eq!(cycle.samples.len(), 1);
}
