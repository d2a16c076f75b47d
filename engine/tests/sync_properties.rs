//! End-to-end properties of the sync engine: idempotency, conflict
//! determinism, cursor monotonicity and the stock invariant under
//! concurrency.

use proptest::prelude::*;
use serde_json::json;
use shopsync_engine::{
    Action, BatchContext, ConflictPolicy, EngineConfig, EntityKind, EntityType, ErrorKind,
    ManualClock, MemoryStore, OperationResult, Outcome, RetryConfig, SyncBatch, SyncCoordinator,
    SyncOperation, SyncStore,
};
use std::sync::Arc;
use std::time::Duration;

const BIZ: &str = "shop-1";

fn fast_retry(attempts: u32) -> RetryConfig {
    RetryConfig::new(attempts)
        .with_initial_delay(Duration::ZERO)
        .with_max_delay(Duration::ZERO)
}

fn setup(config: EngineConfig) -> (Arc<MemoryStore>, Arc<ManualClock>, Arc<SyncCoordinator>) {
    let store = Arc::new(MemoryStore::new());
    store.register_business(BIZ);
    let clock = Arc::new(ManualClock::new(10_000));
    let coordinator = Arc::new(SyncCoordinator::with_config(
        store.clone(),
        clock.clone(),
        config,
    ));
    (store, clock, coordinator)
}

fn default_setup() -> (Arc<MemoryStore>, Arc<ManualClock>, Arc<SyncCoordinator>) {
    setup(EngineConfig::default().with_retry(fast_retry(3)))
}

async fn submit(
    coordinator: &SyncCoordinator,
    device: &str,
    ops: Vec<SyncOperation>,
) -> Vec<OperationResult> {
    coordinator
        .process_batch(
            &BatchContext::new(BIZ, device, "clerk"),
            SyncBatch::new(BIZ, device, ops),
        )
        .await
        .unwrap()
        .results
}

fn product(op_id: &str, id: &str) -> SyncOperation {
    SyncOperation::new(
        op_id,
        EntityType::Product,
        Action::Create,
        json!({"id": id, "name": "Maize flour", "unit_price": 4.5}),
        1,
        "",
    )
}

fn adjust(op_id: &str, product_id: &str, delta: i64) -> SyncOperation {
    SyncOperation::new(
        op_id,
        EntityType::StockAdjustment,
        Action::Create,
        json!({"product_id": product_id, "delta": delta, "reason": "sale"}),
        100,
        "",
    )
}

fn sale(op_id: &str, id: &str, total: f64, ts: u64) -> (SyncOperation, SyncOperation) {
    let payload = json!({"id": id, "total": total, "payment_method": "cash"});
    (
        SyncOperation::new(op_id, EntityType::Sale, Action::Create, payload.clone(), ts, ""),
        SyncOperation::new(op_id, EntityType::Sale, Action::Update, payload, ts, ""),
    )
}

fn outcomes(results: &[OperationResult]) -> Vec<Outcome> {
    results.iter().map(|r| r.outcome).collect()
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn scenario_stock_cannot_go_negative() {
    let (_, _, coordinator) = default_setup();
    submit(
        &coordinator,
        "till-a",
        vec![product("op-p", "p-1"), adjust("op-0", "p-1", 5)],
    )
    .await;

    let results = submit(
        &coordinator,
        "till-a",
        vec![adjust("op-1", "p-1", -3), adjust("op-2", "p-1", -4)],
    )
    .await;

    assert_eq!(outcomes(&results), vec![Outcome::Applied, Outcome::Rejected]);
    assert_eq!(results[1].error_kind, Some(ErrorKind::InvariantViolation));
    assert_eq!(coordinator.stock_quantity(BIZ, "p-1").await.unwrap(), 2);
}

#[tokio::test]
async fn scenario_resubmitted_batch_is_duplicate() {
    let (store, _, coordinator) = default_setup();
    submit(
        &coordinator,
        "till-a",
        vec![product("op-p", "p-1"), adjust("op-0", "p-1", 5)],
    )
    .await;

    let batch = vec![adjust("op-1", "p-1", -3), adjust("op-2", "p-1", -4)];
    let first = submit(&coordinator, "till-a", batch.clone()).await;
    let history_before = coordinator.stock_history(BIZ, "p-1", None).await.unwrap();

    let second = submit(&coordinator, "till-a", batch).await;

    assert_eq!(outcomes(&second), vec![Outcome::Duplicate, Outcome::Duplicate]);
    assert_eq!(second[0].original_outcome, Some(Outcome::Applied));
    assert_eq!(second[1].original_outcome, Some(Outcome::Rejected));
    for (replay, original) in second.iter().zip(&first) {
        assert_eq!(replay.server_timestamp, original.server_timestamp);
        assert_eq!(replay.server_state, original.server_state);
        assert_eq!(replay.reason, original.reason);
    }

    assert_eq!(coordinator.stock_quantity(BIZ, "p-1").await.unwrap(), 2);
    let history_after = coordinator.stock_history(BIZ, "p-1", None).await.unwrap();
    assert_eq!(history_before, history_after);
    assert_eq!(store.recorded_results(BIZ), 4);
}

#[tokio::test]
async fn scenario_late_stale_update_conflicts() {
    let (_, clock, coordinator) = default_setup();
    let (create, _) = sale("op-c", "s-1", 10.0, 9_900);
    submit(&coordinator, "till-a", vec![create]).await;

    // A's edit at 10_100 reaches the server at 10_200.
    clock.set(10_200);
    let (_, update_a) = sale("op-a", "s-1", 12.0, 10_100);
    let results = submit(&coordinator, "till-a", vec![update_a]).await;
    assert_eq!(results[0].outcome, Outcome::Applied);
    let before = coordinator
        .entity(BIZ, EntityKind::Sale, "s-1")
        .await
        .unwrap()
        .unwrap();

    clock.advance(60_000);
    let (_, update_b) = sale("op-b", "s-1", 9.0, 10_090);
    let results = submit(&coordinator, "till-b", vec![update_b]).await;

    assert_eq!(results[0].outcome, Outcome::Conflict);
    let after = coordinator
        .entity(BIZ, EntityKind::Sale, "s-1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(after, before);
    assert_eq!(
        results[0].server_state,
        Some(shopsync_engine::ServerState::Entity(before))
    );
}

#[tokio::test]
async fn scenario_unsynced_device_sees_pending_changes() {
    let (_, _, coordinator) = default_setup();
    let results = submit(
        &coordinator,
        "till-a",
        vec![
            sale("op-1", "s-1", 1.0, 10).0,
            sale("op-2", "s-2", 2.0, 11).0,
            SyncOperation::new(
                "op-3",
                EntityType::Expense,
                Action::Create,
                json!({"id": "e-1", "amount": 30, "category": "transport"}),
                12,
                "",
            ),
        ],
    )
    .await;
    assert!(results.iter().all(|r| r.outcome == Outcome::Applied));

    let b = coordinator.device_status(BIZ, "till-b").await.unwrap();
    assert_eq!(b.last_sync_time, None);
    assert!(b.pending_count >= 3);

    let status = coordinator.sync_status(BIZ).await.unwrap();
    assert_eq!(status.unsynced_pending_count, 3);
    assert_eq!(status.devices["till-a"].pending_count, 0);
    assert!(!status.devices.contains_key("till-b"));
}

// ============================================================================
// Conflict Determinism
// ============================================================================

#[tokio::test]
async fn older_update_conflicts_newer_applies_under_timestamp_policies() {
    for policy in [ConflictPolicy::ClientTimestamp, ConflictPolicy::ServerTimestamp] {
        let (_, clock, coordinator) =
            setup(EngineConfig::default().with_conflict_policy(policy));

        // Server time and client time coincide at creation.
        clock.set(20_000);
        let (create, _) = sale("op-c", "s-1", 10.0, 20_000);
        submit(&coordinator, "till-a", vec![create]).await;
        let t0 = coordinator
            .entity(BIZ, EntityKind::Sale, "s-1")
            .await
            .unwrap()
            .unwrap();

        let (_, older) = sale("op-old", "s-1", 1.0, 19_999);
        let results = submit(&coordinator, "till-b", vec![older]).await;
        assert_eq!(results[0].outcome, Outcome::Conflict, "{}", policy);
        let unchanged = coordinator
            .entity(BIZ, EntityKind::Sale, "s-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(unchanged, t0);

        let (_, newer) = sale("op-new", "s-1", 2.0, 20_001);
        let results = submit(&coordinator, "till-b", vec![newer]).await;
        assert_eq!(results[0].outcome, Outcome::Applied, "{}", policy);
        assert_eq!(results[0].version, Some(t0.version + 1));
    }
}

#[tokio::test]
async fn default_policy_measures_against_server_write_time() {
    let (_, clock, coordinator) = default_setup();

    // Device clock far behind the server when the sale is created.
    clock.set(10_000);
    let (create, _) = sale("op-c", "s-1", 10.0, 100);
    submit(&coordinator, "till-a", vec![create]).await;
    let t0 = coordinator
        .entity(BIZ, EntityKind::Sale, "s-1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!((t0.last_modified, t0.client_modified), (10_000, 100));

    clock.set(20_000);
    let (_, update) = sale("op-u", "s-1", 11.0, 5_000);
    let results = submit(&coordinator, "till-b", vec![update]).await;
    assert_eq!(results[0].outcome, Outcome::Conflict);
    assert_eq!(results[0].version, Some(1));

    let unchanged = coordinator
        .entity(BIZ, EntityKind::Sale, "s-1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(unchanged, t0);
}

// ============================================================================
// Cursor
// ============================================================================

#[tokio::test]
async fn cursor_never_moves_backwards() {
    let (store, clock, coordinator) = default_setup();
    let mut observed = Vec::new();

    for i in 0..5u64 {
        clock.advance(1_000);
        let (create, _) = sale(&format!("op-{}", i), &format!("s-{}", i), 1.0, i);
        submit(&coordinator, "till-a", vec![create]).await;
        observed.push(coordinator.last_sync(BIZ, "till-a").await.unwrap());
    }

    // An older reception time cannot pull the cursor back.
    store.advance_cursor(BIZ, "till-a", 0).await.unwrap();
    observed.push(coordinator.last_sync(BIZ, "till-a").await.unwrap());

    assert!(observed.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(observed.last().copied().flatten(), Some(15_000));
}

#[tokio::test]
async fn batch_of_only_storage_failures_keeps_cursor() {
    let (store, clock, coordinator) = default_setup();
    submit(&coordinator, "till-a", vec![]).await;
    assert_eq!(coordinator.last_sync(BIZ, "till-a").await.unwrap(), Some(10_000));

    clock.advance(500);
    store.fail_next_writes(3);
    let results = submit(&coordinator, "till-a", vec![sale("op-1", "s-1", 1.0, 1).0]).await;
    assert!(results[0].retryable);
    assert_eq!(coordinator.last_sync(BIZ, "till-a").await.unwrap(), Some(10_000));
}

#[tokio::test]
async fn failed_cursor_write_is_reported() {
    let (store, clock, coordinator) = default_setup();
    let batch = |op_id: &str| {
        SyncBatch::new(BIZ, "till-a", vec![sale(op_id, op_id, 1.0, 20_000).0])
    };
    let ctx = BatchContext::new(BIZ, "till-a", "clerk");

    store.fail_next_cursor_writes(1);
    let response = coordinator.process_batch(&ctx, batch("s-1")).await.unwrap();
    assert_eq!(response.results[0].outcome, Outcome::Applied);
    assert!(!response.cursor_advanced);
    assert_eq!(coordinator.last_sync(BIZ, "till-a").await.unwrap(), None);

    clock.advance(100);
    let response = coordinator.process_batch(&ctx, batch("s-2")).await.unwrap();
    assert!(response.cursor_advanced);
    assert_eq!(coordinator.last_sync(BIZ, "till-a").await.unwrap(), Some(10_100));
}

// ============================================================================
// Storage Failures
// ============================================================================

#[tokio::test]
async fn transient_failure_is_retried_transparently() {
    let (store, _, coordinator) = default_setup();
    store.fail_next_writes(2);

    let results = submit(&coordinator, "till-a", vec![sale("op-1", "s-1", 1.0, 1).0]).await;
    assert_eq!(results[0].outcome, Outcome::Applied);
    assert_eq!(store.recorded_results(BIZ), 1);
}

#[tokio::test]
async fn exhausted_retries_are_not_recorded() {
    let (store, _, coordinator) = default_setup();
    store.fail_next_writes(3);

    let results = submit(&coordinator, "till-a", vec![sale("op-1", "s-1", 1.0, 1).0]).await;
    assert_eq!(results[0].outcome, Outcome::Rejected);
    assert_eq!(results[0].error_kind, Some(ErrorKind::Storage));
    assert!(results[0].retryable);
    assert_eq!(store.recorded_results(BIZ), 0);

    // The client retries with the same op_id and it goes through.
    let results = submit(&coordinator, "till-a", vec![sale("op-1", "s-1", 1.0, 1).0]).await;
    assert_eq!(results[0].outcome, Outcome::Applied);
}

// ============================================================================
// Concurrency
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_adjustments_never_oversell() {
    let (_, _, coordinator) = default_setup();
    submit(
        &coordinator,
        "till-0",
        vec![product("op-p", "p-1"), adjust("op-seed", "p-1", 50)],
    )
    .await;

    let tasks: Vec<_> = (0..20)
        .map(|i| {
            let coordinator = Arc::clone(&coordinator);
            tokio::spawn(async move {
                let device = format!("till-{}", i);
                submit(
                    &coordinator,
                    &device,
                    vec![adjust(&format!("op-{}", i), "p-1", -3)],
                )
                .await
                .remove(0)
            })
        })
        .collect();

    let mut applied = 0;
    for task in tasks {
        if task.await.unwrap().outcome == Outcome::Applied {
            applied += 1;
        }
    }

    assert_eq!(applied, 16);
    assert_eq!(coordinator.stock_quantity(BIZ, "p-1").await.unwrap(), 2);

    let history = coordinator
        .stock_history(BIZ, "p-1", Some(500))
        .await
        .unwrap();
    assert_eq!(history.len(), 17);
    assert!(history.iter().all(|m| m.resulting_quantity >= 0));
    let sequences: Vec<u64> = history.iter().rev().map(|m| m.sequence).collect();
    assert_eq!(sequences, (1..=17).collect::<Vec<_>>());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn coordinators_sharing_a_store_keep_the_invariant() {
    // Two coordinators model two server processes: they share storage but
    // not entity locks, so only the storage guards serialize them.
    let store = Arc::new(MemoryStore::new());
    store.register_business(BIZ);
    let config = EngineConfig::default().with_retry(fast_retry(50));
    let nodes: Vec<Arc<SyncCoordinator>> = (0..2)
        .map(|_| {
            Arc::new(SyncCoordinator::with_config(
                store.clone(),
                Arc::new(ManualClock::new(10_000)),
                config.clone(),
            ))
        })
        .collect();

    submit(
        &nodes[0],
        "till-0",
        vec![product("op-p", "p-1"), adjust("op-seed", "p-1", 15)],
    )
    .await;

    let tasks: Vec<_> = (0..24)
        .map(|i| {
            let node = Arc::clone(&nodes[i % 2]);
            tokio::spawn(async move {
                submit(
                    &node,
                    &format!("till-{}", i),
                    vec![adjust(&format!("op-{}", i), "p-1", -1)],
                )
                .await
                .remove(0)
            })
        })
        .collect();

    let mut applied = 0i64;
    for task in tasks {
        if task.await.unwrap().outcome == Outcome::Applied {
            applied += 1;
        }
    }

    let quantity = nodes[1].stock_quantity(BIZ, "p-1").await.unwrap();
    assert!(quantity >= 0);
    assert_eq!(quantity, 15 - applied);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_retransmissions_apply_once() {
    let (store, _, coordinator) = default_setup();
    submit(&coordinator, "till-a", vec![product("op-p", "p-1")]).await;

    let tasks: Vec<_> = (0..10)
        .map(|_| {
            let coordinator = Arc::clone(&coordinator);
            tokio::spawn(async move {
                submit(&coordinator, "till-a", vec![adjust("op-once", "p-1", 7)])
                    .await
                    .remove(0)
            })
        })
        .collect();

    let mut applied = 0;
    for task in tasks {
        let result = task.await.unwrap();
        match result.outcome {
            Outcome::Applied => applied += 1,
            Outcome::Duplicate => assert_eq!(result.original_outcome, Some(Outcome::Applied)),
            other => panic!("unexpected outcome {}", other),
        }
    }

    assert_eq!(applied, 1);
    assert_eq!(coordinator.stock_quantity(BIZ, "p-1").await.unwrap(), 7);
    assert_eq!(store.recorded_results(BIZ), 2);
}

// ============================================================================
// Property Tests
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn stock_never_negative_without_override(
        deltas in prop::collection::vec((-10i64..=10).prop_filter("non-zero", |d| *d != 0), 1..40),
        interval in 0u64..6,
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        runtime.block_on(async {
            let (_, _, coordinator) =
                setup(EngineConfig::default().with_checkpoint_interval(interval));
            submit(&coordinator, "till-a", vec![product("op-p", "p-1")]).await;

            let ops = deltas
                .iter()
                .enumerate()
                .map(|(i, d)| adjust(&format!("op-{}", i), "p-1", *d))
                .collect();
            let results = submit(&coordinator, "till-a", ops).await;

            let mut expected = 0i64;
            for (delta, result) in deltas.iter().zip(&results) {
                if expected + delta >= 0 {
                    prop_assert_eq!(result.outcome, Outcome::Applied);
                    expected += delta;
                } else {
                    prop_assert_eq!(result.outcome, Outcome::Rejected);
                }
            }

            let quantity = coordinator.stock_quantity(BIZ, "p-1").await.unwrap();
            prop_assert_eq!(quantity, expected);
            prop_assert!(quantity >= 0);
            Ok(())
        })?;
    }

    #[test]
    fn retransmission_is_idempotent(
        deltas in prop::collection::vec(1i64..=20, 1..10),
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        runtime.block_on(async {
            let (_, _, coordinator) = default_setup();
            submit(&coordinator, "till-a", vec![product("op-p", "p-1")]).await;

            let ops: Vec<_> = deltas
                .iter()
                .enumerate()
                .map(|(i, d)| adjust(&format!("op-{}", i), "p-1", *d))
                .collect();
            submit(&coordinator, "till-a", ops.clone()).await;
            let replay = submit(&coordinator, "till-a", ops).await;

            prop_assert!(replay.iter().all(|r| r.outcome == Outcome::Duplicate));
            let quantity = coordinator.stock_quantity(BIZ, "p-1").await.unwrap();
            prop_assert_eq!(quantity, deltas.iter().sum::<i64>());
            Ok(())
        })?;
    }
}
