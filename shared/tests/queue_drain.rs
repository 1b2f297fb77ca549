mod common;

use std::sync::Arc;
use std::time::Duration;

use bombus_shared::capabilities::kv::{KvBackend, MemoryKv};
use bombus_shared::offline_store::DEFAULT_STORAGE_KEY;
use bombus_shared::outbox::{OutboxError, MAX_QUEUED_REQUESTS};
use bombus_shared::{
    DispatchError, DispatcherState, DrainStop, Notification, OperationKind, QueueStore,
    QueuedRequest, StatusReporter, SubmitOutcome,
};
use common::{delete, drain_notes, harness, ScriptedExecutor};
use proptest::prelude::*;

fn ids(calls: &[&str]) -> Vec<String> {
    calls.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn offline_submit_is_persisted_before_returning() {
    let h = harness(ScriptedExecutor::new(), Arc::new(MemoryKv::new()));

    let before = h.dispatcher.queue_len().await;
    let outcome = h.dispatcher.submit(delete("A")).await.unwrap();
    let SubmitOutcome::Queued(id) = outcome else {
        panic!("expected the request to be queued");
    };

    assert_eq!(h.dispatcher.queue_len().await, before + 1);
    let persisted = h.store.load();
    assert_eq!(persisted.len(), 1);
    assert_eq!(persisted[0].id, id);
    assert_eq!(persisted[0].retry_count, 0);
    assert_eq!(persisted[0].max_retries, 3);
}

#[tokio::test]
async fn online_fast_path_never_touches_the_store() {
    let backend = Arc::new(MemoryKv::new());
    let executor = ScriptedExecutor::new();
    let h = harness(executor.clone(), backend.clone());
    h.monitor.set_online(true);

    let outcome = h.dispatcher.submit(delete("A")).await.unwrap();
    assert!(matches!(outcome, SubmitOutcome::Applied(_)));
    assert_eq!(h.dispatcher.queue_len().await, 0);
    assert_eq!(backend.get(h.store.key()).unwrap(), None);
    assert_eq!(executor.calls(), ids(&["A"]));
}

#[tokio::test]
async fn retry_then_tail() {
    let executor = ScriptedExecutor::new();
    executor.fail_times("A", 1);
    let h = harness(executor.clone(), Arc::new(MemoryKv::new()));
    h.dispatcher.submit(delete("A")).await.unwrap();
    h.dispatcher.submit(delete("B")).await.unwrap();
    h.monitor.set_online(true);
    let mut notes = h.dispatcher.subscribe();

    let first = h.dispatcher.drain().await;
    assert_eq!(first.stopped, DrainStop::RetryScheduled);
    assert_eq!(executor.calls(), ids(&["A"]));

    let queue = h.dispatcher.snapshot().await;
    assert_eq!(queue[0].operation, delete("B"));
    assert_eq!(queue[1].operation, delete("A"));
    assert_eq!(queue[1].retry_count, 1);
    assert_eq!(h.store.load(), queue, "store mirrors memory");

    let second = h.dispatcher.drain().await;
    assert_eq!(second.stopped, DrainStop::Emptied);
    assert_eq!(second.synced, 2);
    assert_eq!(executor.calls(), ids(&["A", "B", "A"]));

    let synced: Vec<_> = drain_notes(&mut notes)
        .into_iter()
        .filter_map(|n| match n {
            Notification::Synced { id, .. } => Some(id),
            _ => None,
        })
        .collect();
    assert_eq!(synced, vec![queue[0].id.clone(), queue[1].id.clone()]);
}

#[tokio::test]
async fn eviction_at_cap() {
    let executor = ScriptedExecutor::new();
    executor.fail_always("A");
    let h = harness(executor.clone(), Arc::new(MemoryKv::new()));
    h.dispatcher.submit(delete("A")).await.unwrap();
    h.monitor.set_online(true);
    let mut notes = h.dispatcher.subscribe();

    assert_eq!(h.dispatcher.drain().await.stopped, DrainStop::RetryScheduled);
    assert_eq!(h.dispatcher.drain().await.stopped, DrainStop::RetryScheduled);

    let third = h.dispatcher.drain().await;
    assert_eq!(third.evicted, 1);
    assert_eq!(third.stopped, DrainStop::Emptied);
    assert_eq!(h.dispatcher.queue_len().await, 0);
    assert!(h.store.load().is_empty());

    for _ in 0..3 {
        assert_eq!(h.dispatcher.drain().await.stopped, DrainStop::NothingQueued);
    }
    assert_eq!(executor.calls().len(), 3);

    let notes = drain_notes(&mut notes);
    let attempts: Vec<_> = notes
        .iter()
        .filter_map(|n| match n {
            Notification::RetryScheduled { attempt, max, .. } => Some((*attempt, *max)),
            _ => None,
        })
        .collect();
    assert_eq!(attempts, vec![(1, 3), (2, 3)]);
    assert!(notes.iter().any(|n| matches!(
        n,
        Notification::SyncFailed { operation: OperationKind::DeleteHive, message, .. }
            if message == "serviço indisponível"
    )));
    assert_eq!(notes.last(), Some(&Notification::AllSynchronized));
}

#[tokio::test]
async fn eviction_keeps_draining_the_rest() {
    let executor = ScriptedExecutor::new();
    executor.fail_always("A");
    let h = harness(executor.clone(), Arc::new(MemoryKv::new()));
    h.dispatcher.submit(delete("A")).await.unwrap();
    h.dispatcher.submit(delete("B")).await.unwrap();
    h.dispatcher.submit(delete("C")).await.unwrap();
    h.monitor.set_online(true);

    h.dispatcher.drain().await;
    h.dispatcher.drain().await;
    let last = h.dispatcher.drain().await;

    assert_eq!(last.stopped, DrainStop::Emptied);
    assert_eq!(executor.calls(), ids(&["A", "B", "C", "A", "A"]));
}

#[tokio::test]
async fn second_drain_while_draining_is_a_no_op() {
    let executor = ScriptedExecutor::gated();
    let h = harness(executor.clone(), Arc::new(MemoryKv::new()));
    h.dispatcher.submit(delete("A")).await.unwrap();
    h.dispatcher.submit(delete("B")).await.unwrap();
    h.monitor.set_online(true);

    let running = h.dispatcher.clone();
    let first = tokio::spawn(async move { running.drain().await });
    executor.wait_entered().await;

    assert_eq!(h.dispatcher.state(), DispatcherState::Draining);
    let second = h.dispatcher.drain().await;
    assert_eq!(second.stopped, DrainStop::AlreadyDraining);
    assert_eq!(second.remaining, 2);

    executor.release(2);
    let first = first.await.unwrap();
    assert_eq!(first.synced, 2);
    assert_eq!(executor.max_in_flight(), 1);
    assert_eq!(executor.calls(), ids(&["A", "B"]));
    assert_eq!(h.dispatcher.state(), DispatcherState::Idle);
}

#[tokio::test]
async fn losing_connectivity_mid_drain_stops_the_pass() {
    let executor = ScriptedExecutor::gated();
    let h = harness(executor.clone(), Arc::new(MemoryKv::new()));
    h.dispatcher.submit(delete("A")).await.unwrap();
    h.dispatcher.submit(delete("B")).await.unwrap();
    h.monitor.set_online(true);
    let mut notes = h.dispatcher.subscribe();

    let running = h.dispatcher.clone();
    let pass = tokio::spawn(async move { running.drain().await });
    executor.wait_entered().await;
    h.monitor.set_online(false);
    executor.release(1);

    let report = pass.await.unwrap();
    assert_eq!(report.stopped, DrainStop::WentOffline);
    assert_eq!(report.synced, 1);
    assert_eq!(report.remaining, 1);
    assert!(!drain_notes(&mut notes).contains(&Notification::AllSynchronized));
}

#[tokio::test]
async fn manual_sync_on_empty_queue() {
    let executor = ScriptedExecutor::new();
    let h = harness(executor.clone(), Arc::new(MemoryKv::new()));
    h.monitor.set_online(true);
    let mut notes = h.dispatcher.subscribe();

    let report = h.dispatcher.manual_drain().await;
    assert_eq!(report.stopped, DrainStop::NothingQueued);
    assert!(executor.calls().is_empty());
    assert_eq!(drain_notes(&mut notes), vec![Notification::NothingToSync]);
}

#[tokio::test]
async fn manual_sync_rechecks_connectivity() {
    let executor = ScriptedExecutor::new();
    let h = harness(executor.clone(), Arc::new(MemoryKv::new()));
    h.dispatcher.submit(delete("A")).await.unwrap();

    let report = h.dispatcher.manual_drain().await;
    assert_eq!(report.stopped, DrainStop::Offline);
    assert!(executor.calls().is_empty());
}

#[tokio::test]
async fn full_queue_refuses_new_writes_and_survives_restart() {
    let backend = Arc::new(MemoryKv::new());
    let prefilled: Vec<QueuedRequest> = (0..MAX_QUEUED_REQUESTS)
        .map(|i| QueuedRequest::new(delete(&format!("h{i}")), 3))
        .collect();
    QueueStore::new(backend.clone(), DEFAULT_STORAGE_KEY)
        .unwrap()
        .try_save(&prefilled)
        .unwrap();

    let h = harness(ScriptedExecutor::new(), backend.clone());
    assert_eq!(h.dispatcher.queue_len().await, MAX_QUEUED_REQUESTS);

    let refused = h.dispatcher.submit(delete("overflow")).await;
    assert!(matches!(
        refused,
        Err(DispatchError::Queue(OutboxError::QueueFull { max })) if max == MAX_QUEUED_REQUESTS
    ));
    assert_eq!(h.dispatcher.queue_len().await, MAX_QUEUED_REQUESTS);

    let restarted = harness(ScriptedExecutor::new(), backend);
    assert_eq!(restarted.dispatcher.snapshot().await, prefilled);
}

#[tokio::test]
async fn flapping_connectivity_never_overlaps_drains() {
    let executor = ScriptedExecutor::gated();
    let h = harness(executor.clone(), Arc::new(MemoryKv::new()));
    for i in 0..3 {
        h.dispatcher.submit(delete(&format!("h{i}"))).await.unwrap();
    }
    let _listener = h.dispatcher.attach();

    h.monitor.set_online(true);
    executor.wait_entered().await;
    for _ in 0..5 {
        h.monitor.set_online(false);
        h.monitor.set_online(true);
    }
    assert_eq!(h.dispatcher.drain().await.stopped, DrainStop::AlreadyDraining);

    executor.release(3);
    tokio::time::timeout(Duration::from_secs(5), async {
        while h.dispatcher.queue_len().await > 0
            || h.dispatcher.state() == DispatcherState::Draining
        {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("queue should drain");

    assert_eq!(executor.max_in_flight(), 1);
    assert_eq!(executor.calls(), ids(&["h0", "h1", "h2"]));
}

#[tokio::test]
async fn clearing_refreshes_status_before_the_next_poll() {
    let h = harness(ScriptedExecutor::new(), Arc::new(MemoryKv::new()));
    h.dispatcher.submit(delete("A")).await.unwrap();
    h.dispatcher.submit(delete("B")).await.unwrap();

    let reporter = StatusReporter::spawn(h.dispatcher.clone(), Duration::from_secs(3600)).await;
    let mut status = reporter.subscribe();
    assert_eq!(reporter.current().pending, 2);

    let mut notes = h.dispatcher.subscribe();
    assert_eq!(h.dispatcher.clear().await, 2);
    assert_eq!(
        drain_notes(&mut notes),
        vec![Notification::QueueCleared { removed: 2 }]
    );

    tokio::time::timeout(Duration::from_secs(5), status.changed())
        .await
        .expect("status should refresh")
        .unwrap();
    assert_eq!(status.borrow().pending, 0);
}

#[tokio::test]
async fn corrupt_store_starts_empty() {
    let backend = Arc::new(MemoryKv::new());
    let key = bombus_shared::capabilities::kv::KvKey::new(
        bombus_shared::capabilities::kv::KeyNamespace::Outbox,
        "bombus-request-queue",
    )
    .unwrap();
    backend.set(&key, "[{\"broken\": ").unwrap();

    let h = harness(ScriptedExecutor::new(), backend);
    assert_eq!(h.dispatcher.queue_len().await, 0);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn fifo_drain(n in 1usize..12) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        let (calls, remaining, synced) = runtime.block_on(async {
            let executor = ScriptedExecutor::new();
            let h = harness(executor.clone(), Arc::new(MemoryKv::new()));
            for i in 0..n {
                h.dispatcher.submit(delete(&format!("h{i}"))).await.unwrap();
            }
            h.monitor.set_online(true);
            let report = h.dispatcher.drain().await;
            (executor.calls(), h.dispatcher.queue_len().await, report.synced)
        });

        let expected: Vec<String> = (0..n).map(|i| format!("h{i}")).collect();
        prop_assert_eq!(calls, expected);
        prop_assert_eq!(remaining, 0);
        prop_assert_eq!(synced, n);
    }

    #[test]
    fn retry_count_never_exceeds_cap(failures in 0u32..6, drains in 1usize..8) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        let snapshots = runtime.block_on(async {
            let executor = ScriptedExecutor::new();
            executor.fail_times("A", failures);
            let h = harness(executor, Arc::new(MemoryKv::new()));
            h.dispatcher.submit(delete("A")).await.unwrap();
            h.monitor.set_online(true);

            let mut seen = Vec::new();
            for _ in 0..drains {
                h.dispatcher.drain().await;
                seen.push(h.dispatcher.snapshot().await);
            }
            seen
        });

        for snapshot in snapshots {
            for entry in snapshot {
                prop_assert!(entry.retry_count < entry.max_retries);
            }
        }
    }
}
