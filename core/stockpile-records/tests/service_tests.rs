mod common;

use common::{borrow, harness, harness_with, Borrower, START_MS};
use pretty_assertions::assert_eq;
use std::time::Duration;
use stockpile_records::{RecordError, Transaction, WriteState};
use stockpile_sync::mock::RemoteCall;
use stockpile_storage::StorageError;
use stockpile_sync::{RemoteChange, RemoteError, SyncError};
use stockpile_types::{namespaces, LocalId, OperationType, Payload};

fn stored(h: &common::Harness, id: &str) -> Option<Transaction> {
    h.engine
        .store()
        .get_by_id(namespaces::TRANSACTIONS, id)
        .unwrap()
}

// ── Create ───────────────────────────────────────────────────────

#[tokio::test]
async fn offline_create_is_pending_until_drained() {
    let h = harness(false);
    let txns = h.engine.transactions();

    let written = txns.create(borrow("drill-1", 2)).await.unwrap();
    assert_eq!(written.state, WriteState::Pending);

    let id = written.record.id.clone().unwrap();
    assert!(LocalId::is_local("txn", &id), "unexpected id {id}");
    assert!(id.starts_with(&format!("txn_{START_MS}_")));
    assert_eq!(stored(&h, &id), Some(written.record.clone()));
    assert_eq!(txns.pending_count().await.unwrap(), 1);
    assert_eq!(h.remote.call_count(), 0);

    h.network.set_online(true);
    let report = h.engine.sync_now().await;

    assert!(report.success);
    assert_eq!(report.synced_count, 1);
    assert_eq!(
        h.remote.calls(),
        vec![RemoteCall::Create {
            collection: namespaces::TRANSACTIONS.into(),
            id: Some(id.clone()),
            payload: Payload::from_json(&written.record).unwrap(),
        }]
    );
    assert_eq!(txns.pending_count().await.unwrap(), 0);
}

#[tokio::test]
async fn online_create_is_confirmed() {
    let h = harness(true);
    let txns = h.engine.transactions();

    let written = txns.create(borrow("drill-1", 1)).await.unwrap();
    assert_eq!(written.state, WriteState::Confirmed);

    let id = written.record.id.clone().unwrap();
    let remote: Transaction = h
        .remote
        .document(namespaces::TRANSACTIONS, &id)
        .unwrap()
        .decode()
        .unwrap();
    assert_eq!(remote, written.record);
    assert_eq!(stored(&h, &id), Some(written.record));
    assert_eq!(txns.pending_count().await.unwrap(), 0);
}

#[tokio::test]
async fn invalid_record_is_rejected_before_any_write() {
    let h = harness(true);
    let txns = h.engine.transactions();

    let err = txns.create(borrow("drill-1", 0)).await.unwrap_err();
    assert!(matches!(err, RecordError::Validation(ref msg) if msg.contains("quantity")));
    assert_eq!(h.remote.call_count(), 0);
    assert_eq!(h.engine.store().count(namespaces::TRANSACTIONS).unwrap(), 0);
    assert_eq!(txns.pending_count().await.unwrap(), 0);
}

#[tokio::test]
async fn transient_remote_failure_queues_the_create() {
    let h = harness(true);
    h.remote
        .fail_next(RemoteError::Network("connection reset".into()));
    let txns = h.engine.transactions();

    let written = txns.create(borrow("drill-1", 1)).await.unwrap();
    assert!(written.is_pending());
    let id = written.record.id.clone().unwrap();
    assert!(stored(&h, &id).is_some());

    let queued = h.engine.sync().pending_operations().await.unwrap();
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].op_type, OperationType::Create);
    assert_eq!(queued[0].document_id, id);
}

#[tokio::test]
async fn permanent_remote_rejection_rolls_back() {
    let h = harness(true);
    h.remote
        .fail_next(RemoteError::Validation("resource retired".into()));
    let txns = h.engine.transactions();

    let err = txns.create(borrow("drill-1", 1)).await.unwrap_err();
    assert!(matches!(err, RecordError::Remote(RemoteError::Validation(_))));
    assert_eq!(h.engine.store().count(namespaces::TRANSACTIONS).unwrap(), 0);
    assert_eq!(txns.pending_count().await.unwrap(), 0);
}

#[tokio::test]
async fn unauthenticated_create_is_queued() {
    let h = harness(true);
    h.auth.set(false);

    let written = h.engine.transactions().create(borrow("drill-1", 1)).await.unwrap();
    assert!(written.is_pending());
    assert_eq!(h.remote.call_count(), 0);
}

#[tokio::test]
async fn server_assigned_id_is_adopted() {
    let h = harness(true);
    h.remote.assign_server_ids(true);
    let txns = h.engine.transactions();

    let written = txns.create(borrow("drill-1", 1)).await.unwrap();
    assert_eq!(written.record.id.as_deref(), Some("remote_1"));
    assert_eq!(h.engine.store().count(namespaces::TRANSACTIONS).unwrap(), 1);
    assert_eq!(
        stored(&h, "remote_1").unwrap().id.as_deref(),
        Some("remote_1")
    );
}

#[tokio::test]
async fn drained_create_moves_to_the_assigned_id() {
    let h = harness(false);
    let txns = h.engine.transactions();

    let written = txns.create(borrow("drill-1", 1)).await.unwrap();
    let local_id = written.record.id.clone().unwrap();
    assert!(txns.get(&local_id).await.unwrap().is_some());

    h.remote.assign_server_ids(true);
    h.network.set_online(true);
    let report = h.engine.sync_now().await;
    assert!(report.success);
    assert_eq!(report.synced_count, 1);

    let moved = txns.get("remote_1").await.unwrap().unwrap();
    assert_eq!(moved.id.as_deref(), Some("remote_1"));
    assert_eq!(moved.resource_id, "drill-1");
    assert_eq!(stored(&h, "remote_1").unwrap().id.as_deref(), Some("remote_1"));
    assert_eq!(stored(&h, &local_id), None);
    assert_eq!(h.engine.store().count(namespaces::TRANSACTIONS).unwrap(), 1);

    h.network.set_online(false);
    assert_eq!(txns.get(&local_id).await.unwrap(), None);

    h.network.set_online(true);
    let mut record = moved;
    record.quantity = 3;
    record.touch();
    let updated = txns.update(record).await.unwrap();
    assert_eq!(updated.state, WriteState::Confirmed);
    let remote: Transaction = h
        .remote
        .document(namespaces::TRANSACTIONS, "remote_1")
        .unwrap()
        .decode()
        .unwrap();
    assert_eq!(remote.quantity, 3);
    assert_eq!(remote.id.as_deref(), Some("remote_1"));
}

#[tokio::test]
async fn failed_enqueue_rolls_back_the_local_write() {
    let mut record = borrow("drill-1", 1);
    record.id = Some("txn_fixed".into());
    let size = Payload::from_json(&record).unwrap().len();

    let mut config = common::config();
    config.store.max_bytes = Some((size * 3 / 2) as u64);
    let h = harness_with(config, false);
    let txns = h.engine.transactions();

    let err = txns.create(record).await.unwrap_err();
    assert!(
        matches!(
            err,
            RecordError::Sync(SyncError::Storage(StorageError::QuotaExceeded { .. }))
        ),
        "unexpected error {err:?}"
    );
    assert_eq!(stored(&h, "txn_fixed"), None);
    assert_eq!(h.engine.store().count(namespaces::TRANSACTIONS).unwrap(), 0);
    assert_eq!(txns.pending_count().await.unwrap(), 0);
    assert_eq!(txns.get("txn_fixed").await.unwrap(), None);
}

// ── Update ───────────────────────────────────────────────────────

#[tokio::test]
async fn update_requires_an_id() {
    let h = harness(true);
    let err = h
        .engine
        .transactions()
        .update(borrow("drill-1", 1))
        .await
        .unwrap_err();
    assert!(matches!(err, RecordError::MissingId));
}

#[tokio::test]
async fn online_update_is_confirmed() {
    let h = harness(true);
    let txns = h.engine.transactions();
    let mut record = txns.create(borrow("drill-1", 1)).await.unwrap().record;

    record.quantity = 4;
    record.touch();
    let written = txns.update(record.clone()).await.unwrap();

    assert_eq!(written.state, WriteState::Confirmed);
    let id = record.id.clone().unwrap();
    assert_eq!(stored(&h, &id).unwrap().quantity, 4);
    let remote: Transaction = h
        .remote
        .document(namespaces::TRANSACTIONS, &id)
        .unwrap()
        .decode()
        .unwrap();
    assert_eq!(remote.quantity, 4);
}

#[tokio::test]
async fn update_behind_queued_create_stays_queued() {
    let h = harness(false);
    let txns = h.engine.transactions();
    let mut record = txns.create(borrow("drill-1", 1)).await.unwrap().record;

    h.network.set_online(true);
    record.quantity = 3;
    let written = txns.update(record.clone()).await.unwrap();

    assert!(written.is_pending(), "must not overtake the queued create");
    assert_eq!(h.remote.call_count(), 0);
    assert_eq!(txns.pending_count().await.unwrap(), 2);

    let report = h.engine.sync_now().await;
    assert_eq!(report.synced_count, 2);
    let id = record.id.unwrap();
    let remote: Transaction = h
        .remote
        .document(namespaces::TRANSACTIONS, &id)
        .unwrap()
        .decode()
        .unwrap();
    assert_eq!(remote.quantity, 3);
}

#[tokio::test]
async fn rejected_update_restores_previous_value() {
    let h = harness(true);
    let txns = h.engine.transactions();
    let mut record = txns.create(borrow("drill-1", 1)).await.unwrap().record;

    h.remote
        .fail_next(RemoteError::PermissionDenied("locked".into()));
    record.quantity = 9;
    let err = txns.update(record.clone()).await.unwrap_err();
    assert!(matches!(err, RecordError::Remote(RemoteError::PermissionDenied(_))));

    let id = record.id.unwrap();
    assert_eq!(stored(&h, &id).unwrap().quantity, 1);
    assert_eq!(txns.get(&id).await.unwrap().unwrap().quantity, 1);
}

// ── Delete ───────────────────────────────────────────────────────

#[tokio::test]
async fn online_delete_is_confirmed() {
    let h = harness(true);
    let txns = h.engine.transactions();
    let id = txns.create(borrow("drill-1", 1)).await.unwrap().record.id.unwrap();

    assert_eq!(txns.delete(&id).await.unwrap(), WriteState::Confirmed);
    assert!(stored(&h, &id).is_none());
    assert!(h.remote.document(namespaces::TRANSACTIONS, &id).is_none());
    assert!(txns.get(&id).await.unwrap().is_none());
}

#[tokio::test]
async fn offline_delete_is_queued() {
    let h = harness(true);
    let txns = h.engine.transactions();
    let id = txns.create(borrow("drill-1", 1)).await.unwrap().record.id.unwrap();

    h.network.set_online(false);
    assert_eq!(txns.delete(&id).await.unwrap(), WriteState::Pending);
    assert!(stored(&h, &id).is_none());
    assert!(h.remote.document(namespaces::TRANSACTIONS, &id).is_some());

    h.network.set_online(true);
    let report = h.engine.sync_now().await;
    assert_eq!(report.synced_count, 1);
    assert!(h.remote.document(namespaces::TRANSACTIONS, &id).is_none());
}

#[tokio::test]
async fn deleting_unknown_remote_document_is_confirmed() {
    let h = harness(true);
    let state = h.engine.transactions().delete("txn_1_missingxx").await.unwrap();
    assert_eq!(state, WriteState::Confirmed);
}

// ── Reads ────────────────────────────────────────────────────────

#[tokio::test]
async fn offline_local_miss_is_not_found() {
    let h = harness(false);
    let found = h.engine.transactions().get("txn_1_abcdefghi").await.unwrap();
    assert!(found.is_none());
    assert_eq!(h.remote.call_count(), 0);
}

#[tokio::test]
async fn online_local_miss_fetches_and_stores() {
    let h = harness(true);
    let mut remote_record = borrow("saw-2", 5);
    remote_record.id = Some("txn_remote".into());
    h.remote.insert_document(
        namespaces::TRANSACTIONS,
        "txn_remote",
        Payload::from_json(&remote_record).unwrap(),
    );
    let txns = h.engine.transactions();

    let found = txns.get("txn_remote").await.unwrap();
    assert_eq!(found, Some(remote_record.clone()));
    assert_eq!(stored(&h, "txn_remote"), Some(remote_record));

    h.network.set_online(false);
    h.engine.cache().clear();
    assert!(txns.get("txn_remote").await.unwrap().is_some());
    assert_eq!(h.remote.call_count(), 1);
}

#[tokio::test]
async fn fetched_record_without_id_gets_the_key() {
    let h = harness(true);
    h.remote.insert_document(
        namespaces::TRANSACTIONS,
        "abc",
        Payload::from_json(&borrow("saw-2", 5)).unwrap(),
    );

    let found = h.engine.transactions().get("abc").await.unwrap().unwrap();
    assert_eq!(found.id.as_deref(), Some("abc"));
}

#[tokio::test]
async fn remote_read_failure_propagates() {
    let h = harness(true);
    h.remote.fail_next(RemoteError::Timeout);
    let err = h.engine.transactions().get("nope").await.unwrap_err();
    assert!(matches!(err, RecordError::Remote(RemoteError::Timeout)));
}

#[tokio::test]
async fn reads_are_served_from_cache() {
    let h = harness(false);
    let txns = h.engine.transactions();
    let id = txns.create(borrow("drill-1", 1)).await.unwrap().record.id.unwrap();

    assert!(h.engine.cache().contains(&format!("transactions:{id}")));
    let hits_before = h.engine.cache().stats().hits;
    txns.get(&id).await.unwrap().unwrap();
    assert_eq!(h.engine.cache().stats().hits, hits_before + 1);
}

#[tokio::test]
async fn list_returns_local_records() {
    let h = harness(false);
    let txns = h.engine.transactions();
    for resource in ["a", "b", "c"] {
        txns.create(borrow(resource, 1)).await.unwrap();
        h.clock.advance(Duration::from_millis(1));
    }

    let resources: Vec<String> = txns
        .list()
        .await
        .unwrap()
        .into_iter()
        .map(|t| t.resource_id)
        .collect();
    assert_eq!(resources, vec!["a", "b", "c"]);
}

#[tokio::test]
async fn pending_count_is_per_collection() {
    let h = harness(false);
    h.engine.transactions().create(borrow("drill-1", 1)).await.unwrap();
    h.engine
        .records::<Borrower>()
        .create(Borrower {
            id: None,
            name: "Bob".into(),
        })
        .await
        .unwrap();

    assert_eq!(h.engine.transactions().pending_count().await.unwrap(), 1);
    assert_eq!(h.engine.records::<Borrower>().pending_count().await.unwrap(), 1);
    assert_eq!(h.engine.sync().pending_count().await.unwrap(), 2);
}

// ── Remote changes ───────────────────────────────────────────────

async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn watch_applies_remote_changes() {
    let h = harness(true);
    let txns = h.engine.transactions();
    let handle = txns.watch().await.unwrap();

    let mut record = borrow("drill-1", 2);
    record.id = Some("txn_pushed".into());
    let delivered = h
        .remote
        .push_change(
            namespaces::TRANSACTIONS,
            RemoteChange::Upserted {
                id: "txn_pushed".into(),
                payload: Payload::from_json(&record).unwrap(),
            },
        )
        .await;
    assert_eq!(delivered, 1);
    settle().await;
    assert_eq!(stored(&h, "txn_pushed"), Some(record));

    h.remote
        .push_change(
            namespaces::TRANSACTIONS,
            RemoteChange::Removed {
                id: "txn_pushed".into(),
            },
        )
        .await;
    settle().await;
    assert!(stored(&h, "txn_pushed").is_none());

    h.remote.close_streams();
    settle().await;
    assert!(handle.is_finished());
}

#[tokio::test]
async fn remote_change_does_not_clobber_pending_write() {
    let h = harness(false);
    let txns = h.engine.transactions();
    let local = txns.create(borrow("drill-1", 1)).await.unwrap().record;
    let id = local.id.clone().unwrap();

    let mut remote_version = local.clone();
    remote_version.quantity = 99;
    let applied = txns
        .apply_remote(RemoteChange::Upserted {
            id: id.clone(),
            payload: Payload::from_json(&remote_version).unwrap(),
        })
        .await
        .unwrap();

    assert!(!applied);
    assert_eq!(stored(&h, &id).unwrap().quantity, 1);
}
