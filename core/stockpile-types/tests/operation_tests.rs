use stockpile_types::{
    namespaces, Clock, ManualClock, OperationType, Payload, PendingOperation, Timestamp,
    MAX_RETRY_COUNT,
};
use std::str::FromStr;
use std::time::Duration;

#[test]
fn operation_type_round_trips_through_str() {
    for op in [OperationType::Create, OperationType::Update, OperationType::Delete] {
        assert_eq!(OperationType::from_str(op.as_str()).unwrap(), op);
    }
    assert!(OperationType::from_str("upsert").is_err());
}

#[test]
fn payload_json_helpers() {
    #[derive(serde::Serialize, serde::Deserialize, PartialEq, Debug)]
    struct Body {
        quantity: i64,
    }

    let payload = Payload::from_json(&Body { quantity: 3 }).unwrap();
    assert_eq!(payload.as_bytes(), br#"{"quantity":3}"#);
    assert_eq!(payload.decode::<Body>().unwrap(), Body { quantity: 3 });
    assert_eq!(format!("{payload:?}"), r#"Payload({"quantity":3})"#);
}

#[test]
fn payload_decode_rejects_garbage() {
    let payload = Payload::from_bytes(vec![0xff, 0x00]);
    assert!(payload.decode::<serde_json::Value>().is_err());
    assert_eq!(format!("{payload:?}"), "Payload(<2 bytes>)");
}

#[test]
fn new_operation_starts_with_zero_retries() {
    let op = PendingOperation::new(
        OperationType::Create,
        namespaces::TRANSACTIONS,
        "txn_1_abc",
        None,
        Timestamp::from_millis(10),
    );
    assert_eq!(op.retry_count, 0);
    assert_eq!(op.collection, "transactions");
    assert_eq!(MAX_RETRY_COUNT, 5);
}

#[test]
fn operation_serializes_type_field() {
    let op = PendingOperation::new(OperationType::Update, "x", "1", None, Timestamp::from_millis(5));
    let json = serde_json::to_value(&op).unwrap();
    assert_eq!(json["type"], "update");
    assert_eq!(json["enqueued_at"], 5);
}

#[test]
fn manual_clock_is_shared_between_clones() {
    let clock = ManualClock::new(Timestamp::from_millis(1_000));
    let other = clock.clone();
    clock.advance(Duration::from_millis(250));
    assert_eq!(other.now(), Timestamp::from_millis(1_250));
    other.set(Timestamp::from_millis(5));
    assert_eq!(clock.now().as_millis(), 5);
}

#[test]
fn timestamp_since_saturates() {
    let a = Timestamp::from_millis(100);
    let b = Timestamp::from_millis(400);
    assert_eq!(b.since(a), Duration::from_millis(300));
    assert_eq!(a.since(b), Duration::ZERO);
}

#[test]
fn reserved_namespaces() {
    assert!(namespaces::is_reserved(namespaces::PENDING_OPERATIONS));
    assert!(namespaces::is_reserved(namespaces::CRITICAL_DATA));
    for ns in namespaces::DOMAIN_COLLECTIONS {
        assert!(!namespaces::is_reserved(ns));
    }
}
