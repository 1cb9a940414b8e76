use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use stockpile_sync::{RemoteError, RetryPolicy};
use tokio::time::Instant;

#[tokio::test(start_paused = true)]
async fn retries_transient_errors_with_backoff() {
    let attempts = AtomicU32::new(0);
    let started = Instant::now();

    let result = RetryPolicy::default()
        .run("create", || async {
            if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(RemoteError::Network("reset".into()))
            } else {
                Ok(42)
            }
        })
        .await;

    assert_eq!(result, Ok(42));
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    assert_eq!(started.elapsed(), Duration::from_millis(1_500));
}

#[tokio::test(start_paused = true)]
async fn gives_up_after_max_attempts() {
    let attempts = AtomicU32::new(0);

    let result: Result<(), _> = RetryPolicy::default()
        .run("update", || async {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(RemoteError::Timeout)
        })
        .await;

    assert_eq!(result, Err(RemoteError::Timeout));
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn non_transient_errors_return_immediately() {
    for err in [
        RemoteError::Validation("quantity must be positive".into()),
        RemoteError::PermissionDenied("nope".into()),
        RemoteError::NotFound("t1".into()),
        RemoteError::Unauthenticated,
    ] {
        let attempts = AtomicU32::new(0);
        let started = Instant::now();
        let result: Result<(), _> = RetryPolicy::default()
            .run("delete", || {
                let err = err.clone();
                let attempts = &attempts;
                async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    Err(err)
                }
            })
            .await;

        assert_eq!(result, Err(err));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }
}

#[test]
fn error_classification() {
    assert!(RemoteError::Network("x".into()).is_transient());
    assert!(RemoteError::Timeout.is_transient());
    assert!(RemoteError::Unavailable("x".into()).is_transient());
    assert!(!RemoteError::Validation("x".into()).is_transient());
    assert!(RemoteError::Validation("x".into()).is_permanent());
    assert!(RemoteError::PermissionDenied("x".into()).is_permanent());
    assert!(!RemoteError::Unauthenticated.is_permanent());
    assert!(!RemoteError::Other("x".into()).is_transient());
}
