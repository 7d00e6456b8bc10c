use std::time::Duration;

use cochan_core::{set_default_timeout, values, Coroutine, CoroutineError, Status};

// Runs in its own process, so it owns the process-wide default.
#[tokio::test]
async fn default_timeout_is_captured_at_creation() {
    set_default_timeout(Duration::from_millis(25)).unwrap();

    let co = Coroutine::create(|| async {
        tokio::time::sleep(Duration::from_millis(200)).await;
    })
    .unwrap();
    assert_eq!(co.config().default_timeout, Duration::from_millis(25));

    co.resume_with_default_timeout(values![]).await.unwrap();
    let err = co.resume_with_default_timeout(values![]).await.unwrap_err();
    assert!(matches!(err, CoroutineError::DeadlineExceeded(d) if d == Duration::from_millis(25)));
    assert_eq!(co.status(), Status::Closed);

    // an explicit config wins over the global
    let explicit = Coroutine::builder()
        .timeout(Duration::from_secs(2))
        .create(|| async {})
        .unwrap();
    assert_eq!(explicit.config().default_timeout, Duration::from_secs(2));

    assert!(matches!(
        set_default_timeout(Duration::from_secs(1)),
        Err(CoroutineError::DefaultTimeoutAlreadySet)
    ));
}
