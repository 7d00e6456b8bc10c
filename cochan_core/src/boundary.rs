use std::any::Any;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};

use futures::FutureExt;

use crate::error::{CoroutineError, Result};

/// Drive `fut` to completion, turning a panic anywhere inside it into
/// [`CoroutineError::Panicked`].
pub async fn run_guarded<F, T>(fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => Err(CoroutineError::Panicked(panic_message(payload.as_ref()))),
    }
}

/// Synchronous counterpart of [`run_guarded`], used for callbacks.
pub fn call_guarded<F, T>(f: F) -> Result<T>
where
    F: FnOnce() -> T,
{
    panic::catch_unwind(AssertUnwindSafe(f))
        .map_err(|payload| CoroutineError::Panicked(panic_message(payload.as_ref())))
}

pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_guarded_passes_results_through() {
        let ok = run_guarded(async { Ok(7) }).await;
        assert_eq!(ok.unwrap(), 7);

        let err: Result<()> = run_guarded(async { Err(CoroutineError::Closed) }).await;
        assert!(matches!(err, Err(CoroutineError::Closed)));
    }

    #[tokio::test]
    async fn test_run_guarded_converts_panics() {
        let result: Result<()> = run_guarded(async {
            let items: Vec<u8> = Vec::new();
            if items.is_empty() {
                panic!("body exploded: {}", items.len());
            }
            Ok(())
        })
        .await;
        match result {
            Err(CoroutineError::Panicked(msg)) => assert_eq!(msg, "body exploded: 0"),
            other => panic!("expected panic error, got {:?}", other),
        }
    }

    #[test]
    fn test_call_guarded() {
        assert_eq!(call_guarded(|| 3).unwrap(), 3);
        let err = call_guarded(|| -> () { panic!("static message") }).unwrap_err();
        assert!(matches!(err, CoroutineError::Panicked(ref m) if m == "static message"));
    }
}
