//! Behavior of the resilient caller against a scripted dependency.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use headlines_resilience::{
    BreakerConfig, BreakerState, CallError, CircuitBreaker, ResilientCaller, RetryPolicy,
    Unavailable,
};
use tokio::time::Instant;

#[derive(Debug, PartialEq)]
enum Downstream {
    Status(u16),
}

impl std::fmt::Display for Downstream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Downstream::Status(code) => write!(f, "HTTP {code}"),
        }
    }
}

fn caller(threshold: u32, retries: u32) -> ResilientCaller<Downstream> {
    let breaker = Arc::new(CircuitBreaker::new(
        "profanity",
        BreakerConfig {
            failure_threshold: threshold,
            cool_down: Duration::from_secs(20),
            half_open_probes: 1,
        },
    ));
    ResilientCaller::new(breaker)
        .with_retry(RetryPolicy::new(retries, Duration::from_millis(100)))
        .with_attempt_timeout(Duration::from_secs(2))
        .with_classifier(|e: &Downstream| match e {
            Downstream::Status(code) => headlines_resilience::is_transient_status(*code),
        })
}

#[tokio::test(start_paused = true)]
async fn test_transient_failure_is_retried() {
    let caller = caller(5, 3);
    let calls = &AtomicU32::new(0);

    let result = caller
        .call(move || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(Downstream::Status(503))
            } else {
                Ok("clean")
            }
        })
        .await;

    assert_eq!(result.unwrap(), "clean");
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(caller.breaker().state(), BreakerState::Closed);
    assert_eq!(caller.breaker().consecutive_failures(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_client_error_is_not_retried() {
    let caller = caller(1, 3);
    let calls = &AtomicU32::new(0);

    let result: Result<(), _> = caller
        .call(move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(Downstream::Status(400))
        })
        .await;

    assert!(matches!(result, Err(CallError::Rejected(Downstream::Status(400)))));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(caller.breaker().state(), BreakerState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_open_breaker_fails_fast_without_attempt() {
    let caller = caller(3, 0);
    let calls = &AtomicU32::new(0);
    let failing = move || async move {
        calls.fetch_add(1, Ordering::SeqCst);
        Err::<(), _>(Downstream::Status(500))
    };

    for _ in 0..3 {
        let err = caller.call(failing).await.unwrap_err();
        assert!(err.is_unavailable());
    }
    assert_eq!(caller.breaker().state(), BreakerState::Open);
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    let started = Instant::now();
    let err = caller.call(failing).await.unwrap_err();
    assert!(err.is_breaker_open());
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(started.elapsed(), Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn test_breaker_opens_mid_retry() {
    let caller = caller(2, 3);
    let calls = &AtomicU32::new(0);

    let err = caller
        .call(move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(Downstream::Status(502))
        })
        .await
        .unwrap_err();

    // Two attempts open the breaker; the remaining two are skipped.
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    match err {
        CallError::DependencyUnavailable {
            attempts, cause, ..
        } => {
            assert_eq!(attempts, 2);
            assert!(matches!(cause, Unavailable::BreakerOpen));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_single_probe_after_cool_down() {
    let caller = caller(1, 0);
    let calls = &AtomicU32::new(0);

    caller
        .call(move || async move { Err::<(), _>(Downstream::Status(503)) })
        .await
        .unwrap_err();
    assert_eq!(caller.breaker().state(), BreakerState::Open);

    tokio::time::advance(Duration::from_secs(20)).await;

    // The first caller probes and holds the slot; a concurrent caller is
    // refused without contacting the dependency.
    let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
    let release_rx = &std::sync::Mutex::new(Some(release_rx));
    let probe = caller.call(move || async move {
        calls.fetch_add(1, Ordering::SeqCst);
        let rx = release_rx.lock().unwrap().take();
        if let Some(rx) = rx {
            let _ = rx.await;
        }
        Ok::<_, Downstream>("probe")
    });
    let second = async {
        tokio::task::yield_now().await;
        let result = caller
            .call(move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, Downstream>("second")
            })
            .await;
        let _ = release_tx.send(());
        result
    };

    let (probe, second) = tokio::join!(probe, second);
    assert_eq!(probe.unwrap(), "probe");
    assert!(second.unwrap_err().is_breaker_open());
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // The successful probe closed the circuit and cleared the count.
    assert_eq!(caller.breaker().state(), BreakerState::Closed);
    assert_eq!(caller.breaker().consecutive_failures(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_hung_dependency_respects_worst_case() {
    let caller = caller(10, 3);
    let calls = &AtomicU32::new(0);

    let started = Instant::now();
    let err = caller
        .call(move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            std::future::pending::<Result<(), Downstream>>().await
        })
        .await
        .unwrap_err();

    assert_eq!(calls.load(Ordering::SeqCst), 4);
    assert!(matches!(
        err,
        CallError::DependencyUnavailable {
            cause: Unavailable::TimedOut(_),
            attempts: 4,
            ..
        }
    ));
    assert!(started.elapsed() <= caller.worst_case());
    assert_eq!(caller.worst_case(), Duration::from_millis(8_700));
}
