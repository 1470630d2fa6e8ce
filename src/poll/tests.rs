//! Unit tests for condition polling.

use std::cell::Cell;
use std::fmt;
use std::time::Duration;

use rstest::rstest;
use tokio::time::Instant;

use super::*;

#[derive(Debug)]
struct ProbeError(RetryClass);

impl fmt::Display for ProbeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "probe failed ({:?})", self.0)
    }
}

impl Retryable for ProbeError {
    fn retry_class(&self) -> RetryClass {
        self.0
    }
}

const TICK: Duration = Duration::from_millis(2);

#[tokio::test]
async fn immediate_success_does_not_sleep() {
    let calls = Cell::new(0_u32);
    let started = Instant::now();
    let result = wait_for::<(), ProbeError, _, _>(
        started + Duration::from_secs(3600),
        Duration::from_secs(3600),
        PollPolicy::RetryAll,
        || {
            calls.set(calls.get() + 1);
            async { Ok(()) }
        },
    )
    .await;

    assert!(result.is_ok());
    assert_eq!(calls.get(), 1);
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[tokio::test]
async fn succeeds_after_transient_failures() {
    let calls = Cell::new(0_u32);
    let result = wait_for(
        Instant::now() + Duration::from_secs(5),
        TICK,
        PollPolicy::RetryAll,
        || {
            calls.set(calls.get() + 1);
            let attempt = calls.get();
            async move {
                if attempt <= 3 {
                    Err(CondCheckError::Failed(ProbeError(RetryClass::Transient)))
                } else {
                    Ok(())
                }
            }
        },
    )
    .await;

    assert!(result.is_ok());
    assert_eq!(calls.get(), 4);
}

#[tokio::test]
async fn times_out_no_earlier_than_deadline() {
    let deadline = Instant::now() + Duration::from_millis(30);
    let result = wait_for::<(), ProbeError, _, _>(deadline, TICK, PollPolicy::RetryAll, || async {
        Err(CondCheckError::NotYet)
    })
    .await;

    assert!(Instant::now() >= deadline);
    match result {
        Err(WaitError::Timeout { last_error, .. }) => assert_eq!(last_error, None),
        other => panic!("expected timeout, got {other:?}"),
    }
}

#[tokio::test]
async fn timeout_carries_last_swallowed_error() {
    let result = wait_for::<(), _, _, _>(
        Instant::now() + Duration::from_millis(10),
        TICK,
        PollPolicy::RetryAll,
        || async { Err(CondCheckError::Failed(ProbeError(RetryClass::Client))) },
    )
    .await;

    match result {
        Err(WaitError::Timeout { last_error, .. }) => {
            assert_eq!(last_error.as_deref(), Some("probe failed (Client)"));
        }
        other => panic!("expected timeout, got {other:?}"),
    }
}

#[rstest]
#[case(PollPolicy::RetryAll, RetryClass::Fatal)]
#[case(PollPolicy::AbortOnClientError, RetryClass::Fatal)]
#[case(PollPolicy::AbortOnClientError, RetryClass::Client)]
#[tokio::test]
async fn unswallowed_errors_abort_on_first_check(
    #[case] policy: PollPolicy,
    #[case] class: RetryClass,
) {
    let calls = Cell::new(0_u32);
    let result = wait_for::<(), _, _, _>(
        Instant::now() + Duration::from_secs(5),
        TICK,
        policy,
        || {
            calls.set(calls.get() + 1);
            async move { Err(CondCheckError::Failed(ProbeError(class))) }
        },
    )
    .await;

    assert!(matches!(result, Err(WaitError::Aborted(ProbeError(c))) if c == class));
    assert_eq!(calls.get(), 1);
}

#[rstest]
#[case(PollPolicy::RetryAll, RetryClass::Transient, false)]
#[case(PollPolicy::RetryAll, RetryClass::Client, false)]
#[case(PollPolicy::RetryAll, RetryClass::Fatal, true)]
#[case(PollPolicy::AbortOnClientError, RetryClass::Transient, false)]
#[case(PollPolicy::AbortOnClientError, RetryClass::Client, true)]
fn policy_classification(
    #[case] policy: PollPolicy,
    #[case] class: RetryClass,
    #[case] aborts: bool,
) {
    assert_eq!(policy.aborts_on(class), aborts);
}
