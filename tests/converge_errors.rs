//! Rendering and classification of convergence errors.

use ecc_converge::{ApiError, ConvergeError, InstanceId, ObservedInstanceState, RetryClass, Retryable};
use rstest::rstest;

#[rstest]
#[case(ApiError::not_found("server srv-1 not found"), RetryClass::Transient)]
#[case(ApiError::server(503, "unavailable"), RetryClass::Transient)]
#[case(ApiError::client(409, "conflict"), RetryClass::Client)]
fn api_failures_are_classified_for_polling(#[case] source: ApiError, #[case] expected: RetryClass) {
    assert_eq!(ConvergeError::api("get instance", source).retry_class(), expected);
}

#[test]
fn non_api_failures_stop_polling() {
    let err = ConvergeError::EnteredErrorState {
        instance_id: String::from("srv-1"),
        action: String::from("power on"),
    };
    assert_eq!(err.retry_class(), RetryClass::Fatal);
}

#[test]
fn api_failure_names_the_call() {
    let err = ConvergeError::api("attach volume vol-1", ApiError::client(400, "bad request"));
    assert_eq!(
        err.to_string(),
        "attach volume vol-1 failed: request rejected with status 400: bad request"
    );
}

#[rstest]
#[case(
    ConvergeError::EnteredErrorState {
        instance_id: String::from("srv-1"),
        action: String::from("instance creation"),
    },
    "instance srv-1 entered ERROR state while waiting for instance creation"
)]
#[case(
    ConvergeError::TransitionedToError {
        instance_id: String::from("srv-1"),
        action: String::from("power on"),
    },
    "instance srv-1 state transitioned to ERROR while waiting for power on"
)]
fn error_states_name_the_interrupted_transition(#[case] err: ConvergeError, #[case] expected: &str) {
    assert_eq!(err.to_string(), expected);
    assert_eq!(err.retry_class(), RetryClass::Fatal);
}

#[test]
fn unsupported_operation_lists_every_reason() {
    let err = ConvergeError::UnsupportedOperation {
        reasons: vec![
            String::from("image id cannot be changed after creation"),
            String::from("ssh key name cannot be changed after creation"),
        ],
    };
    assert_eq!(
        err.to_string(),
        "unsupported operation: image id cannot be changed after creation; \
         ssh key name cannot be changed after creation"
    );
}

#[test]
fn incomplete_creation_keeps_partial_state() {
    let state = ObservedInstanceState {
        id: InstanceId::new("srv-9"),
        ..ObservedInstanceState::default()
    };
    let err = ConvergeError::CreateIncomplete {
        state: Box::new(state),
        source: Box::new(ConvergeError::MissingIpInfo {
            instance_id: String::from("srv-9"),
        }),
    };

    let message = err.to_string();
    assert!(message.contains("srv-9"), "message should name the instance: {message}");
    assert!(
        message.contains("no IP information"),
        "message should carry the step failure: {message}"
    );
    assert!(std::error::Error::source(&err).is_some());
}
