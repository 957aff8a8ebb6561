use std::thread;
use std::time::Duration;

use super::*;
use crate::vm::{RegisterFile, RegisterLayout, ResponseContext, ResponseOutcome, WorkerOutcome};

fn int_response(workers: usize) -> Arc<ResponseContext> {
    let response = Arc::new(ResponseContext::new(
        RegisterLayout::for_signature(&[BType::Int]).unwrap(),
        true,
    ));
    response.expect(workers);
    response
}

fn result_with(value: i64) -> RegisterFile {
    let mut regs = RegisterFile::new(&counts(1, 0));
    regs.longs[0] = value;
    regs
}

fn delivered(response: &ResponseContext) -> i64 {
    let mut out = RegisterFile::new(&counts(1, 0));
    response.deliver_into(&mut out, &[0]);
    out.longs[0]
}

#[test]
fn completes_once_after_last_contribution() {
    let response = int_response(3);
    let empty = RegisterFile::new(&counts(1, 0));
    assert!(!response.contribute(7, WorkerOutcome::Finished, &empty));
    assert!(!response.contribute(5, WorkerOutcome::Returned, &result_with(9)));
    assert!(!response.is_complete());
    assert!(response.contribute(6, WorkerOutcome::Finished, &empty));
    assert!(response.is_complete());
    assert_eq!(response.completions(), 1);
    assert_eq!(delivered(&response), 9);
}

#[test]
fn duplicate_and_late_contributions_are_ignored() {
    let response = int_response(2);
    assert!(!response.contribute(1, WorkerOutcome::Returned, &result_with(1)));
    assert!(!response.contribute(1, WorkerOutcome::Returned, &result_with(2)));
    assert_eq!(response.outstanding(), 1);
    assert!(response.contribute(2, WorkerOutcome::Finished, &result_with(3)));
    assert!(!response.contribute(3, WorkerOutcome::Returned, &result_with(4)));
    assert_eq!(response.completions(), 1);
    assert_eq!(delivered(&response), 1);
}

#[test]
fn first_return_wins() {
    let response = int_response(2);
    response.contribute(2, WorkerOutcome::Returned, &result_with(20));
    response.contribute(1, WorkerOutcome::Returned, &result_with(10));
    assert_eq!(delivered(&response), 20);
}

#[test]
fn first_error_wins() {
    let response = int_response(3);
    let empty = RegisterFile::new(&counts(1, 0));
    response.contribute(1, WorkerOutcome::Raised(BError::new("first")), &empty);
    response.contribute(2, WorkerOutcome::Raised(BError::new("second")), &empty);
    response.contribute(3, WorkerOutcome::Returned, &result_with(1));
    match response.outcome() {
        ResponseOutcome::Error(err) => assert_eq!(err.message(), "first"),
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[test]
fn fault_outranks_raised_error() {
    let response = int_response(2);
    let empty = RegisterFile::new(&counts(1, 0));
    response.contribute(1, WorkerOutcome::Raised(BError::new("raised")), &empty);
    response.contribute(2, WorkerOutcome::Faulted(VmError::Schedule("lost".into())), &empty);
    assert!(matches!(response.outcome(), ResponseOutcome::Fault(VmError::Schedule(_))));
}

#[test]
fn wait_returns_at_once_when_already_complete() {
    let response = int_response(1);
    response.contribute(1, WorkerOutcome::Finished, &RegisterFile::new(&counts(1, 0)));
    response.wait_for_response();
    assert!(response.is_complete());
}

#[test]
fn wait_with_nothing_expected_does_not_block() {
    let response = ResponseContext::new(RegisterLayout::empty(), true);
    response.wait_for_response();
    assert_eq!(response.completions(), 0);
    assert!(!response.is_complete());
}

#[test]
fn waiter_wakes_when_contributions_arrive_from_other_threads() {
    let response = int_response(4);
    let handles: Vec<_> = (0..4u64)
        .map(|id| {
            let response = response.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(5 * (4 - id)));
                let outcome = if id == 2 {
                    WorkerOutcome::Returned
                } else {
                    WorkerOutcome::Finished
                };
                response.contribute(id, outcome, &result_with(id as i64 * 100))
            })
        })
        .collect();

    response.wait_for_response();
    assert!(response.is_complete());
    assert_eq!(delivered(&response), 200);

    let completed: usize = handles.into_iter().map(|h| usize::from(h.join().unwrap())).sum();
    assert_eq!(completed, 1);
}

#[test]
fn waiter_arriving_mid_stream_still_sees_completion() {
    let response = int_response(2);
    let empty = RegisterFile::new(&counts(1, 0));
    response.contribute(1, WorkerOutcome::Finished, &empty);

    let late = response.clone();
    let writer = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        late.contribute(2, WorkerOutcome::Returned, &result_with(77));
    });
    response.wait_for_response();
    writer.join().unwrap();
    assert_eq!(delivered(&response), 77);
}
