use crate::core::orchestrator::{TaskStatus, can_transition};

#[test]
fn lifecycle_happy_path_transitions_are_allowed() {
    let path = [
        (TaskStatus::Pending, TaskStatus::AwaitingClarification),
        (TaskStatus::AwaitingClarification, TaskStatus::Queued),
        (TaskStatus::Queued, TaskStatus::Running),
        (TaskStatus::Running, TaskStatus::Completed),
    ];
    for (from, to) in path {
        assert!(
            can_transition(from, to),
            "expected transition {:?} -> {:?} to be allowed",
            from,
            to
        );
    }
}

#[test]
fn direct_queueing_skips_clarification() {
    assert!(can_transition(TaskStatus::Pending, TaskStatus::Queued));
    assert!(can_transition(TaskStatus::Running, TaskStatus::Error));
}

#[test]
fn dismissal_only_from_awaiting_clarification() {
    assert!(can_transition(
        TaskStatus::AwaitingClarification,
        TaskStatus::Cancelled
    ));
    for from in [TaskStatus::Pending, TaskStatus::Queued, TaskStatus::Running] {
        assert!(
            !can_transition(from, TaskStatus::Cancelled),
            "cancel must not be allowed from {:?}",
            from
        );
    }
}

#[test]
fn running_requires_a_queue_slot() {
    assert!(!can_transition(TaskStatus::Pending, TaskStatus::Running));
    assert!(!can_transition(
        TaskStatus::AwaitingClarification,
        TaskStatus::Running
    ));
}

#[test]
fn terminal_states_are_final() {
    let terminal = [
        TaskStatus::Completed,
        TaskStatus::Error,
        TaskStatus::Cancelled,
    ];
    let all = [
        TaskStatus::Pending,
        TaskStatus::Queued,
        TaskStatus::Running,
        TaskStatus::AwaitingClarification,
        TaskStatus::Completed,
        TaskStatus::Error,
        TaskStatus::Cancelled,
    ];
    for from in terminal {
        assert!(from.is_terminal());
        for to in all {
            assert!(!can_transition(from, to), "{:?} -> {:?}", from, to);
        }
    }
}

#[test]
fn status_strings_round_trip() {
    for status in [
        TaskStatus::Pending,
        TaskStatus::Queued,
        TaskStatus::Running,
        TaskStatus::AwaitingClarification,
        TaskStatus::Completed,
        TaskStatus::Error,
        TaskStatus::Cancelled,
    ] {
        assert_eq!(TaskStatus::from_status(status.as_str()), Some(status));
    }
    assert_eq!(TaskStatus::from_status("failed"), None);
}
