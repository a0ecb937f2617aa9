// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use translation_worker::task::ControlMessage;

#[test]
fn cancel_task_action_carries_the_task_id() {
    let raw = r#"{"action":"CANCEL_TASK","taskId":"T42"}"#;
    let msg: ControlMessage = serde_json::from_str(raw).unwrap();
    match msg {
        ControlMessage::CancelTask { task_id } => assert_eq!(task_id, "T42"),
        ControlMessage::Unknown { .. } => panic!("expected CancelTask"),
    }
}

#[test]
fn unrecognized_action_is_logged_and_dropped_not_rejected() {
    let raw = r#"{"action":"REQUEUE_TASK","taskId":"T42"}"#;
    let msg: ControlMessage = serde_json::from_str(raw).unwrap();
    match msg {
        ControlMessage::Unknown { action } => assert_eq!(action, "REQUEUE_TASK"),
        ControlMessage::CancelTask { .. } => panic!("expected Unknown"),
    }
}

#[test]
fn cancel_task_without_a_task_id_defaults_to_empty_string() {
    let raw = r#"{"action":"CANCEL_TASK"}"#;
    let msg: ControlMessage = serde_json::from_str(raw).unwrap();
    match msg {
        ControlMessage::CancelTask { task_id } => assert_eq!(task_id, ""),
        ControlMessage::Unknown { .. } => panic!("expected CancelTask"),
    }
}
