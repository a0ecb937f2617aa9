// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{sync::Arc, time::Duration};

use translation_worker::{
    task::{ControlMessage, TaskPayload, TaskStatus},
    translate::TranslationRouter,
};

use crate::integration_tests::common::{
    FakeProvider, FakeRegistry, FakeStore, FakeTranscriber, FakeTranscription, build_engine, test_config,
    unique_result_dir, wait_for,
};

// §8 end-to-end scenario: cancellation mid-flight. The transcription
// step is made slow so a CANCEL_TASK message can land while the task is
// still in flight, mirroring the spec's "40 targets, cancel immediately
// after dispatch" scenario without actually needing 40 providers.
#[tokio::test]
async fn cancelled_task_never_completes_and_writes_no_result_file() {
    let result_dir = unique_result_dir();
    let payload = TaskPayload {
        task_id: "T3".to_string(),
        source_language: "en".to_string(),
        target_languages: vec!["zh-cn".to_string()],
        text_content: None,
        audio_file_path: Some("/fixtures/clip.mp3".to_string()),
        original_text: Some("Hello, this is a test.".to_string()),
    };

    let (registry, control_tx) = FakeRegistry::new(vec![payload]);
    let store = FakeStore::new(&["T3"]);
    let transcriber = Arc::new(FakeTranscriber(FakeTranscription::Text {
        text: "Hello, this is a test.".to_string(),
        delay: Duration::from_millis(300),
    }));
    let translator =
        Arc::new(TranslationRouter::with_providers(None, None, None, Box::new(FakeProvider::succeeding("libre"))));

    let engine = build_engine(
        test_config("node-cancel"),
        Arc::clone(&registry),
        Arc::clone(&store),
        transcriber,
        translator,
        result_dir.clone(),
    );

    let run_handle = tokio::spawn({
        let engine = Arc::clone(&engine);
        async move { engine.run().await }
    });

    let assigned = wait_for(|| store.snapshot("T3").and_then(|r| r.assigned_node_id).is_some(), Duration::from_secs(1))
        .await;
    assert!(assigned, "task was never assigned to the node");

    control_tx
        .send(ControlMessage::CancelTask { task_id: "T3".to_string() })
        .expect("control channel is open");

    let cancelled =
        wait_for(|| matches!(store.snapshot("T3").and_then(|r| r.status), Some(TaskStatus::Cancelled)), Duration::from_secs(1))
            .await;
    assert!(cancelled, "row never reached CANCELLED");

    // Give the handler time to observe the cancellation and return; it
    // must not clobber CANCELLED with a later COMPLETED/FAILED write.
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(store.snapshot("T3").unwrap().status, Some(TaskStatus::Cancelled));
    assert!(!result_dir.join("T3.bin").exists(), "cancelled task must not write a result blob");

    engine.shutdown().await;
    run_handle.abort();
    let _ = std::fs::remove_dir_all(&result_dir);
}
