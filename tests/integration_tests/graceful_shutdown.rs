// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{sync::Arc, time::Duration};

use translation_worker::{
    task::{NodeStatus, TaskPayload, TaskStatus},
    translate::TranslationRouter,
};

use crate::integration_tests::common::{
    FakeProvider, FakeRegistry, FakeStore, FakeTranscriber, FakeTranscription, build_engine, test_config,
    unique_result_dir, wait_for,
};

// §8 end-to-end scenario: graceful shutdown. An in-flight task must be
// allowed to finish (since task_timeout comfortably covers it); the
// node must be published as SHUTTING_DOWN, then removed from the
// ranking and active-node sets on unregister.
#[tokio::test]
async fn shutdown_drains_the_in_flight_task_before_unregistering() {
    let result_dir = unique_result_dir();
    let payload = TaskPayload {
        task_id: "T6".to_string(),
        source_language: "en".to_string(),
        target_languages: vec!["zh-cn".to_string()],
        text_content: Some("Hello world".to_string()),
        audio_file_path: None,
        original_text: None,
    };

    let (registry, _control_tx) = FakeRegistry::new(vec![payload]);
    let store = FakeStore::new(&["T6"]);
    let transcriber = Arc::new(FakeTranscriber(FakeTranscription::Fail("not used".to_string())));
    let translator = Arc::new(TranslationRouter::with_providers(
        None,
        None,
        None,
        Box::new(FakeProvider { name: "libre", succeed: true, delay: Duration::from_millis(200) }),
    ));

    let mut cfg = test_config("node-shutdown");
    cfg.task_timeout = Duration::from_secs(5);

    let engine = build_engine(
        cfg,
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

    let assigned = wait_for(|| store.snapshot("T6").and_then(|r| r.assigned_node_id).is_some(), Duration::from_secs(1))
        .await;
    assert!(assigned, "task was never dispatched");

    // Shut down while the task is still mid-translation.
    engine.shutdown().await;

    assert!(registry.has_published(NodeStatus::ShuttingDown), "SHUTTING_DOWN was never published");
    assert!(registry.has_published(NodeStatus::Offline), "OFFLINE was never published");
    assert_eq!(store.snapshot("T6").unwrap().status, Some(TaskStatus::Completed));
    assert!(registry.unregistered.load(std::sync::atomic::Ordering::SeqCst));
    assert!(!registry.ranked.load(std::sync::atomic::Ordering::SeqCst), "node must be unranked after shutdown");

    run_handle.abort();
    let _ = std::fs::remove_dir_all(&result_dir);
}
