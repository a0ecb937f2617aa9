// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{sync::Arc, time::Duration};

use translation_worker::{task::TaskPayload, translate::TranslationRouter};

use crate::integration_tests::common::{
    FakeProvider, FakeRegistry, FakeStore, FakeTranscriber, FakeTranscription, build_engine, test_config,
    unique_result_dir, wait_for,
};

// Testable Property 8: at no observable instant does the active task
// count exceed MAX_CONCURRENT_TASKS, even when more tasks are queued
// than the node can run at once.
#[tokio::test]
async fn active_task_count_never_exceeds_the_configured_bound() {
    let result_dir = unique_result_dir();
    let task_ids = ["A", "B", "C", "D", "E"];
    let payloads: Vec<TaskPayload> = task_ids
        .iter()
        .map(|id| TaskPayload {
            task_id: (*id).to_string(),
            source_language: "en".to_string(),
            target_languages: vec!["zh-cn".to_string()],
            text_content: Some(format!("text for {id}")),
            audio_file_path: None,
            original_text: None,
        })
        .collect();

    let (registry, _control_tx) = FakeRegistry::new(payloads);
    let store = FakeStore::new(&task_ids);
    let transcriber = Arc::new(FakeTranscriber(FakeTranscription::Fail("not used".to_string())));
    // Slow provider so several tasks are reliably in flight at once.
    let translator = Arc::new(TranslationRouter::with_providers(
        None,
        None,
        None,
        Box::new(FakeProvider { name: "libre", succeed: true, delay: Duration::from_millis(120) }),
    ));

    let mut cfg = test_config("node-bound");
    cfg.max_concurrent_tasks = 2;

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

    let mut observed_max = 0u32;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    while tokio::time::Instant::now() < deadline {
        observed_max = observed_max.max(engine.active_task_count());
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let all_done = wait_for(
        || {
            task_ids
                .iter()
                .all(|id| matches!(store.snapshot(id).and_then(|r| r.status), Some(translation_worker::task::TaskStatus::Completed)))
        },
        Duration::from_secs(2),
    )
    .await;
    assert!(all_done, "not every task completed");
    assert!(observed_max <= 2, "active task count exceeded the configured bound: {observed_max}");
    assert!(observed_max >= 1, "test never observed any in-flight task; it isn't exercising concurrency");

    engine.shutdown().await;
    run_handle.abort();
    let _ = std::fs::remove_dir_all(&result_dir);
}
