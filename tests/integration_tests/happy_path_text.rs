// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{sync::Arc, time::Duration};

use translation_worker::{
    codec,
    task::{SourceType, TaskPayload, TaskStatus},
    translate::TranslationRouter,
};

use crate::integration_tests::common::{
    FakeProvider, FakeRegistry, FakeStore, FakeTranscriber, FakeTranscription, build_engine, test_config,
    unique_result_dir, wait_for,
};

// §8 end-to-end scenario: text-only happy path.
#[tokio::test]
async fn text_only_task_completes_and_packs_the_expected_entries() {
    let result_dir = unique_result_dir();
    let payload = TaskPayload {
        task_id: "T1".to_string(),
        source_language: "en".to_string(),
        target_languages: vec!["zh-cn".to_string(), "ja".to_string()],
        text_content: Some("Hello world".to_string()),
        audio_file_path: None,
        original_text: None,
    };

    let (registry, _control_tx) = FakeRegistry::new(vec![payload]);
    let store = FakeStore::new(&["T1"]);
    let transcriber = Arc::new(FakeTranscriber(FakeTranscription::Fail("not used by this task".to_string())));
    let translator =
        Arc::new(TranslationRouter::with_providers(None, None, None, Box::new(FakeProvider::succeeding("libre"))));

    let engine = build_engine(
        test_config("node-happy"),
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

    let completed = wait_for(
        || matches!(store.snapshot("T1").and_then(|r| r.status), Some(TaskStatus::Completed)),
        Duration::from_secs(2),
    )
    .await;
    assert!(completed, "task never reached COMPLETED");

    let row = store.snapshot("T1").expect("row exists");
    let result_path = row.result_path.expect("result path recorded on completion");
    let blob = tokio::fs::read(&result_path).await.expect("result blob written");

    assert_eq!(
        codec::query(&blob, "zh-cn", "T1", SourceType::Text).unwrap(),
        Some("[libre->zh-cn] Hello world".to_string())
    );
    assert_eq!(
        codec::query(&blob, "en", "T1", SourceType::Text).unwrap(),
        Some("Hello world".to_string())
    );
    assert_eq!(codec::query(&blob, "ja", "T1", SourceType::Audio).unwrap(), None);

    engine.shutdown().await;
    run_handle.abort();
    let _ = std::fs::remove_dir_all(&result_dir);
}
