// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::Arc;

use dashmap::DashSet;
use translation_worker::translate::TranslationRouter;

use crate::integration_tests::common::FakeProvider;

// §8 end-to-end scenario: all providers down. With every configured
// backend (and the LibreTranslate fallback) failing, every target must
// still resolve, via the literal dictionary fallback.
#[tokio::test]
async fn all_providers_failing_falls_back_to_the_literal_dictionary() {
    let router = Arc::new(TranslationRouter::with_providers(
        None,
        None,
        None,
        Box::new(FakeProvider::failing("libretranslate")),
    ));
    let cancelled = DashSet::new();

    let result = router
        .translate(
            "Hello world",
            "en",
            &["zh-cn".to_string(), "ja".to_string()],
            "T4",
            &cancelled,
        )
        .await
        .expect("translate should not be cancelled");

    assert_eq!(result.get("zh-cn").map(String::as_str), Some("[Translated from en to zh-cn]: Hello world"));
    assert_eq!(result.get("ja").map(String::as_str), Some("[Translated from en to ja]: Hello world"));
    assert_eq!(result.get("en").map(String::as_str), Some("Hello world"));
}

// §4.4: the result map always additionally contains `sourceLang ->
// text`, and a target equal to the source language is never re-sent
// through a provider.
#[tokio::test]
async fn translate_always_echoes_the_source_language() {
    let router =
        Arc::new(TranslationRouter::with_providers(None, None, None, Box::new(FakeProvider::succeeding("libre"))));
    let cancelled = DashSet::new();

    let result = router
        .translate("Bonjour", "fr", &["fr".to_string(), "en".to_string()], "T5", &cancelled)
        .await
        .expect("translate should not be cancelled");

    // The source language is never re-translated into itself.
    assert_eq!(result.get("fr").map(String::as_str), Some("Bonjour"));
    assert_eq!(result.get("en").map(String::as_str), Some("[libre->en] Bonjour"));
    assert_eq!(result.len(), 2);
}
