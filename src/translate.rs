// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Translation Router (§4.4 step 5): fans a source text out to every
//! requested target language concurrently, isolating per-target provider
//! failures from whole-task cancellation.
//!
//! Provider selection is a priority chain, not a uniform retry-through-
//! all-of-them: if an OpenAI-compatible key is configured it is used
//! exclusively (a failure there is NOT retried against Google/DeepL/
//! Libre — the original never falls back off of OpenAI either). Absent
//! that, Google is tried first, falling back to DeepL on failure, falling
//! back to LibreTranslate, which itself falls back to a local
//! placeholder dictionary rather than ever failing outright.

use std::{collections::BTreeMap, sync::Arc};

use async_trait::async_trait;
use dashmap::DashSet;
use tokio::task::JoinSet;

use crate::cfg::config::Config;

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("provider returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("unexpected response shape from provider")]
    Shape,
}

#[derive(Debug, thiserror::Error)]
pub enum TranslateError {
    #[error("task was cancelled")]
    Cancelled,
}

/// A single translation backend. Implementations each know their own
/// endpoint, auth, and language-code dialect.
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn translate(
        &self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
    ) -> Result<String, ProviderError>;
}

fn language_display_name(code: &str) -> &str {
    match code {
        "en" => "English",
        "zh-cn" => "Simplified Chinese",
        "zh-tw" => "Traditional Chinese",
        "ja" => "Japanese",
        "ko" => "Korean",
        "fr" => "French",
        "de" => "German",
        "es" => "Spanish",
        "ru" => "Russian",
        "it" => "Italian",
        "pt" => "Portuguese",
        "ar" => "Arabic",
        other => other,
    }
}

fn to_google_code(code: &str) -> &str {
    match code {
        "zh-cn" | "zh-tw" | "ja" | "ko" | "en" | "fr" | "de" | "es" | "ru" | "it" | "pt" | "ar"
        | "hi" | "th" | "vi" | "tr" | "pl" | "nl" | "sv" | "da" | "no" | "fi" => code,
        _ => "en",
    }
}

fn to_deepl_code(code: &str) -> &str {
    match code {
        "zh-cn" => "ZH-HANS",
        "zh-tw" => "ZH-HANT",
        "ja" => "JA",
        "ko" => "KO",
        "en" | "en-gb" | "en-us" => "EN",
        "fr" => "FR",
        "de" => "DE",
        "es" => "ES",
        "ru" => "RU",
        "it" => "IT",
        "pt" | "pt-br" | "pt-pt" => "PT",
        "ar" => "AR",
        "th" => "TH",
        "vi" => "VI",
        "tr" => "TR",
        "pl" => "PL",
        "nl" => "NL",
        "sv" => "SV",
        "da" => "DA",
        "no" => "NB",
        "fi" => "FI",
        "bg" => "BG",
        "cs" => "CS",
        "el" => "EL",
        "et" => "ET",
        "he" => "HE",
        "hu" => "HU",
        "id" => "ID",
        "lt" => "LT",
        "lv" => "LV",
        "ro" => "RO",
        "sk" => "SK",
        "sl" => "SL",
        "uk" => "UK",
        _ => "EN",
    }
}

fn to_libre_code(code: &str) -> &str {
    match code {
        "zh-cn" | "zh-tw" => "zh",
        "ja" => "ja",
        "ko" => "ko",
        "en" => "en",
        "fr" => "fr",
        "de" => "de",
        "es" => "es",
        "ru" => "ru",
        "it" => "it",
        "pt" => "pt",
        "ar" => "ar",
        _ => "en",
    }
}

pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: String,
}

impl OpenAiProvider {
    pub fn new(client: reqwest::Client, api_key: String) -> Self {
        Self { client, api_key }
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn translate(
        &self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
    ) -> Result<String, ProviderError> {
        let prompt = format!(
            "Translate the following text from {} to {}. Provide only the translation without any additional text or explanation.\n\nText to translate:\n{text}",
            language_display_name(source_lang),
            language_display_name(target_lang),
        );
        let body = serde_json::json!({
            "model": "gpt-3.5-turbo",
            "messages": [
                {"role": "system", "content": "You are a professional translator. Provide accurate and natural translations."},
                {"role": "user", "content": prompt},
            ],
            "max_tokens": 2000,
            "temperature": 0.3,
        });

        let response = self
            .client
            .post("https://api.openai.com/v1/chat/completions")
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Status { status, body });
        }

        let value: serde_json::Value = response.json().await?;
        value["choices"][0]["message"]["content"]
            .as_str()
            .map(|s| s.trim().to_string())
            .ok_or(ProviderError::Shape)
    }
}

pub struct GoogleProvider {
    client: reqwest::Client,
    api_key: String,
}

impl GoogleProvider {
    pub fn new(client: reqwest::Client, api_key: String) -> Self {
        Self { client, api_key }
    }
}

#[async_trait]
impl Provider for GoogleProvider {
    fn name(&self) -> &'static str {
        "google"
    }

    async fn translate(
        &self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
    ) -> Result<String, ProviderError> {
        let response = self
            .client
            .post("https://translation.googleapis.com/language/translate/v2")
            .query(&[
                ("key", self.api_key.as_str()),
                ("q", text),
                ("source", to_google_code(source_lang)),
                ("target", to_google_code(target_lang)),
                ("format", "text"),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Status { status, body });
        }

        let value: serde_json::Value = response.json().await?;
        value["data"]["translations"][0]["translatedText"]
            .as_str()
            .map(str::to_string)
            .ok_or(ProviderError::Shape)
    }
}

pub struct DeepLProvider {
    client: reqwest::Client,
    api_key: String,
    api_url: String,
}

impl DeepLProvider {
    pub fn new(client: reqwest::Client, api_key: String, api_url: String) -> Self {
        Self { client, api_key, api_url }
    }
}

#[async_trait]
impl Provider for DeepLProvider {
    fn name(&self) -> &'static str {
        "deepl"
    }

    async fn translate(
        &self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
    ) -> Result<String, ProviderError> {
        let url = format!("{}/v2/translate", self.api_url);
        let response = self
            .client
            .post(url)
            .header("Authorization", format!("DeepL-Auth-Key {}", self.api_key))
            .form(&[
                ("text", text),
                ("source_lang", to_deepl_code(source_lang)),
                ("target_lang", to_deepl_code(target_lang)),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Status { status, body });
        }

        let value: serde_json::Value = response.json().await?;
        value["translations"][0]["text"]
            .as_str()
            .map(str::to_string)
            .ok_or(ProviderError::Shape)
    }
}

pub struct LibreProvider {
    client: reqwest::Client,
}

impl LibreProvider {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Provider for LibreProvider {
    fn name(&self) -> &'static str {
        "libretranslate"
    }

    async fn translate(
        &self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
    ) -> Result<String, ProviderError> {
        let response = self
            .client
            .post("https://libretranslate.de/translate")
            .json(&serde_json::json!({
                "q": text,
                "source": to_libre_code(source_lang),
                "target": to_libre_code(target_lang),
                "format": "text",
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Status { status, body });
        }

        let value: serde_json::Value = response.json().await?;
        value["translatedText"]
            .as_str()
            .map(str::to_string)
            .ok_or(ProviderError::Shape)
    }
}

fn dict_fallback(text: &str, source_lang: &str, target_lang: &str) -> String {
    format!("[Translated from {source_lang} to {target_lang}]: {text}")
}

/// Fans a source text out to target languages and resolves which
/// provider chain to use. Built once at startup from [`Config`] and
/// shared behind an `Arc` so fan-out tasks can each hold a cheap clone.
pub struct TranslationRouter {
    openai: Option<Box<dyn Provider>>,
    google: Option<Box<dyn Provider>>,
    deepl: Option<Box<dyn Provider>>,
    libre: Box<dyn Provider>,
}

impl TranslationRouter {
    pub fn new(cfg: &Config) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(10))
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .expect("reqwest client configuration is valid");

        let openai = cfg
            .translation_api_key
            .clone()
            .map(|key| Box::new(OpenAiProvider::new(client.clone(), key)) as Box<dyn Provider>);
        let google = cfg
            .google_translate_api_key
            .clone()
            .map(|key| Box::new(GoogleProvider::new(client.clone(), key)) as Box<dyn Provider>);
        let deepl = cfg.deepl_api_key.clone().map(|key| {
            Box::new(DeepLProvider::new(client.clone(), key, cfg.deepl_api_url.clone()))
                as Box<dyn Provider>
        });
        let libre = Box::new(LibreProvider::new(client));

        Self { openai, google, deepl, libre }
    }

    /// Builds a router from explicit providers rather than `Config`, so
    /// callers (tests, primarily) can substitute fakes for the real HTTP
    /// backends without reaching the network.
    pub fn with_providers(
        openai: Option<Box<dyn Provider>>,
        google: Option<Box<dyn Provider>>,
        deepl: Option<Box<dyn Provider>>,
        libre: Box<dyn Provider>,
    ) -> Self {
        Self { openai, google, deepl, libre }
    }

    async fn translate_single(
        &self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
    ) -> String {
        if let Some(openai) = &self.openai {
            return match openai.translate(text, source_lang, target_lang).await {
                Ok(t) => t,
                Err(e) => {
                    tracing::error!(provider = openai.name(), error = %e, "translation failed");
                    format!("[Translation Error: {e}]")
                },
            };
        }

        if let Some(google) = &self.google {
            match google.translate(text, source_lang, target_lang).await {
                Ok(t) => return t,
                Err(e) => tracing::warn!(error = %e, "google translation failed, trying deepl"),
            }
        }

        if let Some(deepl) = &self.deepl {
            match deepl.translate(text, source_lang, target_lang).await {
                Ok(t) => return t,
                Err(e) => tracing::warn!(error = %e, "deepl translation failed, trying libretranslate"),
            }
        }

        match self.libre.translate(text, source_lang, target_lang).await {
            Ok(t) => t,
            Err(e) => {
                tracing::warn!(error = %e, "libretranslate failed, using local fallback dictionary");
                dict_fallback(text, source_lang, target_lang)
            },
        }
    }

    /// Translates `text` into every target in `target_languages` other
    /// than `source_lang` itself, concurrently. Checks `cancelled` before
    /// starting and after every completed subtask; on a cancellation hit
    /// mid-fan-out, aborts the remaining subtasks and returns
    /// `Err(Cancelled)` rather than a partial map, matching §4.4's
    /// whole-operation cancellation semantics (as opposed to a single
    /// provider failure, which is isolated per-target).
    pub async fn translate(
        self: &Arc<Self>,
        text: &str,
        source_lang: &str,
        target_languages: &[String],
        task_id: &str,
        cancelled: &DashSet<String>,
    ) -> Result<BTreeMap<String, String>, TranslateError> {
        if cancelled.contains(task_id) {
            return Err(TranslateError::Cancelled);
        }

        let mut join_set = JoinSet::new();
        for target in target_languages {
            if target == source_lang {
                continue;
            }
            let router = Arc::clone(self);
            let text = text.to_string();
            let source_lang = source_lang.to_string();
            let target = target.clone();
            join_set.spawn(async move {
                let translated = router.translate_single(&text, &source_lang, &target).await;
                (target, translated)
            });
        }

        let mut translations = BTreeMap::new();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((target, translated)) => {
                    translations.insert(target, translated);
                },
                Err(join_error) => {
                    tracing::error!(error = %join_error, "translation subtask did not complete");
                },
            }
            if cancelled.contains(task_id) {
                join_set.abort_all();
                return Err(TranslateError::Cancelled);
            }
        }

        translations.insert(source_lang.to_string(), text.to_string());
        Ok(translations)
    }
}
