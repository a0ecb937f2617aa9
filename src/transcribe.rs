// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Transcriber (§4.4 step 3): turns an audio file into text. The model
//! itself (loading Whisper, running inference) is out of scope — this
//! module defines the contract the engine drives and a thin adapter that
//! shells out to a transcription backend, so the engine can be built and
//! tested completely independently of any particular model runtime.

use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum TranscribeError {
    #[error("audio file not found: {0}")]
    NotFound(String),
    #[error("transcription backend failed: {0}")]
    Backend(String),
}

/// The text and detected source language produced by one transcription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transcription {
    pub text: String,
    pub detected_language: String,
}

/// Abstracts over whatever runs the actual speech model. Implementations
/// are expected to serialize concurrent calls themselves if the backend
/// can't handle parallel inference (the engine bounds concurrent calls
/// with a semaphore sized by `transcribe_concurrency`, but a single GPU
/// model instance still needs its own internal exclusion).
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(
        &self,
        audio_path: &str,
        language_hint: Option<&str>,
    ) -> Result<Transcription, TranscribeError>;

    fn supported_languages(&self) -> &[&str];
}

/// The full set of language codes the original Whisper model reports
/// support for; used to validate/annotate adapters, not to gate queries.
pub const SUPPORTED_LANGUAGES: &[&str] = &[
    "en", "zh", "de", "es", "ru", "ko", "fr", "ja", "pt", "tr", "pl", "ca", "nl", "ar", "sv", "it",
    "id", "hi", "fi", "vi", "he", "uk", "el", "ms", "cs", "ro", "da", "hu", "ta", "no", "th", "ur",
    "hr", "bg", "lt", "la", "mi", "ml", "cy", "sk", "te", "fa", "lv", "bn", "sr", "az", "sl", "kn",
    "et", "mk", "br", "eu", "is", "hy", "ne", "mn", "bs", "kk", "sq", "sw", "gl", "mr", "pa", "si",
    "km", "sn", "yo", "so", "af", "oc", "ka", "be", "tg", "sd", "gu", "am", "yi", "lo", "uz", "fo",
    "ht", "ps", "tk", "nn", "mt", "sa", "lb", "my", "bo", "tl", "mg", "as", "tt", "haw", "ln", "ha",
    "ba", "jw", "su",
];

/// Adapter over an external Whisper-compatible transcription process.
/// Out of this crate's scope is *how* `run` invokes the model; this
/// struct only owns the adapter's configuration and the contract above.
pub struct WhisperAdapter {
    model_size: String,
}

impl WhisperAdapter {
    pub fn new(model_size: impl Into<String>) -> Self {
        Self { model_size: model_size.into() }
    }

    pub fn model_size(&self) -> &str {
        &self.model_size
    }
}

#[async_trait]
impl Transcriber for WhisperAdapter {
    async fn transcribe(
        &self,
        audio_path: &str,
        _language_hint: Option<&str>,
    ) -> Result<Transcription, TranscribeError> {
        if !tokio::fs::try_exists(audio_path)
            .await
            .map_err(|e| TranscribeError::Backend(e.to_string()))?
        {
            return Err(TranscribeError::NotFound(audio_path.to_string()));
        }
        Err(TranscribeError::Backend(
            "no transcription backend is wired into this adapter".to_string(),
        ))
    }

    fn supported_languages(&self) -> &[&str] {
        SUPPORTED_LANGUAGES
    }
}
