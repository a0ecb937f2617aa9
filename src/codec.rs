// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Packed translation format (§4.1): a self-contained binary blob mapping
//! `(language, taskId, sourceType)` to a zlib-compressed UTF-8 translation,
//! with random access and no full-blob decode on query.
//!
//! ```text
//! [0..16)   Header         = version(u32) | langCount(u32) | langIndexOffset(u32) | textDataOffset(u32)
//! [16..L1)  Language table = for each language: u16 codeLen, 6 bytes code (NUL-padded/truncated)
//! [L1..L2)  Language index = langCount x (u32 codeHash, u32 textIndexRelOffset, u32 textCount)
//! [L2..L3)  Text index     = sum textCount x (8-byte taskId, u32 dataOffset, u32 dataLength, u16 sourceType, u16 reserved)
//! [L3..EOF) Text data      = concatenated zlib-compressed UTF-8 strings
//! ```
//! All multi-byte integers are little-endian.

use std::{
    collections::BTreeMap,
    io::{Read, Write},
};

use flate2::{Compression, read::ZlibDecoder, write::ZlibEncoder};
use md5::{Digest, Md5};

use crate::task::SourceType;

pub const VERSION: u32 = 4;
const HEADER_SIZE: usize = 16;
const LANG_ENTRY_SIZE: usize = 8;
const LANG_CODE_FIELD_LEN: usize = 6;
const LANG_INDEX_ITEM_SIZE: usize = 12;
const TEXT_INDEX_ITEM_SIZE: usize = 20;
const TASK_ID_FIELD_LEN: usize = 8;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("failed to decompress text entry: {0}")]
    Decompress(#[from] std::io::Error),
    #[error("decompressed text entry was not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// One task's translation material, as handed to `pack`. Both translation
/// maps use `BTreeMap` (rather than a hasher-randomized map) so that pack
/// output is deterministic for a given logical input, per Testable
/// Property 5 — the map's own iteration order is part of the contract,
/// not an implementation detail callers can ignore.
#[derive(Debug, Clone, Default)]
pub struct TaskTranslationInput {
    pub task_id: String,
    pub original_text: Option<String>,
    pub original_translations: Option<BTreeMap<String, String>>,
    pub stt_text: Option<String>,
    pub stt_translations: Option<BTreeMap<String, String>>,
}

struct PendingEntry {
    task_id_bytes: [u8; TASK_ID_FIELD_LEN],
    offset: u32,
    length: u32,
    source_type: SourceType,
}

/// Truncates/pads a task id to the fixed 8-byte wire field (Testable
/// Property 6). Truncation is a plain byte-slice operation, not
/// char-boundary aware: task ids are treated as opaque byte strings at
/// this layer.
fn task_id_field(task_id: &str) -> [u8; TASK_ID_FIELD_LEN] {
    let bytes = task_id.as_bytes();
    let mut out = [0u8; TASK_ID_FIELD_LEN];
    let n = bytes.len().min(TASK_ID_FIELD_LEN);
    out[..n].copy_from_slice(&bytes[..n]);
    out
}

/// First 32 bits of `md5(code)`, read big-endian, matching the original's
/// `int(hashlib.md5(code).hexdigest()[:8], 16)`.
fn language_hash(language: &str) -> u32 {
    let digest = Md5::digest(language.as_bytes());
    u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
}

fn zlib_compress(data: &[u8]) -> Vec<u8> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::best());
    encoder
        .write_all(data)
        .expect("writing to an in-memory buffer cannot fail");
    encoder
        .finish()
        .expect("finishing an in-memory buffer cannot fail")
}

fn zlib_decompress(data: &[u8]) -> Result<Vec<u8>, std::io::Error> {
    let mut decoder = ZlibDecoder::new(data);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

/// Packs a single task's translations. Convenience wrapper over
/// [`pack`] for the common one-task case.
pub fn pack_one(input: TaskTranslationInput) -> Vec<u8> {
    pack(std::slice::from_ref(&input))
}

/// Packs one or more tasks' translations into the blob described above.
/// Deterministic: the same input slice (same order, same map contents)
/// always produces byte-identical output.
pub fn pack(tasks: &[TaskTranslationInput]) -> Vec<u8> {
    let mut lang_data: BTreeMap<String, Vec<PendingEntry>> = BTreeMap::new();
    let mut text_parts: Vec<Vec<u8>> = Vec::new();
    let mut current_offset: u32 = 0;

    for task in tasks {
        let task_id_bytes = task_id_field(&task.task_id);

        if let (Some(_), Some(translations)) =
            (&task.original_text, &task.original_translations)
        {
            for (lang, text) in translations {
                let compressed = zlib_compress(text.as_bytes());
                let length = compressed.len() as u32;
                lang_data.entry(lang.clone()).or_default().push(PendingEntry {
                    task_id_bytes,
                    offset: current_offset,
                    length,
                    source_type: SourceType::Text,
                });
                current_offset += length;
                text_parts.push(compressed);
            }
        }

        if let (Some(_), Some(translations)) = (&task.stt_text, &task.stt_translations) {
            for (lang, text) in translations {
                let compressed = zlib_compress(text.as_bytes());
                let length = compressed.len() as u32;
                lang_data.entry(lang.clone()).or_default().push(PendingEntry {
                    task_id_bytes,
                    offset: current_offset,
                    length,
                    source_type: SourceType::Audio,
                });
                current_offset += length;
                text_parts.push(compressed);
            }
        }
    }

    if lang_data.is_empty() {
        let mut header = Vec::with_capacity(HEADER_SIZE);
        header.extend_from_slice(&VERSION.to_le_bytes());
        header.extend_from_slice(&0u32.to_le_bytes());
        header.extend_from_slice(&(HEADER_SIZE as u32).to_le_bytes());
        header.extend_from_slice(&(HEADER_SIZE as u32).to_le_bytes());
        return header;
    }

    let lang_count = lang_data.len() as u32;

    let mut lang_table = Vec::with_capacity(lang_data.len() * LANG_ENTRY_SIZE);
    for lang in lang_data.keys() {
        let code_bytes = lang.as_bytes();
        if code_bytes.len() > LANG_CODE_FIELD_LEN {
            tracing::warn!(
                language = %lang,
                "language tag exceeds the 6-byte packed field and will be truncated"
            );
        }
        let stored_len = code_bytes.len().min(LANG_CODE_FIELD_LEN);
        lang_table.extend_from_slice(&(stored_len as u16).to_le_bytes());
        let mut field = [0u8; LANG_CODE_FIELD_LEN];
        field[..stored_len].copy_from_slice(&code_bytes[..stored_len]);
        lang_table.extend_from_slice(&field);
    }

    let mut lang_index = Vec::with_capacity(lang_data.len() * LANG_INDEX_ITEM_SIZE);
    let mut text_index = Vec::new();
    let mut text_index_rel_offset: u32 = 0;

    for (lang, entries) in &lang_data {
        let hash = language_hash(lang);
        lang_index.extend_from_slice(&hash.to_le_bytes());
        lang_index.extend_from_slice(&text_index_rel_offset.to_le_bytes());
        lang_index.extend_from_slice(&(entries.len() as u32).to_le_bytes());

        for entry in entries {
            text_index.extend_from_slice(&entry.task_id_bytes);
            text_index.extend_from_slice(&entry.offset.to_le_bytes());
            text_index.extend_from_slice(&entry.length.to_le_bytes());
            text_index.extend_from_slice(&entry.source_type.code().to_le_bytes());
            text_index.extend_from_slice(&0u16.to_le_bytes());
            text_index_rel_offset += TEXT_INDEX_ITEM_SIZE as u32;
        }
    }

    let lang_table_offset = HEADER_SIZE;
    let lang_index_offset = lang_table_offset + lang_table.len();
    let text_index_offset = lang_index_offset + lang_index.len();
    let text_data_offset = text_index_offset + text_index.len();

    let mut blob = Vec::with_capacity(text_data_offset + current_offset as usize);
    blob.extend_from_slice(&VERSION.to_le_bytes());
    blob.extend_from_slice(&lang_count.to_le_bytes());
    blob.extend_from_slice(&(lang_index_offset as u32).to_le_bytes());
    blob.extend_from_slice(&(text_data_offset as u32).to_le_bytes());
    blob.extend_from_slice(&lang_table);
    blob.extend_from_slice(&lang_index);
    blob.extend_from_slice(&text_index);
    for part in text_parts {
        blob.extend_from_slice(&part);
    }
    blob
}

fn read_u32(blob: &[u8], at: usize) -> Option<u32> {
    blob.get(at..at + 4)
        .map(|s| u32::from_le_bytes(s.try_into().expect("slice is exactly 4 bytes")))
}

fn read_u16(blob: &[u8], at: usize) -> Option<u16> {
    blob.get(at..at + 2)
        .map(|s| u16::from_le_bytes(s.try_into().expect("slice is exactly 2 bytes")))
}

/// Looks up `(language, taskId, sourceType)` in a packed blob. `Ok(None)`
/// covers every "not found" case in §4.1's failure modes (truncated blob,
/// language-hash miss, no matching task/sourceType entry); `Err` is
/// reserved for a matched entry whose bytes fail to decompress or decode.
///
/// Resolves Open Question 3: a language-hash match is additionally
/// verified against the decoded language-table entry before being
/// accepted, closing the 32-bit-hash collision hole the original leaves
/// open.
pub fn query(
    blob: &[u8],
    language: &str,
    task_id: &str,
    source_type: SourceType,
) -> Result<Option<String>, CodecError> {
    if blob.len() < HEADER_SIZE {
        return Ok(None);
    }

    let Some(lang_count) = read_u32(blob, 4) else {
        return Ok(None);
    };
    let Some(lang_index_offset) = read_u32(blob, 8).map(|v| v as usize) else {
        return Ok(None);
    };
    let Some(text_data_offset) = read_u32(blob, 12).map(|v| v as usize) else {
        return Ok(None);
    };

    let target_hash = language_hash(language);
    let target_code = &language.as_bytes()[..language.len().min(LANG_CODE_FIELD_LEN)];
    let task_id_bytes = task_id_field(task_id);

    for i in 0..lang_count as usize {
        let entry_pos = lang_index_offset + i * LANG_INDEX_ITEM_SIZE;
        let Some(stored_hash) = read_u32(blob, entry_pos) else {
            break;
        };
        if stored_hash != target_hash {
            continue;
        }

        let table_pos = HEADER_SIZE + i * LANG_ENTRY_SIZE;
        let Some(code_len) = read_u16(blob, table_pos).map(|v| v as usize) else {
            continue;
        };
        let code_len = code_len.min(LANG_CODE_FIELD_LEN);
        let Some(stored_code) = blob.get(table_pos + 2..table_pos + 2 + code_len) else {
            continue;
        };
        if stored_code != target_code {
            // Hash collision with a different language tag; keep scanning.
            continue;
        }

        let Some(text_index_rel) = read_u32(blob, entry_pos + 4).map(|v| v as usize)
        else {
            return Ok(None);
        };
        let Some(text_count) = read_u32(blob, entry_pos + 8) else {
            return Ok(None);
        };
        let text_index_abs =
            lang_index_offset + lang_count as usize * LANG_INDEX_ITEM_SIZE + text_index_rel;

        for j in 0..text_count as usize {
            let tpos = text_index_abs + j * TEXT_INDEX_ITEM_SIZE;
            let Some(stored_task_id) = blob.get(tpos..tpos + TASK_ID_FIELD_LEN) else {
                break;
            };
            let Some(data_offset) = read_u32(blob, tpos + 8).map(|v| v as usize) else {
                break;
            };
            let Some(data_length) = read_u32(blob, tpos + 12).map(|v| v as usize) else {
                break;
            };
            let Some(stored_source_type) = read_u16(blob, tpos + 16) else {
                break;
            };

            if stored_task_id == task_id_bytes && stored_source_type == source_type.code() {
                let start = text_data_offset + data_offset;
                let Some(compressed) = blob.get(start..start + data_length) else {
                    return Ok(None);
                };
                let decompressed = zlib_decompress(compressed)?;
                let text = String::from_utf8(decompressed)?;
                return Ok(Some(text));
            }
        }

        // Language matched and was verified; no (taskId, sourceType) entry
        // exists for it.
        return Ok(None);
    }

    Ok(None)
}

/// String-keyed variant of [`query`] matching the public contract in
/// §4.1: an unrecognized `sourceType` spelling is a negative lookup, not
/// an error.
pub fn query_str(
    blob: &[u8],
    language: &str,
    task_id: &str,
    source_type: &str,
) -> Result<Option<String>, CodecError> {
    match SourceType::parse_query(source_type) {
        Some(st) => query(blob, language, task_id, st),
        None => Ok(None),
    }
}
