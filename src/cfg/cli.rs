// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// Resolves a possibly-relative path against the current working directory
/// and returns its absolute form. Does not require the path to exist.
pub fn resolve_path(rel: &str) -> Result<PathBuf> {
    let p = Path::new(rel);
    if p.is_absolute() {
        return Ok(p.to_path_buf());
    }
    Ok(std::env::current_dir()
        .context("cannot get current working dir")?
        .join(p))
}

/// Ensures the result directory (§4.6 step 6) exists, creating it if
/// necessary, and returns its absolute path.
pub fn ensure_result_dir(rel: &str) -> Result<PathBuf> {
    let abs = resolve_path(rel)?;
    std::fs::create_dir_all(&abs)
        .with_context(|| format!("failed to create result dir {abs:?}"))?;
    Ok(abs)
}
