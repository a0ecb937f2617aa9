// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Resource Probe (§4.3): CPU/RAM via `sysinfo`, GPU via an `nvidia-smi`
//! subprocess. Missing `nvidia-smi` (or any failure reading it) degrades
//! to `gpu_available: false` with zeroed fields rather than an error —
//! every node in the fleet reports a `ResourceSample` every heartbeat
//! whether or not it has a GPU.

use std::sync::Mutex;

use sysinfo::System;

use crate::task::ResourceSample;

#[derive(Debug, Clone, Copy, Default)]
struct GpuSample {
    available: bool,
    memory_total: u64,
    memory_used: u64,
    memory_percent: f64,
}

/// Samples host resources on demand. Holds a `sysinfo::System` that is
/// refreshed on every call rather than on a background timer, since
/// sampling only happens once per heartbeat interval (§4.2).
pub struct ResourceProbe {
    system: Mutex<System>,
}

impl ResourceProbe {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu_usage();
        system.refresh_memory();
        Self { system: Mutex::new(system) }
    }

    /// Takes one resource sample. Never fails: a missing or erroring
    /// `nvidia-smi` is reported as `gpu_available: false`, matching the
    /// original's `get_gpu_info` fallback.
    pub async fn sample(&self) -> ResourceSample {
        let (memory_total, memory_used, memory_percent, cpu_usage) = {
            let mut system = self.system.lock().expect("resource probe mutex poisoned");
            system.refresh_cpu_usage();
            system.refresh_memory();
            let total = system.total_memory();
            let used = system.used_memory();
            let percent = if total > 0 {
                used as f64 / total as f64 * 100.0
            } else {
                0.0
            };
            let cpu = system.global_cpu_usage() as f64;
            (total, used, percent, cpu)
        };

        let gpu = probe_gpu().await;

        ResourceSample {
            memory_total,
            memory_used,
            memory_percent,
            cpu_usage,
            gpu_available: gpu.available,
            gpu_memory_total: gpu.memory_total,
            gpu_memory_used: gpu.memory_used,
            gpu_memory_percent: gpu.memory_percent,
        }
    }
}

impl Default for ResourceProbe {
    fn default() -> Self {
        Self::new()
    }
}

/// Shells out to `nvidia-smi`, taking the first reported GPU (the
/// original's `get_gpu_memory_usage` only ever looks at `gpus[0]`).
async fn probe_gpu() -> GpuSample {
    let output = tokio::process::Command::new("nvidia-smi")
        .args(["--query-gpu=memory.total,memory.used", "--format=csv,noheader,nounits"])
        .output()
        .await;

    match output {
        Ok(out) if out.status.success() => parse_gpu_output(&String::from_utf8_lossy(&out.stdout))
            .unwrap_or_else(|| {
                tracing::warn!("nvidia-smi output was not in the expected csv format");
                GpuSample::default()
            }),
        Ok(out) => {
            tracing::warn!(status = ?out.status.code(), "nvidia-smi exited non-zero");
            GpuSample::default()
        },
        Err(error) => {
            tracing::warn!(%error, "nvidia-smi is not available; reporting no GPU");
            GpuSample::default()
        },
    }
}

fn parse_gpu_output(stdout: &str) -> Option<GpuSample> {
    let first_line = stdout.lines().next()?;
    let mut parts = first_line.split(',').map(str::trim);
    let total: u64 = parts.next()?.parse().ok()?;
    let used: u64 = parts.next()?.parse().ok()?;
    let percent = if total > 0 { used as f64 / total as f64 * 100.0 } else { 0.0 };
    Some(GpuSample { available: true, memory_total: total, memory_used: used, memory_percent: percent })
}
