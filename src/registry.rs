// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Registry Client (§4.2): the shared Redis-backed fleet registry. Mirrors
//! the original's key layout exactly, since other nodes and the scheduler
//! on the other side of Redis depend on it:
//!
//! - `worker_nodes:{nodeId}` — hash, the node's published record, TTL'd to
//!   3x the heartbeat interval so a crashed node disappears on its own.
//! - `active_nodes` — set of node ids currently registered.
//! - `node_rankings` — sorted set, node id -> score (lower is better).
//! - `task_queue:{nodeId}` — list, `BRPOP`'d for new task payloads.
//! - `control_queue:{nodeId}` — list, `BRPOP`'d for control messages.

use std::time::Duration;

use async_trait::async_trait;
use redis::{AsyncCommands, aio::ConnectionManager};

use crate::{
    cfg::config::Config,
    task::{ControlMessage, NodeRecord, NodeStatus, TaskPayload},
};

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("invalid task or control payload: {0}")]
    Json(#[from] serde_json::Error),
}

/// Object-safe view of the registry the Worker Engine depends on, so it
/// can be driven against an in-memory fake in tests instead of a live
/// Redis instance.
#[async_trait]
pub trait Registry: Send + Sync {
    async fn publish(&self, record: &NodeRecord, heartbeat_interval: Duration) -> Result<(), RegistryError>;
    async fn update_ranking(&self, node_id: &str, score: f64) -> Result<(), RegistryError>;
    async fn remove_ranking(&self, node_id: &str) -> Result<(), RegistryError>;
    async fn unregister(&self, node_id: &str) -> Result<(), RegistryError>;
    async fn pop_task(&self, node_id: &str) -> Result<Option<TaskPayload>, RegistryError>;
    async fn pop_control_message(&self, node_id: &str) -> Result<ControlMessage, RegistryError>;
}

pub struct RegistryClient {
    conn: ConnectionManager,
}

fn build_redis_url(cfg: &Config) -> String {
    match &cfg.redis_password {
        Some(password) if !password.is_empty() => format!(
            "redis://:{password}@{}:{}/{}",
            cfg.redis_host, cfg.redis_port, cfg.redis_db
        ),
        _ => format!("redis://{}:{}/{}", cfg.redis_host, cfg.redis_port, cfg.redis_db),
    }
}

/// Flattens a node record into the field/value pairs stored by `HSET`,
/// matching the original's `node_info` dict key-for-key so that other
/// tooling reading `worker_nodes:{nodeId}` sees the same shape.
fn node_hash_fields(record: &NodeRecord) -> Vec<(String, String)> {
    vec![
        ("node_id".to_string(), record.node_id.clone()),
        ("host".to_string(), record.host.clone()),
        ("port".to_string(), record.port.to_string()),
        ("status".to_string(), record.status.as_str().to_string()),
        ("active_task_count".to_string(), record.active_task_count.to_string()),
        ("max_concurrent_tasks".to_string(), record.max_concurrent_tasks.to_string()),
        ("memory_total".to_string(), record.resources.memory_total.to_string()),
        ("memory_used".to_string(), record.resources.memory_used.to_string()),
        ("memory_percent".to_string(), record.resources.memory_percent.to_string()),
        ("cpu_usage".to_string(), record.resources.cpu_usage.to_string()),
        (
            "gpu_available".to_string(),
            if record.resources.gpu_available { "1" } else { "0" }.to_string(),
        ),
        ("gpu_memory_total".to_string(), record.resources.gpu_memory_total.to_string()),
        ("gpu_memory_used".to_string(), record.resources.gpu_memory_used.to_string()),
        ("gpu_memory_percent".to_string(), record.resources.gpu_memory_percent.to_string()),
        ("last_heartbeat".to_string(), record.last_heartbeat.to_rfc3339()),
    ]
}

impl RegistryClient {
    pub async fn connect(cfg: &Config) -> Result<Self, RegistryError> {
        let client = redis::Client::open(build_redis_url(cfg))?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }

    /// Publishes the node's record and refreshes its TTL/membership. Used
    /// both for initial registration and for every heartbeat — the
    /// original re-sends the full hash each time rather than patching
    /// individual fields.
    pub async fn publish(
        &self,
        record: &NodeRecord,
        heartbeat_interval: Duration,
    ) -> Result<(), RegistryError> {
        let mut conn = self.conn.clone();
        let node_key = format!("worker_nodes:{}", record.node_id);
        let fields = node_hash_fields(record);
        conn.hset_multiple::<_, _, _, ()>(&node_key, &fields).await?;
        conn.expire::<_, ()>(&node_key, heartbeat_interval.as_secs() as i64 * 3)
            .await?;
        conn.sadd::<_, _, ()>("active_nodes", &record.node_id).await?;
        Ok(())
    }

    /// Publishes the record and, if the node is online, updates its
    /// ranking score (§4.2). Offline/shutting-down nodes are never ranked.
    pub async fn heartbeat(
        &self,
        record: &NodeRecord,
        heartbeat_interval: Duration,
    ) -> Result<(), RegistryError> {
        self.publish(record, heartbeat_interval).await?;
        if record.status == NodeStatus::Online {
            self.update_ranking(&record.node_id, record.score()).await?;
        }
        Ok(())
    }

    pub async fn update_ranking(&self, node_id: &str, score: f64) -> Result<(), RegistryError> {
        let mut conn = self.conn.clone();
        conn.zadd::<_, _, _, ()>("node_rankings", node_id, score).await?;
        Ok(())
    }

    pub async fn remove_ranking(&self, node_id: &str) -> Result<(), RegistryError> {
        let mut conn = self.conn.clone();
        conn.zrem::<_, _, ()>("node_rankings", node_id).await?;
        Ok(())
    }

    /// Deregisters a node entirely: membership, record, its task queue,
    /// and its ranking.
    pub async fn unregister(&self, node_id: &str) -> Result<(), RegistryError> {
        let mut conn = self.conn.clone();
        conn.srem::<_, _, ()>("active_nodes", node_id).await?;
        conn.del::<_, ()>(format!("worker_nodes:{node_id}")).await?;
        conn.del::<_, ()>(format!("task_queue:{node_id}")).await?;
        conn.zrem::<_, _, ()>("node_rankings", node_id).await?;
        Ok(())
    }

    /// Pops one task payload from this node's queue, waiting up to one
    /// second (§4.2's `brpop(timeout=1)`). `Ok(None)` means the queue was
    /// empty within the wait window, not an error.
    pub async fn pop_task(&self, node_id: &str) -> Result<Option<TaskPayload>, RegistryError> {
        let mut conn = self.conn.clone();
        let queue_key = format!("task_queue:{node_id}");
        let reply: Option<(String, String)> = conn.brpop(queue_key, 1.0).await?;
        match reply {
            Some((_, json)) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// Blocks indefinitely for the next control message (cancellation
    /// etc.) on this node's control queue, as the original's
    /// `check_control_messages` does with an untimed `BRPOP`.
    pub async fn pop_control_message(&self, node_id: &str) -> Result<ControlMessage, RegistryError> {
        let mut conn = self.conn.clone();
        let control_key = format!("control_queue:{node_id}");
        let (_, json): (String, String) = conn.brpop(control_key, 0.0).await?;
        Ok(serde_json::from_str(&json)?)
    }
}

#[async_trait]
impl Registry for RegistryClient {
    async fn publish(&self, record: &NodeRecord, heartbeat_interval: Duration) -> Result<(), RegistryError> {
        RegistryClient::publish(self, record, heartbeat_interval).await
    }

    async fn update_ranking(&self, node_id: &str, score: f64) -> Result<(), RegistryError> {
        RegistryClient::update_ranking(self, node_id, score).await
    }

    async fn remove_ranking(&self, node_id: &str) -> Result<(), RegistryError> {
        RegistryClient::remove_ranking(self, node_id).await
    }

    async fn unregister(&self, node_id: &str) -> Result<(), RegistryError> {
        RegistryClient::unregister(self, node_id).await
    }

    async fn pop_task(&self, node_id: &str) -> Result<Option<TaskPayload>, RegistryError> {
        RegistryClient::pop_task(self, node_id).await
    }

    async fn pop_control_message(&self, node_id: &str) -> Result<ControlMessage, RegistryError> {
        RegistryClient::pop_control_message(self, node_id).await
    }
}
