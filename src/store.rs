// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Persistent Store Client (§4.5): MySQL-backed task bookkeeping via
//! `sqlx::MySqlPool`, mirroring `database_service.py`'s four operations.
//!
//! Resolves Open Question 1: `update_task_status`'s `accuracy` and
//! `text_content` columns use `COALESCE(?, column)` rather than the
//! original's unconditional overwrite, so a status transition that
//! doesn't carry a new accuracy/text value (e.g. the initial PROCESSING
//! write) can't clobber a value written earlier in the same task's
//! lifecycle.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{MySql, MySqlPool, mysql::MySqlPoolOptions};

use crate::{cfg::config::Config, task::TaskStatus};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

/// Object-safe view of the persistent store the Worker Engine depends
/// on, so the engine's task lifecycle can be driven against an
/// in-memory fake in tests instead of a live MySQL instance.
#[async_trait]
pub trait Store: Send + Sync {
    async fn update_task_status(
        &self,
        task_id: &str,
        status: TaskStatus,
        update: StatusUpdate<'_>,
    ) -> Result<bool, StoreError>;

    async fn update_task_assigned_node(&self, task_id: &str, node_id: &str) -> Result<bool, StoreError>;

    async fn increment_retry_count(&self, task_id: &str) -> Result<bool, StoreError>;
}

/// A task row as read back by [`StoreClient::get_task_details`].
/// `target_languages` is stored as the comma-separated string the schema
/// defines it as (`VARCHAR(500)`), not a JSON array — callers that need
/// the list split it themselves.
#[derive(Debug, Clone)]
pub struct TaskDetails {
    pub id: String,
    pub status: TaskStatus,
    pub audio_file_path: Option<String>,
    pub text_content: Option<String>,
    pub source_language: String,
    pub target_languages: String,
    pub assigned_node_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub result_file_path: Option<String>,
    pub error_message: Option<String>,
    pub retry_count: i32,
}

/// Fields for a status-transition write. Every field besides `status` is
/// optional; `None` leaves the corresponding column untouched.
#[derive(Debug, Clone, Default)]
pub struct StatusUpdate<'a> {
    pub result_path: Option<&'a str>,
    pub error_message: Option<&'a str>,
    pub accuracy: Option<f64>,
    pub transcribed_text: Option<&'a str>,
}

pub struct StoreClient {
    pool: MySqlPool,
}

impl StoreClient {
    pub async fn connect(cfg: &Config) -> Result<Self, StoreError> {
        let pool = MySqlPoolOptions::new()
            .max_connections(cfg.max_concurrent_tasks + 2)
            .connect(&cfg.database_url())
            .await?;
        Ok(Self { pool })
    }

    /// Writes a task status transition. Returns whether a row was
    /// matched, matching the original's `rowcount > 0` check — a `false`
    /// means the task id does not exist and is logged by the caller, not
    /// treated as an error.
    pub async fn update_task_status(
        &self,
        task_id: &str,
        status: TaskStatus,
        update: StatusUpdate<'_>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query::<MySql>(
            "UPDATE translation_tasks SET \
                status = ?, \
                updated_at = ?, \
                accuracy = COALESCE(?, accuracy), \
                text_content = COALESCE(?, text_content), \
                result_file_path = COALESCE(?, result_file_path), \
                error_message = COALESCE(?, error_message) \
             WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(Utc::now())
        .bind(update.accuracy)
        .bind(update.transcribed_text)
        .bind(update.result_path)
        .bind(update.error_message)
        .bind(task_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn get_task_details(&self, task_id: &str) -> Result<Option<TaskDetails>, StoreError> {
        let row = sqlx::query_as::<
            _,
            (
                String,
                String,
                Option<String>,
                Option<String>,
                String,
                String,
                Option<String>,
                DateTime<Utc>,
                DateTime<Utc>,
                Option<String>,
                Option<String>,
                i32,
            ),
        >(
            "SELECT id, status, audio_file_path, text_content, source_language, \
                    target_languages, assigned_node_id, created_at, updated_at, \
                    result_file_path, error_message, retry_count \
             FROM translation_tasks WHERE id = ?",
        )
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(
            |(
                id,
                status,
                audio_file_path,
                text_content,
                source_language,
                target_languages,
                assigned_node_id,
                created_at,
                updated_at,
                result_file_path,
                error_message,
                retry_count,
            )| TaskDetails {
                id,
                status: parse_task_status(&status),
                audio_file_path,
                text_content,
                source_language,
                target_languages,
                assigned_node_id,
                created_at,
                updated_at,
                result_file_path,
                error_message,
                retry_count,
            },
        ))
    }

    pub async fn update_task_assigned_node(
        &self,
        task_id: &str,
        node_id: &str,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query::<MySql>(
            "UPDATE translation_tasks SET assigned_node_id = ?, updated_at = ? WHERE id = ?",
        )
        .bind(node_id)
        .bind(Utc::now())
        .bind(task_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn increment_retry_count(&self, task_id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query::<MySql>(
            "UPDATE translation_tasks SET retry_count = retry_count + 1, updated_at = ? WHERE id = ?",
        )
        .bind(Utc::now())
        .bind(task_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl Store for StoreClient {
    async fn update_task_status(
        &self,
        task_id: &str,
        status: TaskStatus,
        update: StatusUpdate<'_>,
    ) -> Result<bool, StoreError> {
        StoreClient::update_task_status(self, task_id, status, update).await
    }

    async fn update_task_assigned_node(&self, task_id: &str, node_id: &str) -> Result<bool, StoreError> {
        StoreClient::update_task_assigned_node(self, task_id, node_id).await
    }

    async fn increment_retry_count(&self, task_id: &str) -> Result<bool, StoreError> {
        StoreClient::increment_retry_count(self, task_id).await
    }
}

fn parse_task_status(raw: &str) -> TaskStatus {
    match raw {
        "PENDING" => TaskStatus::Pending,
        "PROCESSING" => TaskStatus::Processing,
        "COMPLETED" => TaskStatus::Completed,
        "FAILED" => TaskStatus::Failed,
        "CANCELLED" => TaskStatus::Cancelled,
        other => {
            tracing::warn!(status = other, "unrecognized task status in database row; treating as FAILED");
            TaskStatus::Failed
        },
    }
}
