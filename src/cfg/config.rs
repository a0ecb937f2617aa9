// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::time::Duration;

use anyhow::{Context, Result, ensure};

/// Process-wide configuration, assembled from the environment variables
/// listed in §6. Every field has the same default as the Python original's
/// `Config` dataclass, except `node_id`, which defaults to a freshly
/// generated UUID instead of a fixed string literal — a fleet of workers
/// sharing the original's `whisper-node-1` default would collide on first
/// boot, which spec.md's uniqueness invariant forbids.
#[derive(Debug, Clone)]
pub struct Config {
    pub node_id: String,
    pub host: String,
    pub port: u16,

    pub redis_host: String,
    pub redis_port: u16,
    pub redis_password: Option<String>,
    pub redis_db: u8,

    pub db_host: String,
    pub db_port: u16,
    pub db_name: String,
    pub db_user: String,
    pub db_password: String,

    pub whisper_model_size: String,
    pub transcribe_concurrency: usize,

    pub max_concurrent_tasks: u32,
    pub heartbeat_interval: Duration,
    pub task_timeout: Duration,

    pub result_dir: String,

    pub translation_api_key: Option<String>,
    pub google_translate_api_key: Option<String>,
    pub deepl_api_key: Option<String>,
    pub deepl_api_url: String,
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> Result<T> {
    match std::env::var(key) {
        Ok(v) if !v.is_empty() => v
            .parse()
            .map_err(|_| anyhow::anyhow!("invalid value for {key}: {v:?}")),
        _ => Ok(default),
    }
}

impl Config {
    /// Loads configuration from the process environment, optionally having
    /// first merged a `.env` file (mirrors `dotenv.load_dotenv()` in the
    /// original). Missing `.env` is not an error.
    pub fn load_from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();

        let cfg = Config {
            node_id: env_string(
                "NODE_ID",
                &format!("worker-{}", uuid::Uuid::new_v4()),
            ),
            host: env_string("HOST", "localhost"),
            port: env_parsed("PORT", 8001u16).context("PORT")?,

            redis_host: env_string("REDIS_HOST", "localhost"),
            redis_port: env_parsed("REDIS_PORT", 6379u16).context("REDIS_PORT")?,
            redis_password: env_opt_string("REDIS_PASSWORD"),
            redis_db: env_parsed("REDIS_DB", 0u8).context("REDIS_DB")?,

            db_host: env_string("DB_HOST", "localhost"),
            db_port: env_parsed("DB_PORT", 3306u16).context("DB_PORT")?,
            db_name: env_string("DB_NAME", "giggle_translation"),
            db_user: env_string("DB_USER", "root"),
            db_password: env_string("DB_PASSWORD", ""),

            whisper_model_size: env_string("WHISPER_MODEL_SIZE", "large-v3"),
            transcribe_concurrency: env_parsed("TRANSCRIBE_CONCURRENCY", 1usize)
                .context("TRANSCRIBE_CONCURRENCY")?,

            max_concurrent_tasks: env_parsed("MAX_CONCURRENT_TASKS", 3u32)
                .context("MAX_CONCURRENT_TASKS")?,
            heartbeat_interval: Duration::from_secs(
                env_parsed("HEARTBEAT_INTERVAL", 30u64).context("HEARTBEAT_INTERVAL")?,
            ),
            task_timeout: Duration::from_secs(
                env_parsed("TASK_TIMEOUT", 1800u64).context("TASK_TIMEOUT")?,
            ),

            result_dir: env_string("RESULT_DIR", "/tmp/translation_results"),

            translation_api_key: env_opt_string("TRANSLATION_API_KEY"),
            google_translate_api_key: env_opt_string("GOOGLE_TRANSLATE_API_KEY"),
            deepl_api_key: env_opt_string("DEEPL_API_KEY"),
            deepl_api_url: env_string("DEEPL_API_URL", "https://api-free.deepl.com"),
        };

        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<()> {
        ensure!(!self.node_id.is_empty(), "NODE_ID must not be empty");
        ensure!(
            self.max_concurrent_tasks >= 1,
            "MAX_CONCURRENT_TASKS must be >= 1"
        );
        ensure!(
            self.transcribe_concurrency >= 1,
            "TRANSCRIBE_CONCURRENCY must be >= 1"
        );
        Ok(())
    }

    /// MySQL connection string for `sqlx::MySqlPool`, mirroring the
    /// original's `database_url` property.
    pub fn database_url(&self) -> String {
        format!(
            "mysql://{}:{}@{}:{}/{}",
            self.db_user, self.db_password, self.db_host, self.db_port, self.db_name
        )
    }
}
