//! Typed configuration structs. No file/YAML loading lives here; the
//! `central-server` binary builds these from `clap`-parsed CLI flags
//! and environment variables instead.

use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DeviceConfig {
    #[serde(default = "default_staleness_threshold_ms")]
    pub staleness_threshold_ms: i64,
}

fn default_staleness_threshold_ms() -> i64 {
    120_000
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            staleness_threshold_ms: default_staleness_threshold_ms(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CommandConfig {
    #[serde(default = "default_command_timeout_ms")]
    pub default_timeout_ms: u64,
}

fn default_command_timeout_ms() -> u64 {
    30_000
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: default_command_timeout_ms(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ChangesetConfig {
    #[serde(default = "default_max_active_changesets")]
    pub max_active: usize,
    #[serde(default = "default_changeset_retention_secs")]
    pub retention_secs: u64,
}

fn default_max_active_changesets() -> usize {
    50
}

fn default_changeset_retention_secs() -> u64 {
    86_400
}

impl Default for ChangesetConfig {
    fn default() -> Self {
        Self {
            max_active: default_max_active_changesets(),
            retention_secs: default_changeset_retention_secs(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
}

fn default_queue_size() -> usize {
    4096
}

fn default_worker_count() -> usize {
    4
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            queue_size: default_queue_size(),
            worker_count: default_worker_count(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub command: CommandConfig,
    #[serde(default)]
    pub changeset: ChangesetConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
}
