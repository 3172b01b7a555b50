//! Service configuration for Flowcast.
//!
//! `FlowcastConfig` is the top-level `flowcast.toml`. Every section and
//! field has a default so an empty (or missing) file yields a runnable
//! single-instance setup.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlowcastConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub resume: ResumeConfig,
    #[serde(default)]
    pub lock: LockConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Interval between SSE keep-alive comments.
    #[serde(default = "default_keep_alive_secs")]
    pub web_keep_alive_secs: u64,
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_keep_alive_secs() -> u64 {
    15
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            web_keep_alive_secs: default_keep_alive_secs(),
        }
    }
}

/// Where and how to reach the workflow execution backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default = "default_chat_url")]
    pub chat_url: String,
    #[serde(default = "default_debug_url")]
    pub debug_url: String,
    #[serde(default = "default_resume_url")]
    pub resume_url: String,
    #[serde(default = "default_comparison_url")]
    pub comparison_url: String,
    #[serde(default)]
    pub app_key: String,
    #[serde(default)]
    pub app_secret: String,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Longest gap tolerated between two upstream events.
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
}

fn default_chat_url() -> String {
    "http://127.0.0.1:7880/workflow/v1/chat/completions".to_string()
}

fn default_debug_url() -> String {
    "http://127.0.0.1:7880/workflow/v1/debug/chat/completions".to_string()
}

fn default_resume_url() -> String {
    "http://127.0.0.1:7880/workflow/v1/resume".to_string()
}

fn default_comparison_url() -> String {
    "http://127.0.0.1:7880/workflow/v1/comparisons".to_string()
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_idle_timeout_secs() -> u64 {
    120
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            chat_url: default_chat_url(),
            debug_url: default_debug_url(),
            resume_url: default_resume_url(),
            comparison_url: default_comparison_url(),
            app_key: String::new(),
            app_secret: String::new(),
            connect_timeout_secs: default_connect_timeout_secs(),
            idle_timeout_secs: default_idle_timeout_secs(),
        }
    }
}

impl UpstreamConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

/// How reordered frames are paced out to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    /// Forward each reordered frame unchanged.
    #[default]
    Direct,
    /// Re-emit message text one character per frame.
    Typewriter,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    #[serde(default)]
    pub output_mode: OutputMode,
    /// Delay after every non-letter character in typewriter mode.
    #[serde(default = "default_typewriter_interval_ms")]
    pub typewriter_interval_ms: u64,
    /// Delay after ASCII letters in typewriter mode.
    #[serde(default = "default_letter_interval_ms")]
    pub letter_interval_ms: u64,
    /// Frames buffered between the session task and the HTTP response.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_typewriter_interval_ms() -> u64 {
    20
}

fn default_letter_interval_ms() -> u64 {
    1
}

fn default_channel_capacity() -> usize {
    256
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            output_mode: OutputMode::default(),
            typewriter_interval_ms: default_typewriter_interval_ms(),
            letter_interval_ms: default_letter_interval_ms(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

/// Where pause markers are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStoreKind {
    /// Process memory; pauses are lost on restart.
    Memory,
    /// The `pause_markers` table, shared by every instance on the database.
    #[default]
    Sqlite,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResumeConfig {
    #[serde(default)]
    pub store: SessionStoreKind,
    /// Lifetime of a pause marker. Expiry is the only cleanup for abandoned pauses.
    #[serde(default = "default_marker_ttl_secs")]
    pub marker_ttl_secs: u64,
}

fn default_marker_ttl_secs() -> u64 {
    86_400
}

impl Default for ResumeConfig {
    fn default() -> Self {
        Self {
            store: SessionStoreKind::default(),
            marker_ttl_secs: default_marker_ttl_secs(),
        }
    }
}

impl ResumeConfig {
    pub fn marker_ttl(&self) -> Duration {
        Duration::from_secs(self.marker_ttl_secs)
    }
}

/// Which lock backend guards cross-session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockBackendKind {
    /// In-process locks; correct for a single instance only.
    #[default]
    Local,
    /// Lease rows in the shared SQLite database.
    Sqlite,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    #[serde(default)]
    pub backend: LockBackendKind,
    #[serde(default = "default_publish_wait_ms")]
    pub publish_wait_ms: u64,
    #[serde(default = "default_publish_lease_ms")]
    pub publish_lease_ms: u64,
}

fn default_publish_wait_ms() -> u64 {
    3_000
}

fn default_publish_lease_ms() -> u64 {
    10_000
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            backend: LockBackendKind::default(),
            publish_wait_ms: default_publish_wait_ms(),
            publish_lease_ms: default_publish_lease_ms(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding `flowcast.db`. Resolved at startup when absent.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}
