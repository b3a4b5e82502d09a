use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub buffer: BufferConfig,

    #[serde(default)]
    pub upstream: UpstreamConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on (0 picks an ephemeral port)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Renderer addresses allowed to fetch media (empty = allow all)
    #[serde(default)]
    pub allowed_ips: Vec<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8200
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            allowed_ips: Vec::new(),
        }
    }
}

impl ServerConfig {
    /// Parsed allow-list. Entries that fail to parse are skipped; `validate_config`
    /// rejects them up front.
    pub fn allowed_addrs(&self) -> Vec<IpAddr> {
        self.allowed_ips
            .iter()
            .filter_map(|ip| ip.trim().parse().ok())
            .collect()
    }
}

/// Geometry of the shared ring buffer.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BufferConfig {
    /// Size of one block in bytes (default: 1 MiB)
    #[serde(default = "default_block_size")]
    pub block_size: usize,

    /// Number of blocks held in memory (default: 48)
    #[serde(default = "default_capacity_blocks")]
    pub capacity_blocks: usize,

    /// Blocks produced ahead of the furthest reader (default: 16)
    #[serde(default = "default_ahead_blocks")]
    pub ahead_blocks: usize,

    /// Period at which blocked threads re-check for shutdown (default: 500ms)
    #[serde(default = "default_liveness_tick_ms")]
    pub liveness_tick_ms: u64,
}

fn default_block_size() -> usize {
    1024 * 1024
}

fn default_capacity_blocks() -> usize {
    48
}

fn default_ahead_blocks() -> usize {
    16
}

fn default_liveness_tick_ms() -> u64 {
    500
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            block_size: default_block_size(),
            capacity_blocks: default_capacity_blocks(),
            ahead_blocks: default_ahead_blocks(),
            liveness_tick_ms: default_liveness_tick_ms(),
        }
    }
}

impl BufferConfig {
    pub fn liveness_tick(&self) -> Duration {
        Duration::from_millis(self.liveness_tick_ms)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UpstreamConfig {
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_read_timeout() -> u64 {
    30
}

fn default_user_agent() -> String {
    format!("mediafeed/{}", env!("CARGO_PKG_VERSION"))
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout(),
            read_timeout_secs: default_read_timeout(),
            user_agent: default_user_agent(),
        }
    }
}
