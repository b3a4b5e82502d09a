mod types;

pub use types::*;

use anyhow::{Context, Result};
use std::net::IpAddr;
use std::path::Path;

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    validate_config(&config)?;

    Ok(config)
}

/// Load config from default locations or return default config
pub fn load_config_or_default(custom_path: Option<&Path>) -> Result<Config> {
    if let Some(path) = custom_path {
        return load_config(path);
    }

    // Try default locations
    let default_paths = [
        "./mediafeed.toml",
        "~/.config/mediafeed/config.toml",
        "/etc/mediafeed/config.toml",
    ];

    for path_str in default_paths {
        let path = shellexpand::tilde(path_str);
        let path = Path::new(path.as_ref());
        if path.exists() {
            return load_config(path);
        }
    }

    Ok(Config::default())
}

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<()> {
    for ip in &config.server.allowed_ips {
        if ip.trim().parse::<IpAddr>().is_err() {
            anyhow::bail!("Allowed IP '{}' is not a valid address", ip);
        }
    }

    let buffer = &config.buffer;
    if buffer.block_size == 0 {
        anyhow::bail!("Buffer block size cannot be 0");
    }
    if buffer.capacity_blocks < 2 {
        anyhow::bail!(
            "Buffer must hold at least 2 blocks, got {}",
            buffer.capacity_blocks
        );
    }
    // Producers run one block past the look-ahead, and the block the
    // furthest reader waits on must still be resident.
    if buffer.ahead_blocks == 0 || buffer.ahead_blocks + 1 >= buffer.capacity_blocks {
        anyhow::bail!(
            "Look-ahead ({}) must be between 1 and two less than the buffer capacity ({})",
            buffer.ahead_blocks,
            buffer.capacity_blocks
        );
    }
    if buffer.liveness_tick_ms == 0 {
        anyhow::bail!("Liveness tick cannot be 0");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        validate_config(&config).unwrap();
        assert_eq!(config.buffer.block_size, 1024 * 1024);
        assert_eq!(config.server.port, 8200);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mediafeed.toml");
        std::fs::write(
            &path,
            "[server]\nallowed_ips = [\"192.168.1.20\"]\n\n[buffer]\ncapacity_blocks = 8\nahead_blocks = 3\n",
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.buffer.capacity_blocks, 8);
        assert_eq!(config.buffer.ahead_blocks, 3);
        assert_eq!(config.buffer.block_size, 1024 * 1024);
        assert_eq!(
            config.server.allowed_addrs(),
            vec!["192.168.1.20".parse::<IpAddr>().unwrap()]
        );
    }

    #[test]
    fn test_rejects_look_ahead_past_capacity() {
        let mut config = Config::default();
        config.buffer.capacity_blocks = 4;
        config.buffer.ahead_blocks = 4;
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("Look-ahead"));

        config.buffer.ahead_blocks = 3;
        assert!(validate_config(&config).is_err());
        config.buffer.ahead_blocks = 2;
        validate_config(&config).unwrap();
    }

    #[test]
    fn test_rejects_bad_allowed_ip() {
        let mut config = Config::default();
        config.server.allowed_ips = vec!["renderer.local".to_string()];
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_custom_path_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(load_config_or_default(Some(&missing)).is_err());
    }
}
