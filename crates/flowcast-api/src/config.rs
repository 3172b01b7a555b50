//! Loading `flowcast.toml`.

use std::path::Path;

use anyhow::Context;
use flowcast_types::config::FlowcastConfig;

/// Read the config at `path`. A missing path or file yields defaults;
/// a file that exists but does not parse is an error.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<FlowcastConfig> {
    let Some(path) = path else {
        return Ok(FlowcastConfig::default());
    };
    if !path.exists() {
        tracing::info!(path = %path.display(), "Config file not found, using defaults");
        return Ok(FlowcastConfig::default());
    }

    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let config: FlowcastConfig =
        toml::from_str(&raw).with_context(|| format!("invalid config in {}", path.display()))?;
    tracing::debug!(path = %path.display(), "Loaded config");
    Ok(config)
}

#[cfg(test)]
mod tests {
    use flowcast_types::config::OutputMode;

    use super::*;

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(config.server.bind, "127.0.0.1:8080");
        assert_eq!(load_config(None).unwrap().stream.channel_capacity, 256);
    }

    #[test]
    fn test_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flowcast.toml");
        std::fs::write(&path, "[stream]\noutput_mode = \"typewriter\"\n").unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.stream.output_mode, OutputMode::Typewriter);
    }

    #[test]
    fn test_malformed_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flowcast.toml");
        std::fs::write(&path, "[stream\n").unwrap();

        let err = load_config(Some(&path)).unwrap_err();
        assert!(err.to_string().contains("invalid config"));
    }
}
