//! Data directory layout and `config.toml` loading.

use std::path::{Path, PathBuf};
use std::{env, fs};

use sm_core::EngineConfig;

use crate::error::{Result, StoreError};

pub const DATA_DIR_ENV: &str = "SM_DATA_DIR";
pub const CONFIG_FILE: &str = "config.toml";
pub const DATABASE_FILE: &str = "starmap.db";

/// `~/.starmap`, falling back to the working directory without a home.
pub fn default_data_dir() -> PathBuf {
    dirs_home().join(".starmap")
}

fn dirs_home() -> PathBuf {
    env::var("HOME")
        .or_else(|_| env::var("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}

/// Explicit flag, then `SM_DATA_DIR`, then the default.
pub fn resolve_data_dir(explicit: Option<&Path>) -> PathBuf {
    if let Some(dir) = explicit {
        return dir.to_path_buf();
    }
    match env::var(DATA_DIR_ENV) {
        Ok(dir) if !dir.trim().is_empty() => PathBuf::from(dir),
        _ => default_data_dir(),
    }
}

pub fn database_path(data_dir: &Path) -> PathBuf {
    data_dir.join(DATABASE_FILE)
}

/// Load `<data_dir>/config.toml`. A missing file yields defaults; a
/// malformed one is an error.
pub fn load_config(data_dir: &Path) -> Result<EngineConfig> {
    let path = data_dir.join(CONFIG_FILE);
    let text = match fs::read_to_string(&path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(EngineConfig::default());
        }
        Err(e) => return Err(StoreError::io(path, e)),
    };
    parse_config(&text).map_err(|e| StoreError::Config(format!("{}: {e}", path.display())))
}

/// Parse and sanity-check a TOML config.
pub fn parse_config(text: &str) -> std::result::Result<EngineConfig, String> {
    let config: EngineConfig = toml::from_str(text).map_err(|e| e.to_string())?;
    if !(config.rebuild_ratio.is_finite() && config.rebuild_ratio >= 0.0) {
        return Err(format!(
            "rebuild_ratio must be a non-negative number, got {}",
            config.rebuild_ratio
        ));
    }
    if !(config.default_connection_distance.is_finite()
        && config.default_connection_distance >= 0.0)
    {
        return Err(format!(
            "default_connection_distance must be a non-negative number, got {}",
            config.default_connection_distance
        ));
    }
    if config.leaf_size == 0 {
        return Err("leaf_size must be at least 1".to_string());
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_config_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(load_config(dir.path()).unwrap(), EngineConfig::default());
    }

    #[test]
    fn test_partial_config_overrides_one_field() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join(CONFIG_FILE),
            "linear_scan_threshold = 10\nrebuild_ratio = 0.5\n",
        )
        .unwrap();
        let config = load_config(dir.path()).unwrap();
        assert_eq!(config.linear_scan_threshold, 10);
        assert_eq!(config.rebuild_ratio, 0.5);
        assert_eq!(config.leaf_size, EngineConfig::default().leaf_size);
    }

    #[test]
    fn test_custom_tones() {
        let config = parse_config(
            r#"
            [[tones]]
            label = "bright"
            center = [1.0, 0.0, 0.0, 0.0]
            "#,
        )
        .unwrap();
        assert_eq!(config.tones.len(), 1);
        assert_eq!(config.tones[0].label, "bright");
    }

    #[test]
    fn test_malformed_config_is_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(CONFIG_FILE), "leaf_size = \"eight\"").unwrap();
        assert!(matches!(
            load_config(dir.path()),
            Err(StoreError::Config(_))
        ));
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(parse_config("leaf_size = 0").is_err());
        assert!(parse_config("rebuild_ratio = -1.0").is_err());
        assert!(parse_config("default_connection_distance = -0.5").is_err());
    }

    #[test]
    fn test_explicit_data_dir_wins() {
        let dir = Path::new("/tmp/explicit-starmap");
        assert_eq!(resolve_data_dir(Some(dir)), dir.to_path_buf());
        assert_eq!(database_path(dir), dir.join(DATABASE_FILE));
    }
}
