//! Centralized path functions for all app storage locations.

use std::path::PathBuf;

const APP_DIR: &str = "reelgrab";

/// App config root: `~/.config/reelgrab/` (Linux) or `~/Library/Application Support/reelgrab/` (macOS).
pub fn app_config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(APP_DIR))
}

/// App cache root: `~/.cache/reelgrab/` (Linux) or `~/Library/Caches/reelgrab/` (macOS).
pub fn app_cache_dir() -> Option<PathBuf> {
    dirs::cache_dir().map(|d| d.join(APP_DIR))
}

/// Default config file: `<app_config_dir>/config.toml`.
pub fn config_file() -> Option<PathBuf> {
    app_config_dir().map(|d| d.join("config.toml"))
}

/// Optional cookie jar handed to the tool: `<app_config_dir>/cookies.txt`.
pub fn cookies_file() -> Option<PathBuf> {
    app_config_dir().map(|d| d.join("cookies.txt"))
}

/// Artifact scratch directory: `<app_cache_dir>/scratch/`, or the system
/// temp dir when no cache dir is known.
pub fn scratch_dir() -> PathBuf {
    app_cache_dir()
        .map(|d| d.join("scratch"))
        .unwrap_or_else(|| std::env::temp_dir().join(APP_DIR).join("scratch"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_are_namespaced() {
        if let Some(dir) = app_cache_dir() {
            assert!(dir.ends_with("reelgrab"));
        }
        if let Some(file) = config_file() {
            assert!(file.ends_with("reelgrab/config.toml"));
        }
        assert!(scratch_dir().ends_with("reelgrab/scratch"));
    }
}
