//! Configuration file resolution and TOML loading
//!
//! Config file lookup follows this priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. `./<app>.toml` in the working directory
//! 4. Per-user config directory (`~/.config/<app>/config.toml` on Linux)
//! 5. System-wide `/etc/<app>/config.toml` (Unix only)
//!
//! A missing file is not an error: callers fall back to built-in defaults.

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Locate the configuration file for `app`
///
/// An explicit path (CLI or environment) is returned even if it does not
/// exist, so the caller can report it; discovered paths are only returned when
/// the file is present.
pub fn resolve_config_path(
    cli_arg: Option<&Path>,
    env_var_name: &str,
    app: &str,
) -> Option<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(env_var_name) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    // Priority 3-5: discovered locations
    candidate_paths(app).into_iter().find(|path| {
        let exists = path.is_file();
        debug!("Config candidate {}: {}", path.display(), if exists { "found" } else { "absent" });
        exists
    })
}

/// Discovered config locations in lookup order
fn candidate_paths(app: &str) -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from(format!("{}.toml", app))];

    if let Some(dir) = dirs::config_dir() {
        paths.push(dir.join(app).join("config.toml"));
    }

    if cfg!(unix) {
        paths.push(PathBuf::from("/etc").join(app).join("config.toml"));
    }

    paths
}

/// Read and deserialize a TOML file
pub fn load_toml<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;

    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Failed to parse config file {}: {}", path.display(), e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candidate_paths_start_with_working_directory() {
        let paths = candidate_paths("vigil");
        assert_eq!(paths[0], PathBuf::from("vigil.toml"));
        assert!(paths.len() >= 2);
    }

    #[test]
    fn test_cli_arg_wins_even_if_missing() {
        let path = Path::new("/definitely/not/here.toml");
        assert_eq!(
            resolve_config_path(Some(path), "VIGIL_TEST_UNUSED_VAR", "vigil"),
            Some(path.to_path_buf())
        );
    }
}
