//! Application paths for config, cache, and data.

use directories::{BaseDirs, ProjectDirs};
use std::path::PathBuf;

/// Application paths.
#[derive(Debug, Clone)]
pub struct AppPaths {
    /// Configuration directory.
    pub config: PathBuf,
    /// Cache directory.
    pub cache: PathBuf,
    /// Data directory.
    pub data: PathBuf,
}

impl AppPaths {
    /// Create paths for the switchyard application.
    #[must_use]
    pub fn new() -> Self {
        if let Some(proj_dirs) = ProjectDirs::from("dev", "switchyard", "switchyard") {
            Self {
                config: proj_dirs.config_dir().to_path_buf(),
                cache: proj_dirs.cache_dir().to_path_buf(),
                data: proj_dirs.data_dir().to_path_buf(),
            }
        } else {
            // Fallback to home directory
            let home = BaseDirs::new().map_or_else(|| PathBuf::from("."), |b| b.home_dir().to_path_buf());
            Self {
                config: home.join(".config/switchyard"),
                cache: home.join(".cache/switchyard"),
                data: home.join(".local/share/switchyard"),
            }
        }
    }

    /// Paths rooted under one directory (tests, portable installs).
    #[must_use]
    pub fn under(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            config: root.join("config"),
            cache: root.join("cache"),
            data: root.join("data"),
        }
    }

    /// Path to the config file.
    #[must_use]
    pub fn config_file(&self) -> PathBuf {
        self.config.join("config.toml")
    }

    /// Directory holding persisted conversation windows.
    #[must_use]
    pub fn windows_dir(&self) -> PathBuf {
        self.cache.join("windows")
    }

    /// Snapshot of the cloud tier state, written on every tier change.
    #[must_use]
    pub fn tier_state_file(&self) -> PathBuf {
        self.data.join("tier-state.json")
    }

    /// Ensure all directories exist.
    ///
    /// # Errors
    ///
    /// Returns error if a directory cannot be created.
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.config)?;
        std::fs::create_dir_all(&self.cache)?;
        std::fs::create_dir_all(&self.data)?;
        std::fs::create_dir_all(self.windows_dir())?;
        Ok(())
    }
}

impl Default for AppPaths {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn under_root_layout() {
        let paths = AppPaths::under("/tmp/sy");
        assert_eq!(paths.config_file(), PathBuf::from("/tmp/sy/config/config.toml"));
        assert_eq!(paths.windows_dir(), PathBuf::from("/tmp/sy/cache/windows"));
        assert_eq!(paths.tier_state_file(), PathBuf::from("/tmp/sy/data/tier-state.json"));
    }

    #[test]
    fn ensure_dirs_creates_tree() {
        let dir = tempfile::tempdir().unwrap();
        let paths = AppPaths::under(dir.path());
        paths.ensure_dirs().unwrap();
        assert!(paths.windows_dir().is_dir());
        assert!(paths.data.is_dir());
    }
}
