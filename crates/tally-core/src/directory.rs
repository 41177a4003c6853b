//! Data directory layout for Tally
//!
//! ```text
//! <data_dir>/
//!   config.toml
//!   tally.db
//!   captures/   copies of analyzed images
//!   logs/       daily-rolling log files
//! ```

use std::fs;
use std::path::{Path, PathBuf};

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

use crate::error::ConfigError;

const CAPTURES_DIR: &str = "captures";
const LOGS_DIR: &str = "logs";
const SUBDIRECTORIES: &[&str] = &[CAPTURES_DIR, LOGS_DIR];

/// Owner-only access; captures may show personal data
#[cfg(unix)]
const DIR_PERMISSION_MODE: u32 = 0o700;

/// Manages the Tally data directory structure
#[derive(Debug, Clone)]
pub struct DirectoryManager {
    data_dir: PathBuf,
}

impl DirectoryManager {
    pub fn new(data_dir: PathBuf) -> Self {
        Self { data_dir }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn captures_dir(&self) -> PathBuf {
        self.data_dir.join(CAPTURES_DIR)
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.data_dir.join(LOGS_DIR)
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("tally.db")
    }

    pub fn config_path(&self) -> PathBuf {
        self.data_dir.join("config.toml")
    }

    /// Creates the data directory and its subdirectories
    ///
    /// Idempotent. On Unix every directory is (re)set to mode 700.
    ///
    /// # Errors
    /// Returns `ConfigError::Io` if directory creation fails
    pub fn initialize(&self) -> Result<(), ConfigError> {
        Self::ensure_directory(&self.data_dir)?;
        for subdir in SUBDIRECTORIES {
            Self::ensure_directory(&self.data_dir.join(subdir))?;
        }

        tracing::info!("Initialized Tally data directory at {:?}", self.data_dir);
        Ok(())
    }

    fn ensure_directory(path: &Path) -> Result<(), ConfigError> {
        if !path.exists() {
            fs::create_dir_all(path)?;
            tracing::debug!("Created directory: {:?}", path);
        }

        #[cfg(unix)]
        fs::set_permissions(path, fs::Permissions::from_mode(DIR_PERMISSION_MODE))?;

        Ok(())
    }

    /// Checks if the directory structure is in place
    pub fn is_initialized(&self) -> bool {
        self.data_dir.exists()
            && SUBDIRECTORIES
                .iter()
                .all(|subdir| self.data_dir.join(subdir).exists())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_paths() {
        let manager = DirectoryManager::new(PathBuf::from("/tmp/test-tally"));
        assert_eq!(manager.data_dir(), Path::new("/tmp/test-tally"));
        assert_eq!(
            manager.captures_dir(),
            PathBuf::from("/tmp/test-tally/captures")
        );
        assert_eq!(manager.logs_dir(), PathBuf::from("/tmp/test-tally/logs"));
        assert_eq!(
            manager.database_path(),
            PathBuf::from("/tmp/test-tally/tally.db")
        );
        assert_eq!(
            manager.config_path(),
            PathBuf::from("/tmp/test-tally/config.toml")
        );
    }

    #[test]
    fn test_initialize_creates_directories() {
        let temp_dir = TempDir::new().unwrap();
        let data_dir = temp_dir.path().join(".tally");
        let manager = DirectoryManager::new(data_dir.clone());

        assert!(!manager.is_initialized());

        manager
            .initialize()
            .expect("Failed to initialize directories");

        assert!(data_dir.join("captures").exists());
        assert!(data_dir.join("logs").exists());
        assert!(manager.is_initialized());
    }

    #[test]
    fn test_initialize_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let manager = DirectoryManager::new(temp_dir.path().join(".tally"));

        manager.initialize().expect("First initialization failed");
        manager.initialize().expect("Second initialization failed");

        assert!(manager.is_initialized());
    }

    #[cfg(unix)]
    #[test]
    fn test_initialize_sets_permissions() {
        let temp_dir = TempDir::new().unwrap();
        let data_dir = temp_dir.path().join(".tally");

        // Pre-existing directory with loose permissions gets tightened
        fs::create_dir_all(data_dir.join("captures")).unwrap();
        fs::set_permissions(
            data_dir.join("captures"),
            fs::Permissions::from_mode(0o755),
        )
        .unwrap();

        DirectoryManager::new(data_dir.clone())
            .initialize()
            .expect("Failed to initialize directories");

        for path in [data_dir.clone(), data_dir.join("captures"), data_dir.join("logs")] {
            let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
            assert_eq!(mode, 0o700, "{:?} should have 700 permissions", path);
        }
    }

    #[test]
    fn test_is_initialized_false_when_missing_subdirs() {
        let temp_dir = TempDir::new().unwrap();
        let data_dir = temp_dir.path().join(".tally");
        fs::create_dir_all(&data_dir).unwrap();

        assert!(!DirectoryManager::new(data_dir).is_initialized());
    }
}
