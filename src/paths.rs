//! Platform directory resolution.
//!
//! Resolved once at startup; the resulting paths are passed explicitly to
//! the store and config loader.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Subdirectory created under the platform data and config directories
pub const APP_DIR_NAME: &str = "lazysmtp";

/// File name of the default message database
pub const DEFAULT_DB_FILE: &str = "lazysmtp.db";

#[derive(Error, Debug)]
pub enum PathError {
    #[error("Could not determine the platform {0} directory")]
    NoPlatformDir(&'static str),

    #[error("Failed to create directory '{path}': {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Source of the base directories the application writes into
pub trait DirectoryResolver {
    /// Base directory for application data
    fn data_dir(&self) -> Option<PathBuf>;

    /// Base directory for configuration files
    fn config_dir(&self) -> Option<PathBuf>;
}

/// Platform conventions via the `dirs` crate: XDG directories on Linux,
/// `~/Library/Application Support` on macOS, `%APPDATA%` on Windows.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlatformDirs;

impl DirectoryResolver for PlatformDirs {
    fn data_dir(&self) -> Option<PathBuf> {
        dirs::data_dir()
    }

    fn config_dir(&self) -> Option<PathBuf> {
        dirs::config_dir()
    }
}

/// Default database path, creating its directory if absent
pub fn default_store_location(resolver: &dyn DirectoryResolver) -> Result<PathBuf, PathError> {
    let base = resolver
        .data_dir()
        .ok_or(PathError::NoPlatformDir("data"))?;
    let dir = base.join(APP_DIR_NAME);
    ensure_dir(&dir)?;
    Ok(dir.join(DEFAULT_DB_FILE))
}

/// Application config directory (not created)
pub fn app_config_dir(resolver: &dyn DirectoryResolver) -> Option<PathBuf> {
    resolver.config_dir().map(|d| d.join(APP_DIR_NAME))
}

fn ensure_dir(path: &Path) -> Result<(), PathError> {
    std::fs::create_dir_all(path).map_err(|source| PathError::CreateDir {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedDirs(Option<PathBuf>);

    impl DirectoryResolver for FixedDirs {
        fn data_dir(&self) -> Option<PathBuf> {
            self.0.clone()
        }

        fn config_dir(&self) -> Option<PathBuf> {
            self.0.as_ref().map(|d| d.join("config"))
        }
    }

    #[test]
    fn test_default_store_location_creates_dir() {
        let base = tempfile::tempdir().unwrap();
        let resolver = FixedDirs(Some(base.path().to_path_buf()));

        let path = default_store_location(&resolver).unwrap();
        assert_eq!(path, base.path().join(APP_DIR_NAME).join(DEFAULT_DB_FILE));
        assert!(base.path().join(APP_DIR_NAME).is_dir());

        // Second call with the directory already present
        assert_eq!(default_store_location(&resolver).unwrap(), path);
    }

    #[test]
    fn test_missing_platform_dir() {
        let result = default_store_location(&FixedDirs(None));
        assert!(matches!(result, Err(PathError::NoPlatformDir("data"))));
    }

    #[test]
    fn test_create_dir_error_names_the_path() {
        let error = PathError::CreateDir {
            path: PathBuf::from("/readonly/lazysmtp"),
            source: std::io::Error::other("read-only file system"),
        };
        assert_eq!(
            error.to_string(),
            "Failed to create directory '/readonly/lazysmtp': read-only file system"
        );
    }

    #[test]
    fn test_app_config_dir() {
        let resolver = FixedDirs(Some(PathBuf::from("/base")));
        assert_eq!(
            app_config_dir(&resolver),
            Some(PathBuf::from("/base/config").join(APP_DIR_NAME))
        );
    }
}
