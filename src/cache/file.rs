//! Token cache persisted as JSON in the platform config directory.

use std::fs;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{upsert, CachedAccount, TokenCache};
use crate::error::CacheError;

/// Get the default path of the token cache file.
///
/// Returns `~/Library/Application Support/de.malvik.productviewer/<file_name>` on macOS.
pub fn default_cache_path(file_name: &str) -> Option<PathBuf> {
    ProjectDirs::from("de", "malvik", "productviewer")
        .map(|dirs| dirs.config_dir().join(file_name))
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheFile {
    #[serde(default)]
    accounts: Vec<CachedAccount>,
}

/// File-backed token cache.
#[derive(Debug, Clone)]
pub struct FileTokenCache {
    path: PathBuf,
}

impl FileTokenCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<CacheFile, CacheError> {
        if !self.path.exists() {
            debug!("Token cache file does not exist, treating as empty");
            return Ok(CacheFile::default());
        }

        let content = fs::read_to_string(&self.path)
            .map_err(|e| CacheError::ReadFailed(e.to_string()))?;
        serde_json::from_str(&content).map_err(|e| CacheError::Corrupted(e.to_string()))
    }

    fn write(&self, file: &CacheFile) -> Result<(), CacheError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| CacheError::WriteFailed(e.to_string()))?;
        }

        let content = serde_json::to_string_pretty(file)
            .map_err(|e| CacheError::WriteFailed(e.to_string()))?;
        fs::write(&self.path, content).map_err(|e| CacheError::WriteFailed(e.to_string()))?;
        restrict_permissions(&self.path);

        debug!("Saved token cache to {:?}", self.path);
        Ok(())
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;

    if let Err(e) = fs::set_permissions(path, fs::Permissions::from_mode(0o600)) {
        warn!("Failed to restrict token cache permissions: {}", e);
    }
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) {}

impl TokenCache for FileTokenCache {
    fn accounts(&self) -> Result<Vec<CachedAccount>, CacheError> {
        Ok(self.read()?.accounts)
    }

    fn store(&self, account: CachedAccount) -> Result<(), CacheError> {
        // A corrupted file is replaced rather than blocking sign-in
        let mut file = self.read().unwrap_or_else(|e| {
            warn!("Discarding unreadable token cache: {}", e);
            CacheFile::default()
        });
        upsert(&mut file.accounts, account);
        self.write(&file)
    }

    fn clear(&self) -> Result<(), CacheError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CacheError::DeleteFailed(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::identity::Identity;

    fn account(id: &str, refresh: &str) -> CachedAccount {
        CachedAccount::new(
            Identity::new(id, format!("{}@contoso.com", id)),
            Some(refresh.into()),
        )
    }

    #[test]
    fn test_cache_path() {
        let path = default_cache_path("token_cache.json");
        if let Some(path) = path {
            assert!(path.ends_with("token_cache.json"));
        }
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileTokenCache::new(dir.path().join("cache.json"));
        assert!(cache.accounts().unwrap().is_empty());
    }

    #[test]
    fn test_store_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("cache.json");

        FileTokenCache::new(&path)
            .store(account("uid.tid", "rt-1"))
            .unwrap();

        let reopened = FileTokenCache::new(&path);
        let accounts = reopened.accounts().unwrap();
        assert_eq!(accounts.len(), 1);
        assert_eq!(accounts[0].identity.home_account_id, "uid.tid");
        assert_eq!(
            accounts[0].refresh_token.as_ref().unwrap().as_str(),
            "rt-1"
        );
    }

    #[test]
    fn test_clear_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileTokenCache::new(dir.path().join("cache.json"));
        cache.store(account("a", "rt")).unwrap();

        cache.clear().unwrap();
        assert!(!cache.path().exists());
        assert!(cache.accounts().unwrap().is_empty());

        // Clearing twice is fine
        cache.clear().unwrap();
    }

    #[test]
    fn test_corrupted_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        fs::write(&path, "{not json").unwrap();

        let cache = FileTokenCache::new(&path);
        assert!(matches!(cache.accounts(), Err(CacheError::Corrupted(_))));

        cache.store(account("a", "rt")).unwrap();
        assert_eq!(cache.accounts().unwrap().len(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let cache = FileTokenCache::new(dir.path().join("cache.json"));
        cache.store(account("a", "rt")).unwrap();

        let mode = fs::metadata(cache.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
