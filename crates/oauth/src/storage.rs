//! Token persistence.

use std::{
    collections::{BTreeMap, HashMap},
    path::{Path, PathBuf},
    sync::Mutex,
};

use {async_trait::async_trait, tracing::debug};

use crate::{error::StoreError, types::TokenSet};

/// Persistent key-value storage for one [`TokenSet`] per account.
#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn load(&self, account: &str) -> Result<Option<TokenSet>, StoreError>;
    /// Replace the stored tokens for `account`.
    async fn save(&self, account: &str, tokens: &TokenSet) -> Result<(), StoreError>;
    async fn delete(&self, account: &str) -> Result<(), StoreError>;
    async fn accounts(&self) -> Result<Vec<String>, StoreError>;
}

/// JSON file holding the tokens of every account, keyed by account name.
///
/// Writes go to a sibling temp file which is then renamed over the original,
/// so a crash mid-write leaves the previous contents intact.
pub struct FileTokenStore {
    path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl FileTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_all(&self) -> Result<BTreeMap<String, TokenSet>, StoreError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) if bytes.is_empty() => Ok(BTreeMap::new()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_all(&self, all: &BTreeMap<String, TokenSet>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }

        let bytes = serde_json::to_vec_pretty(all)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &bytes).await?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600)).await?;
        }
        tokio::fs::rename(&tmp, &self.path).await?;
        debug!(path = %self.path.display(), accounts = all.len(), "token store written");
        Ok(())
    }
}

#[async_trait]
impl TokenStore for FileTokenStore {
    async fn load(&self, account: &str) -> Result<Option<TokenSet>, StoreError> {
        Ok(self.read_all().await?.remove(account))
    }

    async fn save(&self, account: &str, tokens: &TokenSet) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut all = self.read_all().await?;
        all.insert(account.to_string(), tokens.clone());
        self.write_all(&all).await
    }

    async fn delete(&self, account: &str) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut all = self.read_all().await?;
        if all.remove(account).is_some() {
            self.write_all(&all).await?;
        }
        Ok(())
    }

    async fn accounts(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.read_all().await?.into_keys().collect())
    }
}

/// In-memory store, for tests and short-lived sessions.
#[derive(Default)]
pub struct MemoryTokenStore {
    tokens: Mutex<HashMap<String, TokenSet>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, TokenSet>> {
        self.tokens.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn load(&self, account: &str) -> Result<Option<TokenSet>, StoreError> {
        Ok(self.lock().get(account).cloned())
    }

    async fn save(&self, account: &str, tokens: &TokenSet) -> Result<(), StoreError> {
        self.lock().insert(account.to_string(), tokens.clone());
        Ok(())
    }

    async fn delete(&self, account: &str) -> Result<(), StoreError> {
        self.lock().remove(account);
        Ok(())
    }

    async fn accounts(&self) -> Result<Vec<String>, StoreError> {
        let mut accounts: Vec<String> = self.lock().keys().cloned().collect();
        accounts.sort();
        Ok(accounts)
    }
}
