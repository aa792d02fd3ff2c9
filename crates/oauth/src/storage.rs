use std::{
    path::{Path, PathBuf},
    sync::{
        Mutex, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
};

use {
    dashmap::{DashMap, mapref::entry::Entry},
    tracing::{debug, info, warn},
};

use crate::{
    Result,
    types::{OAuthToken, TokenKey},
};

/// Token storage keyed by (user, server, provider).
///
/// Reads are served from memory. When backed by a file, every mutation
/// rewrites `oauth_tokens.json` (mode 0600 on Unix) after the map entry
/// lock has been released.
#[derive(Debug)]
pub struct TokenStore {
    tokens: DashMap<TokenKey, OAuthToken>,
    path: Option<PathBuf>,
    write_lock: Mutex<()>,
    revision: AtomicU64,
}

impl TokenStore {
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            tokens: DashMap::new(),
            path: None,
            write_lock: Mutex::new(()),
            revision: AtomicU64::new(0),
        }
    }

    /// Open a file-backed store. A missing file is an empty store.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut store = Self::in_memory();
        let loaded: Vec<OAuthToken> = match std::fs::read_to_string(&path) {
            Ok(data) => serde_json::from_str(&data)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "token file not found");
                Vec::new()
            },
            Err(e) => return Err(e.into()),
        };
        let max_revision = loaded.iter().map(|t| t.revision).max().unwrap_or(0);
        for token in loaded {
            store.tokens.insert(token.key(), token);
        }
        store.revision = AtomicU64::new(max_revision);
        info!(path = %path.display(), count = store.tokens.len(), "OAuth tokens loaded");
        store.path = Some(path);
        Ok(store)
    }

    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn next_revision(&self) -> u64 {
        self.revision.fetch_add(1, Ordering::Relaxed) + 1
    }

    #[must_use]
    pub fn get(&self, key: &TokenKey) -> Option<OAuthToken> {
        self.tokens.get(key).map(|t| t.value().clone())
    }

    /// Insert or replace the token for its key, returning the stored copy.
    pub fn upsert(&self, mut token: OAuthToken) -> Result<OAuthToken> {
        token.revision = self.next_revision();
        self.tokens.insert(token.key(), token.clone());
        self.persist()?;
        Ok(token)
    }

    /// Replace the token only if it still carries `expected_revision`.
    ///
    /// Returns `None` when the token was changed or revoked in the meantime;
    /// a revoked token is never brought back.
    pub fn replace_if_unchanged(
        &self,
        key: &TokenKey,
        expected_revision: u64,
        mut token: OAuthToken,
    ) -> Result<Option<OAuthToken>> {
        let swapped = match self.tokens.entry(key.clone()) {
            Entry::Occupied(mut slot) if slot.get().revision == expected_revision => {
                token.revision = self.next_revision();
                slot.insert(token.clone());
                true
            },
            _ => false,
        };
        if !swapped {
            return Ok(None);
        }
        self.persist()?;
        Ok(Some(token))
    }

    /// Remove the token only if it still carries `revision`.
    pub fn remove_if_revision(&self, key: &TokenKey, revision: u64) -> Result<bool> {
        let removed = self
            .tokens
            .remove_if(key, |_, t| t.revision == revision)
            .is_some();
        if removed {
            self.persist()?;
        }
        Ok(removed)
    }

    /// Remove a token. Removing a missing token is not an error.
    pub fn remove(&self, key: &TokenKey) -> Result<bool> {
        let removed = self.tokens.remove(key).is_some();
        if removed {
            self.persist()?;
        }
        Ok(removed)
    }

    /// Remove every token bound to `server_id`, for all users.
    pub fn remove_server(&self, server_id: &str) -> Result<usize> {
        let before = self.tokens.len();
        self.tokens.retain(|k, _| k.server_id != server_id);
        let removed = before.saturating_sub(self.tokens.len());
        if removed > 0 {
            self.persist()?;
        }
        Ok(removed)
    }

    #[must_use]
    pub fn list_for_user(&self, user_id: &str) -> Vec<OAuthToken> {
        let mut tokens: Vec<OAuthToken> = self
            .tokens
            .iter()
            .filter(|t| t.key().user_id == user_id)
            .map(|t| t.value().clone())
            .collect();
        tokens.sort_by(|a, b| a.key().cmp(&b.key()));
        tokens
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    fn persist(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let mut snapshot: Vec<OAuthToken> = self.tokens.iter().map(|t| t.value().clone()).collect();
        snapshot.sort_by(|a, b| a.key().cmp(&b.key()));
        let data = serde_json::to_string_pretty(&snapshot)?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, data)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600))?;
        }

        if let Err(e) = std::fs::rename(&tmp, path) {
            warn!(path = %path.display(), error = %e, "token file rename failed");
            return Err(e.into());
        }
        Ok(())
    }
}

impl Default for TokenStore {
    fn default() -> Self {
        Self::in_memory()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use {
        super::*,
        crate::types::Provider,
        chrono::Utc,
        secrecy::{ExposeSecret, Secret},
    };

    fn token(user: &str, server: &str, access: &str) -> OAuthToken {
        OAuthToken {
            user_id: user.into(),
            server_id: server.into(),
            provider: Provider::gmail(),
            access_token: Secret::new(access.into()),
            refresh_token: None,
            token_type: "Bearer".into(),
            expires_at: None,
            scope: None,
            updated_at: Utc::now(),
            revision: 0,
        }
    }

    #[test]
    fn upsert_replaces_per_key() {
        let store = TokenStore::in_memory();
        store.upsert(token("u1", "s1", "first")).unwrap();
        store.upsert(token("u1", "s1", "second")).unwrap();
        store.upsert(token("u2", "s1", "other")).unwrap();
        assert_eq!(store.len(), 2);
        let key = TokenKey::new("u1", "s1", &Provider::gmail());
        assert_eq!(store.get(&key).unwrap().access_token.expose_secret(), "second");
    }

    #[test]
    fn cas_does_not_resurrect_revoked_token() {
        let store = TokenStore::in_memory();
        let stored = store.upsert(token("u1", "s1", "old")).unwrap();
        let key = stored.key();
        assert!(store.remove(&key).unwrap());
        let swapped = store
            .replace_if_unchanged(&key, stored.revision, token("u1", "s1", "new"))
            .unwrap();
        assert!(swapped.is_none());
        assert!(store.get(&key).is_none());
    }

    #[test]
    fn cas_rejects_stale_revision() {
        let store = TokenStore::in_memory();
        let first = store.upsert(token("u1", "s1", "a")).unwrap();
        store.upsert(token("u1", "s1", "b")).unwrap();
        let swapped = store
            .replace_if_unchanged(&first.key(), first.revision, token("u1", "s1", "c"))
            .unwrap();
        assert!(swapped.is_none());
        assert!(!store.remove_if_revision(&first.key(), first.revision).unwrap());
    }

    #[test]
    fn remove_server_spans_users() {
        let store = TokenStore::in_memory();
        store.upsert(token("u1", "s1", "a")).unwrap();
        store.upsert(token("u2", "s1", "b")).unwrap();
        store.upsert(token("u1", "s2", "c")).unwrap();
        assert_eq!(store.remove_server("s1").unwrap(), 2);
        assert_eq!(store.list_for_user("u1").len(), 1);
        assert!(store.list_for_user("u2").is_empty());
    }

    #[test]
    fn file_store_persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("oauth_tokens.json");
        {
            let store = TokenStore::open(&path).unwrap();
            assert!(store.is_empty());
            store.upsert(token("u1", "s1", "persisted")).unwrap();
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }

        let reopened = TokenStore::open(&path).unwrap();
        let key = TokenKey::new("u1", "s1", &Provider::gmail());
        let loaded = reopened.get(&key).unwrap();
        assert_eq!(loaded.access_token.expose_secret(), "persisted");
        let next = reopened.upsert(token("u1", "s1", "again")).unwrap();
        assert!(next.revision > loaded.revision);
    }
}
