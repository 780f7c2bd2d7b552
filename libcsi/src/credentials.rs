//! Credential resolution.
//!
//! A request either carries its own secrets or falls back to a named default
//! bundle held by a [`CredentialStore`]. The resolver never retries a failed
//! lookup; the orchestrator's reconciliation loop owns retry policy.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::CsiError;
use crate::types::CredentialSet;

/// Name-addressed store of secret bundles.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Fetch the bundle called `name`.
    ///
    /// An empty set is a valid answer here; the resolver decides whether it is
    /// usable.
    async fn lookup(&self, name: &str) -> Result<CredentialSet, CsiError>;
}

/// Credential store backed by a directory tree.
///
/// Bundle `<name>` is the directory `<root>/<name>/`, and every regular file in
/// it is one key whose contents are the value. This is the layout kubelet
/// produces when it mounts a Secret into a pod.
#[derive(Debug, Clone)]
pub struct SecretDirStore {
    root: PathBuf,
}

impl SecretDirStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl CredentialStore for SecretDirStore {
    async fn lookup(&self, name: &str) -> Result<CredentialSet, CsiError> {
        if name.is_empty() || name.contains('/') || name == "." || name == ".." {
            return Err(CsiError::CredentialUnavailable {
                name: name.to_owned(),
                reason: "invalid bundle name".to_owned(),
            });
        }

        let dir = self.root.join(name);
        let unavailable = |reason: String| CsiError::CredentialUnavailable {
            name: name.to_owned(),
            reason,
        };

        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(unavailable(format!("{} does not exist", dir.display())));
            }
            Err(e) => return Err(unavailable(format!("read_dir {}: {e}", dir.display()))),
        };

        let mut creds = CredentialSet::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| unavailable(e.to_string()))?
        {
            let Some(key) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            // kubelet keeps the real files in `..data` and friends.
            if key.starts_with('.') {
                continue;
            }
            let path = entry.path();
            // Follows symlinks, which is how mounted secrets are laid out.
            let is_file = tokio::fs::metadata(&path)
                .await
                .map(|m| m.is_file())
                .unwrap_or(false);
            if !is_file {
                continue;
            }
            let value = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| unavailable(format!("read {key}: {e}")))?;
            creds.insert(key, value.trim_end_matches(['\r', '\n']));
        }

        debug!(name, keys = creds.len(), "loaded credential bundle");
        Ok(creds)
    }
}

/// In-memory credential store, mostly useful for tests and embedding.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentialStore {
    bundles: HashMap<String, CredentialSet>,
}

impl StaticCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bundle(mut self, name: impl Into<String>, creds: CredentialSet) -> Self {
        self.bundles.insert(name.into(), creds);
        self
    }
}

#[async_trait]
impl CredentialStore for StaticCredentialStore {
    async fn lookup(&self, name: &str) -> Result<CredentialSet, CsiError> {
        self.bundles
            .get(name)
            .cloned()
            .ok_or_else(|| CsiError::CredentialUnavailable {
                name: name.to_owned(),
                reason: "no such bundle".to_owned(),
            })
    }
}

/// Picks the credential set used for one request.
#[derive(Clone)]
pub struct CredentialResolver {
    store: Arc<dyn CredentialStore>,
    default_name: String,
}

impl CredentialResolver {
    pub fn new(store: Arc<dyn CredentialStore>, default_name: impl Into<String>) -> Self {
        Self {
            store,
            default_name: default_name.into(),
        }
    }

    pub fn default_name(&self) -> &str {
        &self.default_name
    }

    /// Return `request` unchanged when it is non-empty, otherwise the default
    /// bundle. A failed or empty default lookup is
    /// [`CsiError::CredentialUnavailable`].
    pub async fn resolve(&self, request: CredentialSet) -> Result<CredentialSet, CsiError> {
        if !request.is_empty() {
            return Ok(request);
        }

        info!(name = %self.default_name, "request carries no secrets, using default");
        let creds = self.store.lookup(&self.default_name).await?;
        if creds.is_empty() {
            return Err(CsiError::CredentialUnavailable {
                name: self.default_name.clone(),
                reason: "bundle is empty".to_owned(),
            });
        }
        Ok(creds)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct CountingStore {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CredentialStore for CountingStore {
        async fn lookup(&self, _name: &str) -> Result<CredentialSet, CsiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok([("remote", "default")].into_iter().collect())
        }
    }

    #[tokio::test]
    async fn request_secrets_win() {
        let store = Arc::new(CountingStore {
            calls: AtomicUsize::new(0),
        });
        let resolver = CredentialResolver::new(store.clone(), "rclone-secret");

        let request: CredentialSet = [("remote", "mine")].into_iter().collect();
        let creds = resolver.resolve(request.clone()).await.unwrap();

        assert_eq!(creds, request);
        assert_eq!(store.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn empty_request_falls_back_to_default() {
        let store = Arc::new(CountingStore {
            calls: AtomicUsize::new(0),
        });
        let resolver = CredentialResolver::new(store.clone(), "rclone-secret");

        let creds = resolver.resolve(CredentialSet::new()).await.unwrap();

        assert_eq!(creds.get("remote"), Some("default"));
        assert_eq!(store.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn missing_default_is_credential_error() {
        let resolver = CredentialResolver::new(Arc::new(StaticCredentialStore::new()), "absent");
        let err = resolver.resolve(CredentialSet::new()).await.unwrap_err();
        assert!(matches!(err, CsiError::CredentialUnavailable { ref name, .. } if name == "absent"));
    }

    #[tokio::test]
    async fn empty_default_is_credential_error() {
        let store = StaticCredentialStore::new().with_bundle("rclone-secret", CredentialSet::new());
        let resolver = CredentialResolver::new(Arc::new(store), "rclone-secret");
        let err = resolver.resolve(CredentialSet::new()).await.unwrap_err();
        assert!(matches!(err, CsiError::CredentialUnavailable { .. }));
    }

    #[tokio::test]
    async fn secret_dir_store_reads_one_file_per_key() {
        let tmp = tempfile::tempdir().unwrap();
        let bundle = tmp.path().join("rclone-secret");
        std::fs::create_dir_all(&bundle).unwrap();
        std::fs::write(bundle.join("remote"), "s3backend\n").unwrap();
        std::fs::write(bundle.join("s3-access-key-id"), "AKIA").unwrap();
        std::fs::create_dir_all(bundle.join("..data")).unwrap();

        let store = SecretDirStore::new(tmp.path());
        let creds = store.lookup("rclone-secret").await.unwrap();

        assert_eq!(creds.len(), 2);
        assert_eq!(creds.get("remote"), Some("s3backend"));
        assert_eq!(creds.get("s3-access-key-id"), Some("AKIA"));
    }

    #[tokio::test]
    async fn secret_dir_store_missing_bundle() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SecretDirStore::new(tmp.path());

        let err = store.lookup("nope").await.unwrap_err();
        assert!(matches!(err, CsiError::CredentialUnavailable { .. }));

        let err = store.lookup("../etc").await.unwrap_err();
        assert!(matches!(err, CsiError::CredentialUnavailable { .. }));
    }
}
