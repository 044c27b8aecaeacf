//! Key-addressed store operations over a [`Remote`] namespace.
//!
//! A store publishes atomically: content is uploaded to a staging location
//! first and moved into place only once fully written, so the final
//! location never holds a partial object. The upload that can fail
//! mid-stream only ever targets the staging location.

use std::path::Path;

use tracing::{debug, warn};

use crate::error::RemoteError;
use crate::location;
use crate::remote::Remote;

/// Ensure `target` and any missing ancestors exist.
///
/// Walks upward to the first existing ancestor, then creates forward,
/// parent before child. Losing a creation race to another writer is not an
/// error. Idempotent and safe to repeat from any process.
pub async fn ensure_collection<R: Remote>(remote: &R, target: &str) -> Result<(), RemoteError> {
    let mut missing: Vec<&str> = Vec::new();
    let mut current = target;
    loop {
        if current.is_empty() || remote.collection_exists(current).await? {
            break;
        }
        missing.push(current);
        match location::parent(current) {
            Some(parent) => current = parent,
            None => break,
        }
    }

    for collection in missing.iter().rev() {
        match remote.create_collection(collection).await {
            Ok(()) => debug!(collection, "created collection"),
            // another writer got there first
            Err(e) if e.is_already_exists() => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Key-based operations bound to a base path in the remote namespace.
///
/// The base path and the remote handle are explicit session state; every
/// operation receives the per-key directory hash from the caller and never
/// caches namespace lookups across calls.
pub struct Store<R: Remote> {
    remote: R,
    base: String,
}

impl<R: Remote> Store<R> {
    pub fn new(remote: R, base: impl Into<String>) -> Self {
        Self {
            remote,
            base: base.into(),
        }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    /// Ensure the base collection exists, creating missing ancestors.
    pub async fn ensure_base(&self) -> Result<(), RemoteError> {
        ensure_collection(&self.remote, &self.base).await
    }

    /// Check that the base collection exists on the server.
    pub async fn base_exists(&self) -> Result<bool, RemoteError> {
        self.remote.collection_exists(&self.base).await
    }

    /// Upload `source` and publish it under `key`.
    ///
    /// The staged object is cleaned up on success and failure alike; a
    /// failed store leaves the final location unchanged.
    pub async fn store(&self, key: &str, dir_hash: &str, source: &Path) -> Result<(), RemoteError> {
        ensure_collection(&self.remote, &location::join(&[&self.base, dir_hash])).await?;
        let staged = self.acquire_staging(key).await?;

        let result = self.publish(key, dir_hash, source, &staged).await;
        self.release_staging(&staged).await;
        result
    }

    /// Stream the object stored under `key` into a local file.
    ///
    /// Absence is a hard failure; callers confirm presence first or treat
    /// it as one.
    pub async fn retrieve(&self, key: &str, dir_hash: &str, dest: &Path) -> Result<(), RemoteError> {
        let target = location::final_location(&self.base, dir_hash, key);
        self.remote.get_object(&target, dest).await
    }

    /// Whether `key` is present. "Not found" is the `false` result, never
    /// an error.
    pub async fn exists(&self, key: &str, dir_hash: &str) -> Result<bool, RemoteError> {
        let target = location::final_location(&self.base, dir_hash, key);
        self.remote.object_exists(&target).await
    }

    /// Unlink the object stored under `key`. Removing an absent key
    /// succeeds.
    pub async fn remove(&self, key: &str, dir_hash: &str) -> Result<(), RemoteError> {
        let target = location::final_location(&self.base, dir_hash, key);
        match self.remote.unlink_object(&target).await {
            Ok(()) => {
                debug!(key, "removed object");
                Ok(())
            }
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Make the staging collection available and return the staging
    /// location for `key`.
    async fn acquire_staging(&self, key: &str) -> Result<String, RemoteError> {
        let staging = location::join(&[&self.base, location::STAGING_COLLECTION]);
        ensure_collection(&self.remote, &staging).await?;
        Ok(location::staging_location(&self.base, key))
    }

    async fn publish(
        &self,
        key: &str,
        dir_hash: &str,
        source: &Path,
        staged: &str,
    ) -> Result<(), RemoteError> {
        // Force-write: a stale staged object from an earlier attempt is
        // overwritten, which makes the upload step retriable.
        self.remote.put_object(source, staged).await?;

        let target = location::final_location(&self.base, dir_hash, key);
        match self.remote.unlink_object(&target).await {
            Ok(()) => debug!(key, "replaced existing object"),
            // goal state (nothing occupying the slot) already holds
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }

        self.remote.move_object(staged, &target).await?;
        debug!(key, location = target.as_str(), "store complete");
        Ok(())
    }

    /// Unlink this store's staged object, tolerating absence (after a
    /// successful move there is nothing left to unlink). Only this key's
    /// staged object is touched, so a concurrent store of another key is
    /// never disturbed.
    async fn release_staging(&self, staged: &str) {
        match self.remote.unlink_object(staged).await {
            Ok(()) | Err(RemoteError::NotFound(_)) => {}
            Err(e) => warn!(location = staged, error = %e, "failed to clean up staged object"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryRemote;
    use async_trait::async_trait;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const BASE: &str = "proj/annex";
    const HASH: &str = "f8/7d";

    fn write_source(dir: &tempfile::TempDir, name: &str, data: &[u8]) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, data).unwrap();
        path
    }

    async fn read_back(store: &Store<impl Remote>, dir: &tempfile::TempDir, key: &str) -> Vec<u8> {
        let dest = dir.path().join(format!("{key}.out"));
        store.retrieve(key, HASH, &dest).await.unwrap();
        std::fs::read(&dest).unwrap()
    }

    /// Delegating remote that fails the next `fail_moves` MOVE calls.
    struct FlakyRemote {
        inner: MemoryRemote,
        fail_moves: AtomicUsize,
    }

    impl FlakyRemote {
        fn new(inner: MemoryRemote, fail_moves: usize) -> Self {
            Self {
                inner,
                fail_moves: AtomicUsize::new(fail_moves),
            }
        }
    }

    #[async_trait]
    impl Remote for FlakyRemote {
        async fn collection_exists(&self, location: &str) -> Result<bool, RemoteError> {
            self.inner.collection_exists(location).await
        }
        async fn create_collection(&self, location: &str) -> Result<(), RemoteError> {
            self.inner.create_collection(location).await
        }
        async fn remove_collection(&self, location: &str) -> Result<(), RemoteError> {
            self.inner.remove_collection(location).await
        }
        async fn object_exists(&self, location: &str) -> Result<bool, RemoteError> {
            self.inner.object_exists(location).await
        }
        async fn put_object(&self, local: &Path, location: &str) -> Result<(), RemoteError> {
            self.inner.put_object(local, location).await
        }
        async fn get_object(&self, location: &str, local: &Path) -> Result<(), RemoteError> {
            self.inner.get_object(location, local).await
        }
        async fn unlink_object(&self, location: &str) -> Result<(), RemoteError> {
            self.inner.unlink_object(location).await
        }
        async fn move_object(&self, src: &str, dst: &str) -> Result<(), RemoteError> {
            if self
                .fail_moves
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(RemoteError::Status {
                    method: "MOVE",
                    location: src.to_string(),
                    status: 500,
                });
            }
            self.inner.move_object(src, dst).await
        }
    }

    #[tokio::test]
    async fn test_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let remote = MemoryRemote::new();
        let store = Store::new(remote, BASE);

        let mut big = vec![0u8; 3 * 1024 * 1024];
        for (i, b) in big.iter_mut().enumerate() {
            *b = (i % 251) as u8;
        }
        let payloads: [(&str, Vec<u8>); 3] = [
            ("KEY-empty", Vec::new()),
            ("KEY-one", vec![0x42]),
            ("KEY-big", big),
        ];

        for (key, data) in &payloads {
            let source = write_source(&dir, key, data);
            store.store(key, HASH, &source).await.unwrap();
            assert!(store.exists(key, HASH).await.unwrap());
            assert_eq!(&read_back(&store, &dir, key).await, data);
        }
    }

    #[tokio::test]
    async fn test_store_creates_missing_ancestors() {
        let dir = tempfile::tempdir().unwrap();
        let remote = MemoryRemote::new();
        let store = Store::new(remote.clone(), BASE);

        let source = write_source(&dir, "src", b"data");
        store.store("KEY", HASH, &source).await.unwrap();

        assert!(remote.has_collection("proj"));
        assert!(remote.has_collection("proj/annex"));
        assert!(remote.has_collection("proj/annex/f8/7d"));
        assert!(remote.has_collection("proj/annex/tmp"));
        assert!(remote.object("proj/annex/f8/7d/KEY").is_some());
    }

    #[tokio::test]
    async fn test_overwrite_replaces_content() {
        let dir = tempfile::tempdir().unwrap();
        let remote = MemoryRemote::new();
        let store = Store::new(remote, BASE);

        let first = write_source(&dir, "first", b"first content");
        store.store("KEY", HASH, &first).await.unwrap();
        assert!(store.exists("KEY", HASH).await.unwrap());

        let second = write_source(&dir, "second", b"second content");
        store.store("KEY", HASH, &second).await.unwrap();
        assert!(store.exists("KEY", HASH).await.unwrap());
        assert_eq!(read_back(&store, &dir, "KEY").await, b"second content");
    }

    #[tokio::test]
    async fn test_interrupted_store_leaves_final_absent() {
        let dir = tempfile::tempdir().unwrap();
        let mem = MemoryRemote::new();
        let store = Store::new(FlakyRemote::new(mem.clone(), 1), BASE);

        let source = write_source(&dir, "src", b"payload");
        let err = store.store("KEY", HASH, &source).await.unwrap_err();
        assert!(matches!(err, RemoteError::Status { status: 500, .. }));

        // final location untouched, staged object cleaned up
        assert!(mem.object("proj/annex/f8/7d/KEY").is_none());
        assert!(mem.object("proj/annex/tmp/KEY").is_none());

        // retry succeeds and publishes the new content
        store.store("KEY", HASH, &source).await.unwrap();
        assert_eq!(mem.object("proj/annex/f8/7d/KEY").unwrap(), b"payload");
    }

    #[tokio::test]
    async fn test_interrupted_store_preserves_previous_content() {
        let dir = tempfile::tempdir().unwrap();
        let mem = MemoryRemote::new();
        {
            let store = Store::new(mem.clone(), BASE);
            let old = write_source(&dir, "old", b"old content");
            store.store("KEY", HASH, &old).await.unwrap();
        }

        let store = Store::new(FlakyRemote::new(mem.clone(), 1), BASE);
        let new = write_source(&dir, "new", b"new content");
        store.store("KEY", HASH, &new).await.unwrap_err();

        // the move failed after the old occupant was unlinked, so the slot
        // is empty or still old, never partial; with this failure point it
        // is empty and a retry restores it
        assert!(mem.object("proj/annex/f8/7d/KEY").is_none());
        store.store("KEY", HASH, &new).await.unwrap();
        assert_eq!(mem.object("proj/annex/f8/7d/KEY").unwrap(), b"new content");
    }

    #[tokio::test]
    async fn test_stale_staged_object_is_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let mem = MemoryRemote::new();
        let store = Store::new(mem.clone(), BASE);

        // leftovers of a writer that crashed between staging and move
        mem.seed_object("proj/annex/tmp/KEY", b"stale partial");

        let source = write_source(&dir, "src", b"fresh");
        store.store("KEY", HASH, &source).await.unwrap();

        assert_eq!(mem.object("proj/annex/f8/7d/KEY").unwrap(), b"fresh");
        assert!(mem.object("proj/annex/tmp/KEY").is_none());
    }

    #[tokio::test]
    async fn test_exists_false_for_never_stored_key() {
        let store = Store::new(MemoryRemote::new(), BASE);
        assert!(!store.exists("abc123", HASH).await.unwrap());
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let remote = MemoryRemote::new();
        let store = Store::new(remote, BASE);

        // removing a key that was never stored succeeds
        store.remove("KEY", HASH).await.unwrap();

        let source = write_source(&dir, "src", b"data");
        store.store("KEY", HASH, &source).await.unwrap();
        assert!(store.exists("KEY", HASH).await.unwrap());

        store.remove("KEY", HASH).await.unwrap();
        assert!(!store.exists("KEY", HASH).await.unwrap());

        store.remove("KEY", HASH).await.unwrap();
    }

    #[tokio::test]
    async fn test_retrieve_missing_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(MemoryRemote::new(), BASE);
        let dest = dir.path().join("out");
        let err = store.retrieve("KEY", HASH, &dest).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_ensure_collection_idempotent() {
        let remote = MemoryRemote::new();
        ensure_collection(&remote, "a/b/c").await.unwrap();
        assert!(remote.has_collection("a"));
        assert!(remote.has_collection("a/b"));
        assert!(remote.has_collection("a/b/c"));

        ensure_collection(&remote, "a/b/c").await.unwrap();
        assert!(remote.has_collection("a/b/c"));
    }

    #[tokio::test]
    async fn test_ensure_collection_tolerates_creation_race() {
        /// Pretends nothing exists, so ensure always tries to create and
        /// runs into AlreadyExists for collections that are there.
        struct BlindRemote(MemoryRemote);

        #[async_trait]
        impl Remote for BlindRemote {
            async fn collection_exists(&self, _location: &str) -> Result<bool, RemoteError> {
                Ok(false)
            }
            async fn create_collection(&self, location: &str) -> Result<(), RemoteError> {
                self.0.create_collection(location).await
            }
            async fn remove_collection(&self, location: &str) -> Result<(), RemoteError> {
                self.0.remove_collection(location).await
            }
            async fn object_exists(&self, location: &str) -> Result<bool, RemoteError> {
                self.0.object_exists(location).await
            }
            async fn put_object(&self, local: &Path, location: &str) -> Result<(), RemoteError> {
                self.0.put_object(local, location).await
            }
            async fn get_object(&self, location: &str, local: &Path) -> Result<(), RemoteError> {
                self.0.get_object(location, local).await
            }
            async fn unlink_object(&self, location: &str) -> Result<(), RemoteError> {
                self.0.unlink_object(location).await
            }
            async fn move_object(&self, src: &str, dst: &str) -> Result<(), RemoteError> {
                self.0.move_object(src, dst).await
            }
        }

        let remote = BlindRemote(MemoryRemote::new());
        ensure_collection(&remote, "a/b").await.unwrap();
        // second ensure re-creates everything and must swallow the races
        ensure_collection(&remote, "a/b").await.unwrap();
        assert!(remote.0.has_collection("a/b"));
    }

    #[tokio::test]
    async fn test_base_helpers() {
        let remote = MemoryRemote::new();
        let store = Store::new(remote, BASE);

        assert!(!store.base_exists().await.unwrap());
        store.ensure_base().await.unwrap();
        assert!(store.base_exists().await.unwrap());
        assert_eq!(store.base(), BASE);
    }
}
