//! In-memory implementation of [`Remote`] for tests and embedding.
//!
//! Mirrors the failure surface of a real hierarchical backend: creating a
//! collection under a missing parent, putting an object into a missing
//! collection, and moving onto a missing destination collection all fail,
//! so store-layer ordering bugs show up in tests.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::RemoteError;
use crate::location;
use crate::remote::Remote;

#[derive(Default)]
struct State {
    collections: BTreeSet<String>,
    objects: BTreeMap<String, Vec<u8>>,
}

/// HashMap-backed remote namespace. Clones share the same state, so a test
/// can hand one handle to the code under test and inspect through another.
#[derive(Clone, Default)]
pub struct MemoryRemote {
    state: Arc<Mutex<State>>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current content of an object, if present.
    pub fn object(&self, location: &str) -> Option<Vec<u8>> {
        self.lock().objects.get(location).cloned()
    }

    pub fn has_collection(&self, location: &str) -> bool {
        location.is_empty() || self.lock().collections.contains(location)
    }

    /// Seed an object directly, bypassing the parent-collection check.
    /// Used to model leftovers from a crashed writer.
    pub fn seed_object(&self, location: &str, data: &[u8]) {
        self.lock().objects.insert(location.to_string(), data.to_vec());
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().expect("memory remote lock poisoned")
    }
}

fn parent_missing(state: &State, location: &str) -> bool {
    match location::parent(location) {
        Some(parent) => !state.collections.contains(parent),
        // the namespace root always exists
        None => false,
    }
}

#[async_trait]
impl Remote for MemoryRemote {
    async fn collection_exists(&self, location: &str) -> Result<bool, RemoteError> {
        Ok(location.is_empty() || self.lock().collections.contains(location))
    }

    async fn create_collection(&self, location: &str) -> Result<(), RemoteError> {
        let mut state = self.lock();
        if location.is_empty() || state.collections.contains(location) {
            return Err(RemoteError::AlreadyExists(location.to_string()));
        }
        if parent_missing(&state, location) {
            return Err(RemoteError::Status {
                method: "MKCOL",
                location: location.to_string(),
                status: 409,
            });
        }
        state.collections.insert(location.to_string());
        Ok(())
    }

    async fn remove_collection(&self, location: &str) -> Result<(), RemoteError> {
        let mut state = self.lock();
        let prefix = format!("{location}/");
        state
            .collections
            .retain(|c| c != location && !c.starts_with(&prefix));
        state.objects.retain(|o, _| !o.starts_with(&prefix));
        Ok(())
    }

    async fn object_exists(&self, location: &str) -> Result<bool, RemoteError> {
        Ok(self.lock().objects.contains_key(location))
    }

    async fn put_object(&self, local: &Path, location: &str) -> Result<(), RemoteError> {
        let data = tokio::fs::read(local).await.map_err(|e| RemoteError::Io {
            path: local.display().to_string(),
            source: e,
        })?;
        let mut state = self.lock();
        if parent_missing(&state, location) {
            return Err(RemoteError::Status {
                method: "PUT",
                location: location.to_string(),
                status: 409,
            });
        }
        state.objects.insert(location.to_string(), data);
        Ok(())
    }

    async fn get_object(&self, location: &str, local: &Path) -> Result<(), RemoteError> {
        let data = self
            .lock()
            .objects
            .get(location)
            .cloned()
            .ok_or_else(|| RemoteError::NotFound(location.to_string()))?;
        tokio::fs::write(local, data)
            .await
            .map_err(|e| RemoteError::Io {
                path: local.display().to_string(),
                source: e,
            })
    }

    async fn unlink_object(&self, location: &str) -> Result<(), RemoteError> {
        self.lock()
            .objects
            .remove(location)
            .map(|_| ())
            .ok_or_else(|| RemoteError::NotFound(location.to_string()))
    }

    async fn move_object(&self, src: &str, dst: &str) -> Result<(), RemoteError> {
        let mut state = self.lock();
        if parent_missing(&state, dst) {
            return Err(RemoteError::Status {
                method: "MOVE",
                location: dst.to_string(),
                status: 409,
            });
        }
        let data = state
            .objects
            .remove(src)
            .ok_or_else(|| RemoteError::NotFound(src.to_string()))?;
        state.objects.insert(dst.to_string(), data);
        Ok(())
    }
}
