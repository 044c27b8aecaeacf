use std::path::Path;

use crate::error::RemoteError;

/// Trait implemented by hierarchical storage backends.
///
/// The store layer is responsible for location mapping, operation ordering,
/// and failure handling; the backend is responsible only for collection and
/// object CRUD at a given location. This allows for alternative
/// implementations (in-memory for testing, other protocols).
#[async_trait::async_trait]
pub trait Remote: Send + Sync {
    /// Check whether a collection exists at `location`.
    async fn collection_exists(&self, location: &str) -> Result<bool, RemoteError>;

    /// Create a collection. The parent collection must already exist.
    ///
    /// Fails with [`RemoteError::AlreadyExists`] when the collection is
    /// already present, so callers can tell a benign race from a failure.
    async fn create_collection(&self, location: &str) -> Result<(), RemoteError>;

    /// Remove a collection and everything under it. Removing an absent
    /// collection is a no-op.
    async fn remove_collection(&self, location: &str) -> Result<(), RemoteError>;

    /// Check whether an object exists at `location`.
    async fn object_exists(&self, location: &str) -> Result<bool, RemoteError>;

    /// Upload a local file, replacing any object already at `location`.
    async fn put_object(&self, local: &Path, location: &str) -> Result<(), RemoteError>;

    /// Download the object at `location` into a local file.
    ///
    /// Fails with [`RemoteError::NotFound`] when the object is absent.
    async fn get_object(&self, location: &str, local: &Path) -> Result<(), RemoteError>;

    /// Unlink the object at `location`.
    ///
    /// Fails with [`RemoteError::NotFound`] when there is nothing to
    /// unlink; callers decide whether that outcome is benign.
    async fn unlink_object(&self, location: &str) -> Result<(), RemoteError>;

    /// Move an object within the namespace, replacing any object at `dst`.
    async fn move_object(&self, src: &str, dst: &str) -> Result<(), RemoteError>;
}
