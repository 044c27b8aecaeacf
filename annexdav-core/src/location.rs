//! Key-to-location mapping.
//!
//! Locations are `/`-separated strings inside the remote namespace,
//! independent of the host OS path syntax. The directory hash supplied by
//! the host bounds directory fan-out; it is treated as an opaque segment.

/// Name of the staging collection under the base path.
pub const STAGING_COLLECTION: &str = "tmp";

/// Join location segments, dropping empty segments and redundant slashes.
pub fn join(parts: &[&str]) -> String {
    let mut out = String::new();
    for part in parts {
        for segment in part.split('/').filter(|s| !s.is_empty()) {
            if !out.is_empty() {
                out.push('/');
            }
            out.push_str(segment);
        }
    }
    out
}

/// Final location of a stored key: `{base}/{dir_hash}/{key}`.
pub fn final_location(base: &str, dir_hash: &str, key: &str) -> String {
    join(&[base, dir_hash, key])
}

/// Staging location of an in-flight upload: `{base}/tmp/{key}`.
pub fn staging_location(base: &str, key: &str) -> String {
    join(&[base, STAGING_COLLECTION, key])
}

/// Parent of a location, or `None` once the namespace root is reached.
pub fn parent(location: &str) -> Option<&str> {
    location.rsplit_once('/').map(|(parent, _)| parent)
}
