//! WebDAV implementation of the [`Remote`] capability trait.
//!
//! Collections map to WebDAV collections (MKCOL/PROPFIND/DELETE) and
//! objects to resources (PUT/GET/DELETE/MOVE). Uploads and downloads are
//! streamed; the whole object is never buffered in memory.

use std::path::Path;

use async_trait::async_trait;
use reqwest::header::CONTENT_LENGTH;
use reqwest::{Client, Method, StatusCode};
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::debug;

use crate::error::RemoteError;
use crate::remote::Remote;

fn propfind() -> Method {
    Method::from_bytes(b"PROPFIND").expect("static method name")
}

fn mkcol() -> Method {
    Method::from_bytes(b"MKCOL").expect("static method name")
}

fn dav_move() -> Method {
    Method::from_bytes(b"MOVE").expect("static method name")
}

/// HTTP client for one WebDAV namespace.
///
/// Locations are `/`-separated strings relative to the configured server
/// URL; each segment is percent-encoded when the request URL is built.
#[derive(Clone)]
pub struct DavClient {
    client: Client,
    base_url: String,
    auth: (String, String),
}

impl DavClient {
    pub fn new(base_url: &str, username: &str, password: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            auth: (username.to_string(), password.to_string()),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, location: &str) -> String {
        let mut url = self.base_url.clone();
        for segment in location.split('/').filter(|s| !s.is_empty()) {
            url.push('/');
            url.push_str(&urlencoding::encode(segment));
        }
        url
    }

    fn request(&self, method: Method, location: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, self.url(location))
            .basic_auth(&self.auth.0, Some(&self.auth.1))
    }

    fn status_error(method: &'static str, location: &str, status: StatusCode) -> RemoteError {
        RemoteError::Status {
            method,
            location: location.to_string(),
            status: status.as_u16(),
        }
    }

    fn io_error(path: &Path, source: std::io::Error) -> RemoteError {
        RemoteError::Io {
            path: path.display().to_string(),
            source,
        }
    }
}

#[async_trait]
impl Remote for DavClient {
    async fn collection_exists(&self, location: &str) -> Result<bool, RemoteError> {
        let resp = self
            .request(propfind(), location)
            .header("Depth", "0")
            .send()
            .await?;
        match resp.status() {
            StatusCode::MULTI_STATUS | StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(Self::status_error("PROPFIND", location, status)),
        }
    }

    async fn create_collection(&self, location: &str) -> Result<(), RemoteError> {
        let resp = self.request(mkcol(), location).send().await?;
        match resp.status() {
            StatusCode::CREATED => {
                debug!(location, "created collection");
                Ok(())
            }
            // MKCOL on an existing resource
            StatusCode::METHOD_NOT_ALLOWED => Err(RemoteError::AlreadyExists(location.to_string())),
            status => Err(Self::status_error("MKCOL", location, status)),
        }
    }

    async fn remove_collection(&self, location: &str) -> Result<(), RemoteError> {
        let resp = self.request(Method::DELETE, location).send().await?;
        match resp.status() {
            StatusCode::NOT_FOUND => Ok(()),
            status if status.is_success() => Ok(()),
            status => Err(Self::status_error("DELETE", location, status)),
        }
    }

    async fn object_exists(&self, location: &str) -> Result<bool, RemoteError> {
        let resp = self.request(Method::HEAD, location).send().await?;
        match resp.status() {
            StatusCode::NOT_FOUND => Ok(false),
            status if status.is_success() => Ok(true),
            status => Err(Self::status_error("HEAD", location, status)),
        }
    }

    async fn put_object(&self, local: &Path, location: &str) -> Result<(), RemoteError> {
        let file = tokio::fs::File::open(local)
            .await
            .map_err(|e| Self::io_error(local, e))?;
        let len = file
            .metadata()
            .await
            .map_err(|e| Self::io_error(local, e))?
            .len();
        let body = reqwest::Body::wrap_stream(ReaderStream::new(file));

        let resp = self
            .request(Method::PUT, location)
            .header(CONTENT_LENGTH, len)
            .body(body)
            .send()
            .await?;
        if resp.status().is_success() {
            debug!(location, bytes = len, "upload complete");
            Ok(())
        } else {
            Err(Self::status_error("PUT", location, resp.status()))
        }
    }

    async fn get_object(&self, location: &str, local: &Path) -> Result<(), RemoteError> {
        let mut resp = self.request(Method::GET, location).send().await?;
        match resp.status() {
            StatusCode::NOT_FOUND => return Err(RemoteError::NotFound(location.to_string())),
            status if !status.is_success() => {
                return Err(Self::status_error("GET", location, status));
            }
            _ => {}
        }

        let mut file = tokio::fs::File::create(local)
            .await
            .map_err(|e| Self::io_error(local, e))?;
        let mut bytes = 0u64;
        while let Some(chunk) = resp.chunk().await? {
            bytes += chunk.len() as u64;
            file.write_all(&chunk)
                .await
                .map_err(|e| Self::io_error(local, e))?;
        }
        file.flush().await.map_err(|e| Self::io_error(local, e))?;
        debug!(location, bytes, "download complete");
        Ok(())
    }

    async fn unlink_object(&self, location: &str) -> Result<(), RemoteError> {
        let resp = self.request(Method::DELETE, location).send().await?;
        match resp.status() {
            StatusCode::NOT_FOUND => Err(RemoteError::NotFound(location.to_string())),
            status if status.is_success() => Ok(()),
            status => Err(Self::status_error("DELETE", location, status)),
        }
    }

    async fn move_object(&self, src: &str, dst: &str) -> Result<(), RemoteError> {
        let resp = self
            .request(dav_move(), src)
            .header("Destination", self.url(dst))
            .header("Overwrite", "T")
            .send()
            .await?;
        match resp.status() {
            StatusCode::NOT_FOUND => Err(RemoteError::NotFound(src.to_string())),
            status if status.is_success() => {
                debug!(src, dst, "move complete");
                Ok(())
            }
            status => Err(Self::status_error("MOVE", src, status)),
        }
    }
}
