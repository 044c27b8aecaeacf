//! Command dispatch for one adapter session.
//!
//! Holds the explicit per-session state (the backend handle and the
//! configured base path) and turns each request into store operations plus
//! a protocol reply. Failures become one-line messages on the matching
//! `-FAILURE`/`-UNKNOWN` reply; git-annex decides user-facing
//! presentation.

use std::path::Path;

use anyhow::Context;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{info, warn};

use annexdav_core::{Remote, Store};

use crate::protocol::{Host, Request};

/// Flatten an error chain into a single protocol-safe line.
fn error_message(err: &anyhow::Error) -> String {
    format!("{err:#}").replace('\n', " ")
}

pub struct Session<R: Remote, F> {
    connect: F,
    store: Option<Store<R>>,
}

impl<R, F> Session<R, F>
where
    R: Remote,
    F: FnMut() -> anyhow::Result<R>,
{
    /// `connect` is called at INITREMOTE/PREPARE time, so a missing or
    /// broken credentials file surfaces as a protocol failure message
    /// instead of a dead process.
    pub fn new(connect: F) -> Self {
        Self {
            connect,
            store: None,
        }
    }

    /// Serve requests until git-annex closes the connection.
    pub async fn run<I, O>(&mut self, host: &mut Host<I, O>) -> anyhow::Result<()>
    where
        I: AsyncRead + Unpin,
        O: AsyncWrite + Unpin,
    {
        host.send("VERSION 1").await?;
        while let Some(request) = host.next_request().await? {
            self.dispatch(host, request).await?;
        }
        info!("session closed");
        Ok(())
    }

    async fn dispatch<I, O>(
        &mut self,
        host: &mut Host<I, O>,
        request: Request,
    ) -> anyhow::Result<()>
    where
        I: AsyncRead + Unpin,
        O: AsyncWrite + Unpin,
    {
        match request {
            Request::InitRemote => match self.init_remote(host).await {
                Ok(()) => host.send("INITREMOTE-SUCCESS").await,
                Err(e) => {
                    host.send(&format!("INITREMOTE-FAILURE {}", error_message(&e)))
                        .await
                }
            },
            Request::Prepare => match self.prepare(host).await {
                Ok(()) => host.send("PREPARE-SUCCESS").await,
                Err(e) => {
                    host.send(&format!("PREPARE-FAILURE {}", error_message(&e)))
                        .await
                }
            },
            Request::TransferStore { key, file } => {
                match self.transfer_store(host, &key, &file).await {
                    Ok(()) => host.send(&format!("TRANSFER-SUCCESS STORE {key}")).await,
                    Err(e) => {
                        host.send(&format!(
                            "TRANSFER-FAILURE STORE {key} {}",
                            error_message(&e)
                        ))
                        .await
                    }
                }
            }
            Request::TransferRetrieve { key, file } => {
                match self.transfer_retrieve(host, &key, &file).await {
                    Ok(()) => host.send(&format!("TRANSFER-SUCCESS RETRIEVE {key}")).await,
                    Err(e) => {
                        host.send(&format!(
                            "TRANSFER-FAILURE RETRIEVE {key} {}",
                            error_message(&e)
                        ))
                        .await
                    }
                }
            }
            Request::CheckPresent { key } => match self.check_present(host, &key).await {
                Ok(true) => host.send(&format!("CHECKPRESENT-SUCCESS {key}")).await,
                Ok(false) => host.send(&format!("CHECKPRESENT-FAILURE {key}")).await,
                Err(e) => {
                    host.send(&format!("CHECKPRESENT-UNKNOWN {key} {}", error_message(&e)))
                        .await
                }
            },
            Request::Remove { key } => match self.remove(host, &key).await {
                Ok(()) => host.send(&format!("REMOVE-SUCCESS {key}")).await,
                Err(e) => {
                    host.send(&format!("REMOVE-FAILURE {key} {}", error_message(&e)))
                        .await
                }
            },
            Request::Extensions => host.send("EXTENSIONS").await,
            Request::GetAvailability => host.send("AVAILABILITY GLOBAL").await,
            // the export-tree protocol variant is not implemented
            Request::ExportSupported => host.send("EXPORTSUPPORTED-FAILURE").await,
            Request::Unsupported(line) => {
                warn!(line = line.as_str(), "unsupported request");
                host.send("UNSUPPORTED-REQUEST").await
            }
        }
    }

    /// Read `directory=`, connect, and bind session state. Called for both
    /// INITREMOTE and PREPARE; the newest configuration wins.
    async fn setup<I, O>(&mut self, host: &mut Host<I, O>) -> anyhow::Result<&Store<R>>
    where
        I: AsyncRead + Unpin,
        O: AsyncWrite + Unpin,
    {
        let directory = host.get_config("directory").await?;
        let directory = directory.trim().trim_matches('/').to_string();
        if directory.is_empty() {
            anyhow::bail!("you must set directory= to a path inside the WebDAV namespace");
        }
        let remote = (self.connect)().context("could not set up the WebDAV session")?;
        Ok(self.store.insert(Store::new(remote, directory)))
    }

    fn prepared(&self) -> anyhow::Result<&Store<R>> {
        self.store
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("PREPARE has not been run"))
    }

    async fn init_remote<I, O>(&mut self, host: &mut Host<I, O>) -> anyhow::Result<()>
    where
        I: AsyncRead + Unpin,
        O: AsyncWrite + Unpin,
    {
        let store = self.setup(host).await?;
        store
            .ensure_base()
            .await
            .with_context(|| format!("could not create {}", store.base()))?;
        info!(directory = store.base(), "remote initialized");
        Ok(())
    }

    async fn prepare<I, O>(&mut self, host: &mut Host<I, O>) -> anyhow::Result<()>
    where
        I: AsyncRead + Unpin,
        O: AsyncWrite + Unpin,
    {
        let store = self.setup(host).await?;
        if !store.base_exists().await? {
            anyhow::bail!("remote directory not found: {}", store.base());
        }
        Ok(())
    }

    async fn transfer_store<I, O>(
        &self,
        host: &mut Host<I, O>,
        key: &str,
        file: &Path,
    ) -> anyhow::Result<()>
    where
        I: AsyncRead + Unpin,
        O: AsyncWrite + Unpin,
    {
        let store = self.prepared()?;
        let dir_hash = host.dir_hash(key).await?;
        store.store(key, &dir_hash, file).await?;
        Ok(())
    }

    async fn transfer_retrieve<I, O>(
        &self,
        host: &mut Host<I, O>,
        key: &str,
        file: &Path,
    ) -> anyhow::Result<()>
    where
        I: AsyncRead + Unpin,
        O: AsyncWrite + Unpin,
    {
        let store = self.prepared()?;
        let dir_hash = host.dir_hash(key).await?;
        store.retrieve(key, &dir_hash, file).await?;
        Ok(())
    }

    async fn check_present<I, O>(&self, host: &mut Host<I, O>, key: &str) -> anyhow::Result<bool>
    where
        I: AsyncRead + Unpin,
        O: AsyncWrite + Unpin,
    {
        let store = self.prepared()?;
        let dir_hash = host.dir_hash(key).await?;
        Ok(store.exists(key, &dir_hash).await?)
    }

    async fn remove<I, O>(&self, host: &mut Host<I, O>, key: &str) -> anyhow::Result<()>
    where
        I: AsyncRead + Unpin,
        O: AsyncWrite + Unpin,
    {
        let store = self.prepared()?;
        let dir_hash = host.dir_hash(key).await?;
        store.remove(key, &dir_hash).await?;
        Ok(())
    }
}
