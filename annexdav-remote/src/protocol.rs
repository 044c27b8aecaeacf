//! Line framing for the git-annex external special remote protocol.
//!
//! git-annex drives the adapter with one whitespace-delimited request per
//! line on stdin; replies and adapter-initiated queries (GETCONFIG,
//! DIRHASH) ride stdout and are answered on the next stdin line. The
//! exchange is strictly sequential, one request at a time.

use std::path::PathBuf;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

/// A request received from git-annex.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    InitRemote,
    Prepare,
    /// `TRANSFER STORE <key> <file>`; the file part may contain spaces.
    TransferStore { key: String, file: PathBuf },
    /// `TRANSFER RETRIEVE <key> <file>`.
    TransferRetrieve { key: String, file: PathBuf },
    CheckPresent { key: String },
    Remove { key: String },
    Extensions,
    GetAvailability,
    ExportSupported,
    /// Anything this remote does not implement.
    Unsupported(String),
}

fn split_word(s: &str) -> (&str, &str) {
    match s.split_once(' ') {
        Some((word, rest)) => (word, rest),
        None => (s, ""),
    }
}

pub fn parse_request(line: &str) -> Request {
    let (word, rest) = split_word(line);
    match word {
        "INITREMOTE" => Request::InitRemote,
        "PREPARE" => Request::Prepare,
        "TRANSFER" => {
            let (direction, rest) = split_word(rest);
            let (key, file) = split_word(rest);
            if key.is_empty() || file.is_empty() {
                return Request::Unsupported(line.to_string());
            }
            let key = key.to_string();
            let file = PathBuf::from(file);
            match direction {
                "STORE" => Request::TransferStore { key, file },
                "RETRIEVE" => Request::TransferRetrieve { key, file },
                _ => Request::Unsupported(line.to_string()),
            }
        }
        "CHECKPRESENT" if !rest.is_empty() => Request::CheckPresent {
            key: rest.to_string(),
        },
        "REMOVE" if !rest.is_empty() => Request::Remove {
            key: rest.to_string(),
        },
        "EXTENSIONS" => Request::Extensions,
        "GETAVAILABILITY" => Request::GetAvailability,
        "EXPORTSUPPORTED" => Request::ExportSupported,
        _ => Request::Unsupported(line.to_string()),
    }
}

/// The stdio channel to git-annex: reads requests, writes replies, and
/// round-trips adapter-initiated queries.
pub struct Host<R, W> {
    reader: BufReader<R>,
    writer: W,
}

impl<R: AsyncRead + Unpin, W: AsyncWrite + Unpin> Host<R, W> {
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader: BufReader::new(reader),
            writer,
        }
    }

    /// Write one protocol line.
    pub async fn send(&mut self, line: &str) -> anyhow::Result<()> {
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Next request from git-annex, or `None` once stdin closes.
    pub async fn next_request(&mut self) -> anyhow::Result<Option<Request>> {
        Ok(self.read_line().await?.map(|line| parse_request(&line)))
    }

    /// `GETCONFIG <name>` round trip.
    pub async fn get_config(&mut self, name: &str) -> anyhow::Result<String> {
        self.query_value(&format!("GETCONFIG {name}")).await
    }

    /// `DIRHASH <key>` round trip. The reply comes back like `f87/4d5/`;
    /// surrounding slashes are trimmed so it can be used as a location
    /// segment.
    pub async fn dir_hash(&mut self, key: &str) -> anyhow::Result<String> {
        let value = self.query_value(&format!("DIRHASH {key}")).await?;
        Ok(value.trim_matches('/').to_string())
    }

    async fn query_value(&mut self, query: &str) -> anyhow::Result<String> {
        self.send(query).await?;
        let line = self
            .read_line()
            .await?
            .ok_or_else(|| anyhow::anyhow!("host closed the connection during {query}"))?;
        let (word, rest) = split_word(&line);
        if word == "VALUE" {
            Ok(rest.to_string())
        } else {
            anyhow::bail!("expected a VALUE reply to {query}, got: {line}");
        }
    }

    async fn read_line(&mut self) -> anyhow::Result<Option<String>> {
        let mut line = String::new();
        let n = self.reader.read_line(&mut line).await?;
        if n == 0 {
            return Ok(None);
        }
        while line.ends_with('\n') || line.ends_with('\r') {
            line.pop();
        }
        Ok(Some(line))
    }
}
