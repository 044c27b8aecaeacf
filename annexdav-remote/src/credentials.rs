use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Environment variable overriding the credentials file location.
pub const CREDENTIALS_ENV: &str = "ANNEXDAV_CREDENTIALS";

/// WebDAV server credentials, kept out of the git-annex remote config.
#[derive(Debug, Clone, Deserialize)]
pub struct Credentials {
    pub url: String,
    pub username: String,
    #[serde(default)]
    pub password: String,
}

impl Credentials {
    /// Load from `$ANNEXDAV_CREDENTIALS`, falling back to
    /// `~/.config/annexdav/credentials.toml`.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&credentials_path()?)
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", path.display(), e))?;
        let credentials: Credentials = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse {}: {}", path.display(), e))?;
        credentials.validate()?;
        Ok(credentials)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.url.is_empty() {
            anyhow::bail!("url must not be empty");
        }
        if !self.url.starts_with("http://") && !self.url.starts_with("https://") {
            anyhow::bail!("url must be an http(s) URL: {}", self.url);
        }
        if self.username.is_empty() {
            anyhow::bail!("username must not be empty");
        }
        Ok(())
    }
}

fn credentials_path() -> anyhow::Result<PathBuf> {
    if let Ok(path) = std::env::var(CREDENTIALS_ENV) {
        return Ok(PathBuf::from(path));
    }
    let config_dir = dirs::config_dir()
        .ok_or_else(|| anyhow::anyhow!("could not determine the user config directory"))?;
    Ok(config_dir.join("annexdav").join("credentials.toml"))
}
