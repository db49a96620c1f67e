use std::path::PathBuf;

use url::Url;

use crate::error::{RepoError, Result};

/// Tuning and policy for a repository instance.
#[derive(Debug, Clone)]
pub struct RepoConfig {
    /// Platform key used when resolving component versions, e.g.
    /// `x86_64-linux`.
    pub platform: String,
    /// Permit resolving components the index marks yanked.
    pub allow_yanked: bool,
    /// Fetch bound for root manifests, whose size is not declared anywhere.
    pub max_root_bytes: u64,
    /// Fetch bound for the timestamp manifest.
    pub max_timestamp_bytes: u64,
    /// Fetch bound for index and component manifests without a declared
    /// length.
    pub max_manifest_bytes: u64,
}

impl Default for RepoConfig {
    fn default() -> Self {
        Self {
            platform: default_platform(),
            allow_yanked: false,
            max_root_bytes: 1024 * 1024,
            max_timestamp_bytes: 64 * 1024,
            max_manifest_bytes: 8 * 1024 * 1024,
        }
    }
}

/// The platform key for the running host.
pub fn default_platform() -> String {
    format!("{}-{}", std::env::consts::ARCH, std::env::consts::OS)
}

/// Where a mirror lives: a local directory or an HTTP(S) base URL.
#[derive(Debug, Clone)]
pub enum MirrorLocation {
    File(PathBuf),
    Remote(Url),
}

impl MirrorLocation {
    pub fn from_value(value: &str) -> Result<Self> {
        if value.starts_with("http://") || value.starts_with("https://") {
            let url = Url::parse(value).map_err(|e| RepoError::Schema {
                resource: value.to_string(),
                reason: format!("not a valid mirror URL: {e}"),
            })?;
            return Ok(Self::Remote(url));
        }
        if let Some(stripped) = value.strip_prefix("file://") {
            return Ok(Self::File(PathBuf::from(stripped)));
        }
        Ok(Self::File(PathBuf::from(value)))
    }

    pub fn display(&self) -> String {
        match self {
            Self::File(path) => path.display().to_string(),
            Self::Remote(url) => url.to_string(),
        }
    }
}
