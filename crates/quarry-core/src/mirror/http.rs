use std::io::Read;
use std::time::Duration;

use reqwest::StatusCode;
use reqwest::blocking::Client;
use url::Url;

use crate::error::{RepoError, Result};

use super::{BoundedReader, Mirror};

/// A mirror behind an HTTP(S) base URL.
#[derive(Debug, Clone)]
pub struct HttpMirror {
    client: Client,
    base: Url,
}

impl HttpMirror {
    pub fn new(base: Url) -> Result<Self> {
        Self::with_timeout(base, Duration::from_secs(30))
    }

    pub fn with_timeout(mut base: Url, timeout: Duration) -> Result<Self> {
        // Url::join strips the last segment of a slashless base, so anchor
        // the base as a directory.
        if !base.path().ends_with('/') {
            base.set_path(&format!("{}/", base.path()));
        }
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RepoError::Transport {
                resource: base.to_string(),
                source: Box::new(e),
            })?;
        Ok(Self { client, base })
    }

    fn resource_url(&self, path: &str) -> Result<Url> {
        self.base
            .join(path.trim_start_matches('/'))
            .map_err(|e| RepoError::Transport {
                resource: path.to_string(),
                source: Box::new(e),
            })
    }
}

impl Mirror for HttpMirror {
    fn open(&self, path: &str, max_length: u64) -> Result<Box<dyn Read + Send>> {
        let url = self.resource_url(path)?;
        let response = self
            .client
            .get(url.clone())
            .send()
            .map_err(|e| RepoError::Transport {
                resource: path.to_string(),
                source: Box::new(e),
            })?;
        match response.status() {
            StatusCode::NOT_FOUND => Err(RepoError::NotFound {
                resource: path.to_string(),
            }),
            status if status.is_success() => {
                Ok(Box::new(BoundedReader::new(response, path, max_length)))
            }
            status => Err(RepoError::Transport {
                resource: path.to_string(),
                source: format!("mirror answered {status} for {url}").into(),
            }),
        }
    }
}
