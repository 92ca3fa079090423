//! HTTP client for playlists, pages and segment bodies

use bytes::Bytes;
use reqwest::{Client, Response};
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::debug;
use url::Url;

use super::atomic::TempFile;
use super::{FetchError, Result};
use crate::config::HttpSettings;

/// Thin wrapper over a pooled `reqwest::Client`. Requests are attempted
/// exactly once; callers decide whether a failure is worth another try.
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    pub fn new(settings: &HttpSettings) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(settings.connect_timeout_secs))
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .user_agent(&settings.user_agent)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .map_err(|e| FetchError::Client(e.to_string()))?;

        Ok(Self { client })
    }

    /// GET `url`, failing on any non-success status.
    async fn get(&self, url: &Url) -> Result<Response> {
        debug!(%url, "GET");

        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| request_error(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        Ok(response)
    }

    pub async fn get_bytes(&self, url: &Url) -> Result<Bytes> {
        let response = self.get(url).await?;
        response.bytes().await.map_err(|e| request_error(url, e))
    }

    /// Fetch a text document (playlist, HTML page).
    pub async fn get_text(&self, url: &Url) -> Result<String> {
        let body = self.get_bytes(url).await?;
        Ok(String::from_utf8_lossy(&body).into_owned())
    }

    /// Stream the body of `url` into `dest` through a temp file, returning
    /// the number of bytes written. `dest` only appears once complete.
    pub async fn download_to(&self, url: &Url, dest: &Path) -> Result<u64> {
        let mut response = self.get(url).await?;

        let (temp, mut file) = TempFile::create(dest)
            .await
            .map_err(|e| FetchError::io(dest, e))?;

        let mut written = 0u64;
        while let Some(chunk) = response.chunk().await.map_err(|e| request_error(url, e))? {
            file.write_all(&chunk)
                .await
                .map_err(|e| FetchError::io(temp.path(), e))?;
            written += chunk.len() as u64;
        }

        if written == 0 {
            return Err(FetchError::EmptyBody {
                url: url.to_string(),
            });
        }

        file.flush().await.map_err(|e| FetchError::io(temp.path(), e))?;
        file.sync_all().await.map_err(|e| FetchError::io(temp.path(), e))?;
        drop(file);

        temp.commit(dest).await.map_err(|e| FetchError::io(dest, e))?;
        debug!(%url, size = written, "Download completed");

        Ok(written)
    }
}

fn request_error(url: &Url, e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout {
            url: url.to_string(),
        }
    } else {
        FetchError::Request {
            url: url.to_string(),
            message: e.to_string(),
        }
    }
}
