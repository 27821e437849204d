//! Remote files: public links, the Drive API fallback, and document text

use async_trait::async_trait;
use futures_util::StreamExt;
use once_cell::sync::Lazy;
use regex::Regex;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;

use super::openai::check_status;
use super::retry::RetryPolicy;
use crate::config::DriveConfig;
use crate::error::{Error, ProviderError, Result};
use crate::ingestion::text::{bytes_to_text, html_to_text, looks_like_html};
use crate::processing::JobControl;

static DRIVE_PATH_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/d/([A-Za-z0-9_-]{10,})").expect("valid regex"));
static DRIVE_QUERY_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[?&]id=([A-Za-z0-9_-]{10,})").expect("valid regex"));

/// Drive/Docs file id embedded in a share link
pub fn drive_file_id(link: &str) -> Option<String> {
    if !(link.contains("drive.google.com") || link.contains("docs.google.com")) {
        return None;
    }
    DRIVE_PATH_ID
        .captures(link)
        .or_else(|| DRIVE_QUERY_ID.captures(link))
        .map(|c| c[1].to_string())
}

fn is_google_doc(link: &str) -> bool {
    link.contains("docs.google.com/document/")
}

/// Downloads and text fetches
#[async_trait]
pub trait RemoteFetcher: Send + Sync {
    /// Download to `dest`, trying the public link before the Drive API
    async fn download(&self, link: &str, dest: &Path, control: &JobControl) -> Result<u64>;

    /// Download to `dest` through the authenticated Drive API only
    async fn download_authenticated(&self, link: &str, dest: &Path, control: &JobControl) -> Result<u64>;

    /// Plain text of a document link (Docs export, HTML page, or raw file)
    async fn fetch_text(&self, link: &str, control: &JobControl) -> Result<String>;
}

/// reqwest-based fetcher with Google Drive support
pub struct HttpFetcher {
    client: reqwest::Client,
    config: DriveConfig,
    policy: RetryPolicy,
}

impl HttpFetcher {
    pub fn new(config: &DriveConfig, policy: RetryPolicy) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            config: config.clone(),
            policy,
        })
    }

    fn public_url(&self, link: &str) -> String {
        match drive_file_id(link) {
            Some(id) if !is_google_doc(link) => format!(
                "{}/uc?export=download&id={}",
                self.config.download_base.trim_end_matches('/'),
                id
            ),
            _ => link.to_string(),
        }
    }

    fn api_media_url(&self, id: &str) -> String {
        format!(
            "{}/files/{}?alt=media&supportsAllDrives=true",
            self.config.api_base.trim_end_matches('/'),
            id
        )
    }

    fn token(&self, link: &str) -> Result<&str> {
        self.config
            .access_token
            .as_deref()
            .ok_or_else(|| Error::fetch(link, "no Drive access token configured"))
    }

    /// One GET attempt; transport failures and error statuses come back as provider errors
    async fn request(&self, url: &str, bearer: Option<&str>) -> Result<reqwest::Response> {
        let mut request = self.client.get(url);
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }
        let response = request.send().await.map_err(ProviderError::from)?;
        Ok(check_status(response).await?)
    }

    /// GET with retries on 429, 5xx and timeouts
    async fn get(
        &self,
        link: &str,
        url: &str,
        bearer: Option<&str>,
        control: &JobControl,
    ) -> Result<reqwest::Response> {
        self.policy
            .run(link, control, move || self.request(url, bearer))
            .await
            .map_err(|e| fetch_error(link, e))
    }

    /// Stream `url` into `dest` through a `.part` file
    ///
    /// A failed attempt, mid-body included, restarts the download from the first byte.
    async fn save(
        &self,
        link: &str,
        url: &str,
        bearer: Option<&str>,
        dest: &Path,
        control: &JobControl,
    ) -> Result<u64> {
        let part = part_path(dest);
        let part_ref = part.as_path();
        // a Drive interstitial page instead of the file
        let reject_html = bearer.is_none() && drive_file_id(link).is_some();

        let result = self
            .policy
            .run(link, control, move || async move {
                let response = self.request(url, bearer).await?;
                if reject_html && is_html(&response) {
                    return Err(Error::fetch(link, "public link returned an HTML page"));
                }
                stream_to_file(link, response, part_ref, control).await
            })
            .await;

        match result {
            Ok(bytes) => {
                tokio::fs::rename(&part, dest).await?;
                Ok(bytes)
            }
            Err(e) => {
                let _ = tokio::fs::remove_file(&part).await;
                Err(fetch_error(link, e))
            }
        }
    }

    async fn read_text(&self, link: &str, response: reqwest::Response) -> Result<String> {
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response
            .bytes()
            .await
            .map_err(|e| Error::fetch(link, e.to_string()))?;
        let text = bytes_to_text(&body);

        if looks_like_html(content_type.as_deref(), &text) {
            Ok(html_to_text(&text))
        } else {
            Ok(text)
        }
    }
}

fn is_html(response: &reqwest::Response) -> bool {
    response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.contains("text/html"))
}

/// Exhausted provider-level failures reported against the link
fn fetch_error(link: &str, err: Error) -> Error {
    match err {
        Error::Provider(ProviderError::Status { status, .. }) => {
            Error::fetch(link, format!("HTTP {}", status))
        }
        Error::Provider(provider) => Error::fetch(link, provider.to_string()),
        other => other,
    }
}

/// `<dest>.part`
fn part_path(dest: &Path) -> PathBuf {
    let mut name: OsString = dest.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

async fn stream_to_file(
    link: &str,
    response: reqwest::Response,
    part: &Path,
    control: &JobControl,
) -> Result<u64> {
    // truncates what an earlier attempt left behind
    let mut file = tokio::fs::File::create(part).await?;
    let mut stream = response.bytes_stream();
    let mut written = 0u64;

    while let Some(chunk) = stream.next().await {
        control.throw_if_cancelled()?;
        let chunk = chunk.map_err(ProviderError::from)?;
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;

    if written == 0 {
        return Err(Error::fetch(link, "empty download"));
    }
    Ok(written)
}

#[async_trait]
impl RemoteFetcher for HttpFetcher {
    async fn download(&self, link: &str, dest: &Path, control: &JobControl) -> Result<u64> {
        let url = self.public_url(link);
        match self.save(link, &url, None, dest, control).await {
            Ok(bytes) => Ok(bytes),
            Err(Error::Cancelled) => Err(Error::Cancelled),
            Err(e) if drive_file_id(link).is_some() && self.config.access_token.is_some() => {
                tracing::warn!("Public download failed ({}), trying Drive API", e);
                control.throw_if_cancelled()?;
                self.download_authenticated(link, dest, control).await
            }
            Err(e) => Err(e),
        }
    }

    async fn download_authenticated(&self, link: &str, dest: &Path, control: &JobControl) -> Result<u64> {
        let id = drive_file_id(link)
            .ok_or_else(|| Error::fetch(link, "not a Google Drive link"))?;
        let token = self.token(link)?;
        let url = self.api_media_url(&id);
        let bytes = self.save(link, &url, Some(token), dest, control).await?;
        tracing::info!("Downloaded {} bytes via Drive API", bytes);
        Ok(bytes)
    }

    async fn fetch_text(&self, link: &str, control: &JobControl) -> Result<String> {
        let text = match drive_file_id(link) {
            Some(id) if is_google_doc(link) => {
                let export = format!(
                    "{}/document/d/{}/export?format=txt",
                    self.config.docs_base.trim_end_matches('/'),
                    id
                );
                match self.get(link, &export, None, control).await {
                    Ok(response) => self.read_text(link, response).await?,
                    Err(e) if self.config.access_token.is_some() => {
                        tracing::warn!("Public export failed ({}), trying Drive API", e);
                        control.throw_if_cancelled()?;
                        let url = format!(
                            "{}/files/{}/export?mimeType=text/plain",
                            self.config.api_base.trim_end_matches('/'),
                            id
                        );
                        let response = self
                            .get(link, &url, Some(self.token(link)?), control)
                            .await?;
                        self.read_text(link, response).await?
                    }
                    Err(e) => return Err(e),
                }
            }
            _ => {
                let response = self
                    .get(link, &self.public_url(link), None, control)
                    .await?;
                self.read_text(link, response).await?
            }
        };

        let text = text.trim().to_string();
        if text.is_empty() {
            return Err(Error::fetch(link, "document has no text"));
        }
        Ok(text)
    }
}
