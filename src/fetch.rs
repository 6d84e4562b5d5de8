// Statement download for URL requests
use std::time::{Duration, Instant};

use reqwest::Url;
use tracing::{debug, info};

use crate::types::{CamsError, Result};

/// Only plain web URLs are fetched.
pub fn parse_url(url: &str) -> Result<Url> {
    let parsed = Url::parse(url.trim()).map_err(|err| CamsError::InvalidRequest(format!("bad url {url:?}: {err}")))?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        other => Err(CamsError::InvalidRequest(format!("unsupported url scheme {other:?}"))),
    }
}

/// Download a statement, failing with `DownloadFailed` on timeout, transport
/// errors and non-2xx responses. The timeout covers the whole transfer.
pub async fn fetch_document(client: &reqwest::Client, url: &Url, timeout: Duration) -> Result<Vec<u8>> {
    let started = Instant::now();
    debug!(%url, ?timeout, "downloading statement");

    let response = tokio::time::timeout(timeout, client.get(url.clone()).send())
        .await
        .map_err(|_| CamsError::DownloadFailed(format!("timed out after {timeout:?}")))?
        .map_err(|err| CamsError::DownloadFailed(err.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        return Err(CamsError::DownloadFailed(format!("{url} answered HTTP {status}")));
    }

    let remaining = timeout.saturating_sub(started.elapsed());
    let body = tokio::time::timeout(remaining, response.bytes())
        .await
        .map_err(|_| CamsError::DownloadFailed(format!("timed out after {timeout:?}")))?
        .map_err(|err| CamsError::DownloadFailed(err.to_string()))?;

    info!(bytes = body.len(), elapsed_ms = started.elapsed().as_millis() as u64, "statement downloaded");
    Ok(body.to_vec())
}
