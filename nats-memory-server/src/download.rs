//! Downloading release archives.
//!
//! The file name comes from the server's `Content-Disposition` header, which is
//! untrusted input: it is cut down to its last path segment and the resulting
//! destination is checked to still live inside the requested directory before
//! anything is written.

use std::path::{Component, Path, PathBuf};
use std::sync::LazyLock;

use futures_util::StreamExt;
use regex::Regex;
use tokio::io::AsyncWriteExt;

use crate::{Error, Result};

const MAX_REDIRECTS: usize = 10;

/// Matches quoted and unquoted `filename=` values, stops at `;`.
static FILENAME_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"filename=['"]?([^'";]+)['"]?"#).expect("Invalid content-disposition regex")
});

/// Proxies used for downloads.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyOptions {
    /// Proxy for `http://` URLs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_proxy: Option<String>,
    /// Proxy for `https://` URLs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub https_proxy: Option<String>,
    /// Comma separated hosts that bypass both proxies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub no_proxy: Option<String>,
}

impl ProxyOptions {
    /// The proxy the initial request to `url` goes through, if any.
    pub fn proxy_for(&self, url: &str) -> Option<&str> {
        if url.starts_with("https:") {
            self.https_proxy.as_deref()
        } else {
            self.http_proxy.as_deref()
        }
    }

    fn client(&self) -> Result<reqwest::Client> {
        let mut builder = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS));

        let no_proxy = self
            .no_proxy
            .as_deref()
            .and_then(reqwest::NoProxy::from_string);

        if let Some(proxy) = &self.http_proxy {
            let p = reqwest::Proxy::http(proxy).map_err(|source| Error::InvalidProxy {
                proxy: proxy.clone(),
                source,
            })?;
            builder = builder.proxy(p.no_proxy(no_proxy.clone()));
        }

        if let Some(proxy) = &self.https_proxy {
            let p = reqwest::Proxy::https(proxy).map_err(|source| Error::InvalidProxy {
                proxy: proxy.clone(),
                source,
            })?;
            builder = builder.proxy(p.no_proxy(no_proxy));
        }

        Ok(builder.build()?)
    }
}

/// Download `url` into `dir` and return the absolute path of the new file.
///
/// Redirects are followed. The body is written to a temporary file in `dir`
/// first and only renamed onto the final name once complete.
pub async fn download_file(url: &str, dir: &Path, proxy: &ProxyOptions) -> Result<PathBuf> {
    let client = proxy.client()?;

    tracing::info!(url, proxy = proxy.proxy_for(url), "downloading");
    let response = client.get(url).send().await?;

    let status = response.status();
    if !status.is_success() {
        tracing::warn!(url, %status, "download failed");
        return Err(Error::DownloadFailed {
            url: url.to_string(),
            status: status
                .canonical_reason()
                .map(str::to_string)
                .unwrap_or_else(|| status.to_string()),
        });
    }

    let file_name = response
        .headers()
        .get(reqwest::header::CONTENT_DISPOSITION)
        .and_then(|v| v.to_str().ok())
        .and_then(content_disposition_filename)
        .ok_or_else(|| Error::MissingFilename {
            url: url.to_string(),
        })?
        .to_string();

    let destination = safe_destination(dir, &file_name)?;
    let root = destination.parent().unwrap_or(dir);
    tokio::fs::create_dir_all(root).await?;

    let (file, partial) = tempfile::Builder::new()
        .prefix(".download-")
        .suffix(".part")
        .tempfile_in(root)?
        .into_parts();
    let mut file = tokio::fs::File::from_std(file);

    let mut written: u64 = 0;
    let mut body = response.bytes_stream();
    while let Some(chunk) = body.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;
    drop(file);

    partial.persist(&destination).map_err(|e| e.error)?;

    tracing::info!(path = %destination.display(), bytes = written, "download complete");
    Ok(destination)
}

/// Extract the file name from a `Content-Disposition` header value.
pub fn content_disposition_filename(header: &str) -> Option<&str> {
    FILENAME_PATTERN
        .captures(header)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim())
        .filter(|name| !name.is_empty())
}

/// Where a download named `file_name` may be written inside `dir`.
///
/// Only the last path segment of `file_name` is kept. Fails with
/// `PathTraversalDetected` if the result is not strictly below `dir`.
pub fn safe_destination(dir: &Path, file_name: &str) -> Result<PathBuf> {
    let root = normalize(&std::path::absolute(dir)?);
    let base = file_name.rsplit(['/', '\\']).next().unwrap_or_default();
    let destination = normalize(&root.join(base));

    if destination == root || !destination.starts_with(&root) {
        tracing::error!(file_name, dir = %root.display(), "rejected download file name");
        return Err(Error::PathTraversalDetected { path: destination });
    }

    Ok(destination)
}

/// Lexically resolve `.` and `..`, the way `path.resolve` does.
pub(crate) fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
