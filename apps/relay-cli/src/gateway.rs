//! HTTP storage gateway [`Fetcher`].
//!
//! The gateway performs the storage provider handshake and decryption and
//! serves plain objects at `{base}/{kind}/{id}?key=...`.

use std::path::Path;

use linkrelay_relay::{BoxFuture, FetchError, Fetcher, RemoteObject, SourceLink};
use percent_encoding::percent_decode_str;
use reqwest::header::{CONTENT_DISPOSITION, CONTENT_LENGTH, HeaderMap};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use tokio::io::AsyncWriteExt;

/// Fetches objects through an HTTP gateway.
pub struct GatewayFetcher {
    http: reqwest::Client,
    base_url: String,
}

impl GatewayFetcher {
    pub fn new(base_url: &str) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn object_url(&self, link: &SourceLink) -> String {
        format!("{}/{}/{}", self.base_url, link.kind.as_str(), link.id)
    }

    fn request(&self, method: Method, link: &SourceLink) -> RequestBuilder {
        let req = self.http.request(method, self.object_url(link));
        match &link.key {
            Some(key) => req.query(&[("key", key)]),
            None => req,
        }
    }

    async fn send(&self, method: Method, link: &SourceLink) -> Result<Response, FetchError> {
        let resp = self
            .request(method, link)
            .send()
            .await
            .map_err(|e| {
                FetchError::DownloadFailure(format!("gateway request failed: {}", e.without_url()))
            })?;

        match resp.status() {
            s if s.is_success() => Ok(resp),
            StatusCode::NOT_FOUND => Err(FetchError::DownloadFailure(format!(
                "object {} not found",
                link.id
            ))),
            s => Err(FetchError::DownloadFailure(format!("gateway returned {s}"))),
        }
    }
}

impl Fetcher for GatewayFetcher {
    fn stat<'a>(&'a self, link: &'a SourceLink) -> BoxFuture<'a, Result<RemoteObject, FetchError>> {
        Box::pin(async move {
            let resp = self.send(Method::HEAD, link).await?;
            let headers = resp.headers();
            Ok(RemoteObject {
                name: attachment_name(headers).unwrap_or_else(|| link.id.clone()),
                size: declared_length(headers),
            })
        })
    }

    fn download<'a>(
        &'a self,
        link: &'a SourceLink,
        _object: &'a RemoteObject,
        dest: &'a Path,
    ) -> BoxFuture<'a, Result<(), FetchError>> {
        Box::pin(async move {
            let mut resp = self.send(Method::GET, link).await?;
            let mut file = tokio::fs::File::create(dest).await?;

            while let Some(chunk) = resp.chunk().await.map_err(|e| {
                FetchError::DownloadFailure(format!("stream interrupted: {}", e.without_url()))
            })? {
                file.write_all(&chunk).await?;
            }

            file.flush().await?;
            file.sync_all().await?;
            Ok(())
        })
    }
}

/// `Content-Length` as sent. HEAD responses have no body, so the
/// response's own length hint cannot be used.
fn declared_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

fn attachment_name(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(CONTENT_DISPOSITION)?.to_str().ok()?;
    disposition_filename(value)
}

/// Extracts the file name from a `Content-Disposition` value, preferring
/// the RFC 5987 `filename*` form.
fn disposition_filename(value: &str) -> Option<String> {
    let mut plain = None;
    for param in value.split(';').map(str::trim) {
        let Some((key, raw)) = param.split_once('=') else {
            continue;
        };
        match key.trim().to_ascii_lowercase().as_str() {
            "filename*" => {
                // charset'language'percent-encoded
                let decoded = raw
                    .trim()
                    .splitn(3, '\'')
                    .nth(2)
                    .and_then(|encoded| percent_decode_str(encoded).decode_utf8().ok());
                if let Some(name) = decoded.filter(|n| !n.is_empty()) {
                    return Some(name.into_owned());
                }
            }
            "filename" => {
                let name = raw.trim().trim_matches('"');
                if !name.is_empty() {
                    plain = Some(name.to_string());
                }
            }
            _ => {}
        }
    }
    plain
}
