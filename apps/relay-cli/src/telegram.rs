//! Telegram Bot API [`Uploader`].

use std::path::Path;

use futures_util::StreamExt;
use linkrelay_relay::{BoxFuture, UploadError, Uploader};
use linkrelay_transfer::ByteCounter;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use tokio_util::io::ReaderStream;

/// Sends documents to one chat through `sendDocument`.
pub struct TelegramUploader {
    http: reqwest::Client,
    api_base: String,
    bot_token: String,
    chat_id: String,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

impl TelegramUploader {
    pub fn new(api_base: &str, bot_token: &str, chat_id: &str) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().build()?;
        Ok(Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
            bot_token: bot_token.to_string(),
            chat_id: chat_id.to_string(),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/bot{}/sendDocument", self.api_base, self.bot_token)
    }
}

impl Uploader for TelegramUploader {
    fn upload<'a>(
        &'a self,
        path: &'a Path,
        caption: &'a str,
        sent: ByteCounter,
    ) -> BoxFuture<'a, Result<(), UploadError>> {
        Box::pin(async move {
            let file = tokio::fs::File::open(path).await?;
            let length = file.metadata().await?.len();
            let file_name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "document".into());

            let body = ReaderStream::new(file).map(move |chunk| {
                if let Ok(bytes) = &chunk {
                    sent.add(bytes.len() as u64);
                }
                chunk
            });
            let document = Part::stream_with_length(reqwest::Body::wrap_stream(body), length)
                .file_name(file_name);
            let form = Form::new()
                .text("chat_id", self.chat_id.clone())
                .text("caption", caption.to_string())
                .part("document", document);

            // The URL carries the bot token; keep it out of error messages.
            let resp = self
                .http
                .post(self.endpoint())
                .multipart(form)
                .send()
                .await
                .map_err(|e| UploadError::Transport(e.without_url().to_string()))?;
            let status = resp.status();
            let body = resp
                .bytes()
                .await
                .map_err(|e| UploadError::Transport(e.without_url().to_string()))?;

            interpret_response(status.as_u16(), &body)
        })
    }
}

/// Maps a Bot API reply to success or [`UploadError::Rejected`].
fn interpret_response(status: u16, body: &[u8]) -> Result<(), UploadError> {
    let parsed: Option<ApiResponse> = serde_json::from_slice(body).ok();
    let success = (200..300).contains(&status);

    match parsed {
        Some(ApiResponse { ok: true, .. }) if success => Ok(()),
        Some(ApiResponse {
            description: Some(description),
            ..
        }) => Err(UploadError::Rejected(description)),
        _ if success => Err(UploadError::Rejected("unexpected response body".into())),
        _ => Err(UploadError::Rejected(format!("HTTP {status}"))),
    }
}
