//! HTTP TTS backend.
//!
//! Talks to a remote service exposing `/tts`. The JSON convention encodes the
//! payload with serde_json, so quotes and backslashes in narrative text are
//! escaped by the encoder rather than by hand.

use super::{RequestStyle, SpeechRequest, Transfer, TtsBackend, TtsError};
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use serde::Serialize;
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;

/// Connect timeout, separate from the per-request timeout.
const CONNECT_TIMEOUT_SECS: u64 = 30;

/// JSON body for the POST convention.
#[derive(Debug, Serialize)]
pub struct TtsPayload<'a> {
    pub text: &'a str,
    pub voice: &'a str,
    pub file_name: &'a str,
}

impl<'a> TtsPayload<'a> {
    pub fn from_request(request: &'a SpeechRequest) -> Self {
        Self {
            text: &request.text,
            voice: &request.voice.voice,
            file_name: &request.file_name,
        }
    }
}

/// Backend for an HTTP TTS service.
pub struct HttpTtsBackend {
    base_url: String,
    style: RequestStyle,
    timeout: Option<Duration>,
    client: Client,
}

impl HttpTtsBackend {
    /// Create a backend for `base_url`.
    ///
    /// `timeout` bounds each whole request including the body transfer;
    /// `None` waits indefinitely.
    pub fn new(base_url: &str, style: RequestStyle, timeout: Option<Duration>) -> Result<Self, TtsError> {
        let mut builder = Client::builder().connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS));
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().map_err(|e| TtsError::Client(e.to_string()))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            style,
            timeout,
            client,
        })
    }

    fn url(&self) -> String {
        format!("{}/tts", self.base_url)
    }

    fn map_error(&self, e: reqwest::Error) -> TtsError {
        if e.is_timeout() {
            TtsError::Timeout {
                secs: self.timeout.map(|t| t.as_secs()).unwrap_or(0),
            }
        } else {
            TtsError::Request(e.to_string())
        }
    }
}

#[async_trait]
impl TtsBackend for HttpTtsBackend {
    async fn synthesize(&self, request: &SpeechRequest, dest: &Path) -> Result<Transfer, TtsError> {
        let builder = match self.style {
            RequestStyle::Json => self
                .client
                .post(self.url())
                .json(&TtsPayload::from_request(request)),
            RequestStyle::Query => self.client.get(self.url()).query(&[
                ("text", request.text.as_str()),
                ("voice", request.voice.voice.as_str()),
                ("rate", request.voice.rate.as_str()),
                ("pitch", request.voice.pitch.as_str()),
            ]),
        };

        let response = builder.send().await.map_err(|e| self.map_error(e))?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            log::debug!("{} answered HTTP {} for {}", self.url(), status, request.file_name);
            return Ok(Transfer {
                status,
                bytes_written: 0,
            });
        }

        let write_error = |source| TtsError::Write {
            path: dest.to_path_buf(),
            source,
        };

        let mut file = tokio::fs::File::create(dest).await.map_err(write_error)?;
        let mut stream = response.bytes_stream();
        let mut written: u64 = 0;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| self.map_error(e))?;
            file.write_all(&chunk).await.map_err(write_error)?;
            written += chunk.len() as u64;
        }
        file.flush().await.map_err(write_error)?;

        Ok(Transfer {
            status,
            bytes_written: written,
        })
    }

    fn endpoint(&self) -> String {
        let style = match self.style {
            RequestStyle::Json => "POST",
            RequestStyle::Query => "GET",
        };
        format!("{} {}", style, self.url())
    }
}
