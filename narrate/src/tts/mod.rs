//! TTS backend trait and request types.

pub mod http;

pub use http::HttpTtsBackend;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default neural voice.
pub const DEFAULT_VOICE: &str = "zh-CN-YunxiNeural";

/// Calling convention for the TTS endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum RequestStyle {
    /// `POST {base}/tts` with a JSON body carrying text, voice and file name
    #[default]
    Json,
    /// `GET {base}/tts?text=&voice=&rate=&pitch=`
    Query,
}

/// Voice selection sent with each request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceOptions {
    /// Voice identifier, e.g. a neural voice name
    pub voice: String,
    /// Speaking rate, e.g. "+0%" (query style only)
    pub rate: String,
    /// Pitch shift, e.g. "+0Hz" (query style only)
    pub pitch: String,
}

impl Default for VoiceOptions {
    fn default() -> Self {
        Self {
            voice: DEFAULT_VOICE.to_string(),
            rate: "+0%".to_string(),
            pitch: "+0Hz".to_string(),
        }
    }
}

impl VoiceOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the voice identifier.
    pub fn with_voice(mut self, voice: impl Into<String>) -> Self {
        self.voice = voice.into();
        self
    }

    /// Set the speaking rate.
    pub fn with_rate(mut self, rate: impl Into<String>) -> Self {
        self.rate = rate.into();
        self
    }

    /// Set the pitch.
    pub fn with_pitch(mut self, pitch: impl Into<String>) -> Self {
        self.pitch = pitch.into();
        self
    }
}

/// One text unit to synthesize.
#[derive(Debug, Clone)]
pub struct SpeechRequest {
    /// Text to speak
    pub text: String,
    /// Desired output file name, passed through to the service
    pub file_name: String,
    pub voice: VoiceOptions,
}

/// What came back from the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transfer {
    /// HTTP status code
    pub status: u16,
    /// Bytes written to the destination (0 unless the status was 2xx)
    pub bytes_written: u64,
}

impl Transfer {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Transport-level failures. A non-2xx status is not an error here; it is
/// reported through [`Transfer::status`].
#[derive(Debug, Error)]
pub enum TtsError {
    #[error("Failed to build HTTP client: {0}")]
    Client(String),

    #[error("Request failed: {0}")]
    Request(String),

    #[error("Request timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("Failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// TTS backend trait - anything that turns text into an audio file.
#[async_trait]
pub trait TtsBackend: Send + Sync {
    /// Issue one request and stream a successful response body to `dest`.
    ///
    /// No retry is attempted.
    async fn synthesize(&self, request: &SpeechRequest, dest: &Path) -> Result<Transfer, TtsError>;

    /// Human-readable endpoint description.
    fn endpoint(&self) -> String;
}

#[cfg(test)]
pub mod testing {
    //! Test doubles: a scripted backend and a loopback HTTP server.

    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    /// Scripted reply for one request.
    #[derive(Debug, Clone, Copy)]
    pub enum MockReply {
        /// Respond with this status and write `bytes` bytes on success
        Status(u16, usize),
        /// Fail as a connection error
        Refused,
        /// Fail as a timeout
        TimedOut,
    }

    type Script = Box<dyn Fn(&SpeechRequest) -> MockReply + Send + Sync>;

    /// A backend that answers from a script and tracks concurrency.
    pub struct MockBackend {
        script: Script,
        latency: Duration,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        calls: AtomicUsize,
        seen: Mutex<Vec<String>>,
    }

    impl MockBackend {
        pub fn new(script: impl Fn(&SpeechRequest) -> MockReply + Send + Sync + 'static) -> Self {
            Self {
                script: Box::new(script),
                latency: Duration::ZERO,
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                calls: AtomicUsize::new(0),
                seen: Mutex::new(Vec::new()),
            }
        }

        /// Always answer with `status` and a body of `bytes` bytes.
        pub fn always(status: u16, bytes: usize) -> Self {
            Self::new(move |_| MockReply::Status(status, bytes))
        }

        pub fn with_latency(mut self, latency: Duration) -> Self {
            self.latency = latency;
            self
        }

        pub fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        pub fn peak_in_flight(&self) -> usize {
            self.peak.load(Ordering::SeqCst)
        }

        /// File names requested so far, in arrival order.
        pub fn requested_files(&self) -> Vec<String> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl TtsBackend for MockBackend {
        async fn synthesize(&self, request: &SpeechRequest, dest: &Path) -> Result<Transfer, TtsError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push(request.file_name.clone());
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);

            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }

            let result = match (self.script)(request) {
                MockReply::Status(status, bytes) => {
                    let transfer = Transfer {
                        status,
                        bytes_written: 0,
                    };
                    if !transfer.is_success() {
                        Ok(transfer)
                    } else {
                        match std::fs::write(dest, vec![0u8; bytes]) {
                            Ok(()) => Ok(Transfer {
                                bytes_written: bytes as u64,
                                ..transfer
                            }),
                            Err(source) => Err(TtsError::Write {
                                path: dest.to_path_buf(),
                                source,
                            }),
                        }
                    }
                }
                MockReply::Refused => Err(TtsError::Request("connection refused".to_string())),
                MockReply::TimedOut => Err(TtsError::Timeout { secs: 1 }),
            };

            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            result
        }

        fn endpoint(&self) -> String {
            "mock://tts".to_string()
        }
    }

    /// A one-shot HTTP server on the loopback interface.
    pub struct FakeServer {
        pub base_url: String,
        request: tokio::task::JoinHandle<Vec<u8>>,
    }

    impl FakeServer {
        /// Serve exactly one request with the given status and body.
        pub async fn respond(status: u16, body: Vec<u8>) -> Self {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let base_url = format!("http://{}", listener.local_addr().unwrap());

            let request = tokio::spawn(async move {
                let (mut stream, _) = listener.accept().await.unwrap();
                let request = read_request(&mut stream).await;
                let head = format!(
                    "HTTP/1.1 {} Fake\r\nContent-Type: audio/mpeg\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    status,
                    body.len()
                );
                stream.write_all(head.as_bytes()).await.unwrap();
                stream.write_all(&body).await.unwrap();
                stream.shutdown().await.ok();
                request
            });

            Self { base_url, request }
        }

        /// Accept one connection and never answer it.
        pub async fn hang() -> Self {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let base_url = format!("http://{}", listener.local_addr().unwrap());

            let request = tokio::spawn(async move {
                let (mut stream, _) = listener.accept().await.unwrap();
                let request = read_request(&mut stream).await;
                tokio::time::sleep(Duration::from_secs(30)).await;
                request
            });

            Self { base_url, request }
        }

        /// The raw request the server received.
        pub async fn received(self) -> Vec<u8> {
            self.request.await.unwrap()
        }
    }

    async fn read_request(stream: &mut TcpStream) -> Vec<u8> {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];

        loop {
            let n = stream.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);

            if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                let headers = String::from_utf8_lossy(&buf[..pos]).to_ascii_lowercase();
                let content_length = headers
                    .lines()
                    .find_map(|line| line.strip_prefix("content-length:"))
                    .and_then(|v| v.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if buf.len() >= pos + 4 + content_length {
                    break;
                }
            }
        }

        buf
    }

    /// Split a raw HTTP request into its head and body.
    pub fn split_request(raw: &[u8]) -> (String, Vec<u8>) {
        let pos = raw
            .windows(4)
            .position(|w| w == b"\r\n\r\n")
            .expect("request has a header terminator");
        (
            String::from_utf8_lossy(&raw[..pos]).into_owned(),
            raw[pos + 4..].to_vec(),
        )
    }
}
