//! Binary-protocol backend speaking connect-framed protobuf over HTTP.

pub mod checksum;
pub mod proto;

pub use checksum::checksum;
pub use proto::{encode_request, StreamChatRequest, StreamChatResponse};

use crate::{
    frame::{Frame, FrameParser},
    BackendEvent, ChatBackend, ChatRequest, CompletionError, StreamTranslator,
};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use prost::Message;
use reqwest::{
    header::{HeaderMap, HeaderValue},
    Client,
};
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::mpsc;

pub const STREAM_CHAT_PATH: &str = "/aiserver.v1.AiService/StreamChat";
pub const CONTENT_TYPE: &str = "application/connect+proto";
pub const USER_AGENT: &str = "connect-es/1.4.0";

/// Configuration for the binary-protocol backend
#[derive(Debug, Clone)]
pub struct CursorBackendConfig {
    pub base_url: String,
    pub client_version: String,
    pub timezone: String,
    /// Static checksum sent instead of the token-derived one
    pub checksum: Option<String>,
    pub proxy: Option<String>,
    pub timeout_seconds: u64,
}

impl Default for CursorBackendConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api2.cursor.sh".to_string(),
            client_version: "0.42.3".to_string(),
            timezone: "Asia/Shanghai".to_string(),
            checksum: None,
            proxy: None,
            timeout_seconds: 120,
        }
    }
}

/// End-of-stream trailer carried by a frame flagged `0x02`
#[derive(Debug, Deserialize)]
struct EndStreamTrailer {
    error: Option<TrailerError>,
}

#[derive(Debug, Deserialize)]
struct TrailerError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

impl TrailerError {
    fn into_completion_error(self) -> CompletionError {
        match self.code.as_str() {
            "resource_exhausted" => CompletionError::RateLimited,
            "unauthenticated" => CompletionError::HttpStatus {
                status: 401,
                body: self.message,
            },
            "permission_denied" => CompletionError::HttpStatus {
                status: 403,
                body: self.message,
            },
            _ if self.message.is_empty() => CompletionError::CompletionError(self.code),
            _ => crate::sentinel::classify_error_message(&self.message),
        }
    }
}

pub struct CursorBackend {
    config: CursorBackendConfig,
    client: Client,
}

impl CursorBackend {
    pub fn new(config: CursorBackendConfig) -> Result<Self, CompletionError> {
        let mut builder = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .pool_idle_timeout(Duration::from_secs(90))
            .read_timeout(Duration::from_secs(config.timeout_seconds));

        if let Some(proxy) = config.proxy.as_deref().filter(|p| !p.is_empty()) {
            let proxy = reqwest::Proxy::all(proxy)
                .map_err(|e| CompletionError::TransportError(format!("Invalid proxy: {e}")))?;
            builder = builder.proxy(proxy);
        }

        let client = builder.build().map_err(|e| {
            CompletionError::TransportError(format!("Failed to create HTTP client: {e}"))
        })?;

        Ok(Self { config, client })
    }

    pub fn config(&self) -> &CursorBackendConfig {
        &self.config
    }

    fn build_headers(&self, token: &str) -> Result<HeaderMap, CompletionError> {
        let checksum = match &self.config.checksum {
            Some(value) if !value.is_empty() => value.clone(),
            _ => checksum(token),
        };

        let header = |value: &str| {
            HeaderValue::from_str(value)
                .map_err(|e| CompletionError::CompletionError(format!("Invalid header value: {e}")))
        };

        let mut headers = HeaderMap::new();
        headers.insert("authorization", header(&format!("Bearer {token}"))?);
        headers.insert("content-type", HeaderValue::from_static(CONTENT_TYPE));
        headers.insert("connect-protocol-version", HeaderValue::from_static("1"));
        headers.insert("connect-accept-encoding", HeaderValue::from_static("gzip"));
        headers.insert("user-agent", HeaderValue::from_static(USER_AGENT));
        headers.insert("x-cursor-checksum", header(&checksum)?);
        headers.insert("x-cursor-client-version", header(&self.config.client_version)?);
        headers.insert("x-cursor-timezone", header(&self.config.timezone)?);
        Ok(headers)
    }

    /// Send an encoded request frame and return the streamed response.
    ///
    /// Only a success status is accepted; anything else is terminal for this
    /// call.
    pub async fn fetch(&self, frame: Bytes, token: &str) -> Result<reqwest::Response, CompletionError> {
        let url = format!(
            "{}{}",
            self.config.base_url.trim_end_matches('/'),
            STREAM_CHAT_PATH
        );
        let headers = self.build_headers(token)?;

        let response = self
            .client
            .post(&url)
            .headers(headers)
            .body(frame)
            .send()
            .await
            .map_err(|e| CompletionError::TransportError(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(status, "StreamChat request rejected");
            if status == 429 {
                return Err(CompletionError::RateLimited);
            }
            return Err(CompletionError::HttpStatus { status, body });
        }

        Ok(response)
    }
}

/// Decode one inbound frame into the event it carries, if any.
///
/// Returns `Ok(None)` for data frames without text and for a clean trailer.
fn frame_event(frame: &Frame) -> Result<Option<BackendEvent>, CompletionError> {
    let payload = frame.decoded_payload()?;

    if frame.is_end_stream() {
        if payload.is_empty() {
            return Ok(None);
        }
        let trailer: EndStreamTrailer = serde_json::from_slice(&payload).map_err(|e| {
            CompletionError::InvalidResponse(format!("Malformed end-of-stream trailer: {e}"))
        })?;
        return match trailer.error {
            Some(error) => Err(error.into_completion_error()),
            None => Ok(None),
        };
    }

    let message = StreamChatResponse::decode(payload)
        .map_err(|e| CompletionError::InvalidResponse(format!("Malformed response frame: {e}")))?;
    if message.text.is_empty() {
        return Ok(None);
    }
    Ok(Some(BackendEvent::Append(message.text)))
}

/// Pump frames from `body` into `tx` until the stream ends or the consumer leaves
async fn relay_frames<S, E>(body: S, tx: mpsc::Sender<BackendEvent>)
where
    S: futures_util::Stream<Item = Result<Bytes, E>> + Unpin,
    E: std::fmt::Display,
{
    let mut frames = FrameParser::new(body);
    while let Some(item) = frames.next().await {
        let event = match item.and_then(|frame| {
            let end = frame.is_end_stream();
            frame_event(&frame).map(|event| (event, end))
        }) {
            Ok((Some(event), end)) => {
                if tx.send(event).await.is_err() {
                    tracing::debug!("Consumer dropped, stopping frame relay");
                    return;
                }
                if end {
                    return;
                }
                continue;
            }
            Ok((None, true)) => return,
            Ok((None, false)) => continue,
            Err(e) => BackendEvent::Failed(e),
        };
        let _ = tx.send(event).await;
        return;
    }
}

#[async_trait]
impl ChatBackend for CursorBackend {
    fn backend_type(&self) -> &'static str {
        "cursor"
    }

    async fn chat_stream(
        &self,
        token: &str,
        request: ChatRequest,
    ) -> Result<StreamTranslator, CompletionError> {
        let frame = encode_request(&request.model, &request.messages);
        tracing::debug!(
            model = %request.model,
            messages = request.messages.len(),
            frame_bytes = frame.len(),
            "Sending StreamChat request"
        );

        let response = self.fetch(frame, token).await?;
        let (tx, translator) = StreamTranslator::channel();
        tokio::spawn(relay_frames(Box::pin(response.bytes_stream()), tx));
        Ok(translator)
    }
}
