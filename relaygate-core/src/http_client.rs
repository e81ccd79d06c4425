use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use futures::stream::BoxStream;
use futures_util::stream::Stream;
use reqwest::{Client, StatusCode};
use serde::Serialize;

use crate::config::HttpCfg;
use crate::error::{BridgeError, CoreResult};

/// A boxed stream of UTF-8 text chunks, in arrival order.
pub type TextChunkStream = BoxStream<'static, CoreResult<String>>;

type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send>>;

/// Thin wrapper around reqwest::Client with defaults and helpers.
#[derive(Debug, Clone)]
pub struct HttpClient {
    inner: Client,
    user_agent: String,
    request_timeout: Duration,
}

impl HttpClient {
    pub fn new_default() -> CoreResult<Self> {
        Self::from_cfg(&HttpCfg::default())
    }

    pub fn from_cfg(cfg: &HttpCfg) -> CoreResult<Self> {
        // Streamed bodies are bounded by the read timeout only; the total
        // timeout is set per buffered request.
        let mut builder = Client::builder()
            .connect_timeout(Duration::from_millis(cfg.connect_timeout_ms))
            .read_timeout(Duration::from_millis(cfg.read_timeout_ms));
        if let Some(n) = cfg.pool_max_idle_per_host {
            builder = builder.pool_max_idle_per_host(n);
        }
        let inner = builder
            .build()
            .map_err(|e| BridgeError::Other(anyhow::anyhow!("http client build failed: {e}")))?;
        Ok(Self {
            inner,
            user_agent: concat!("relaygate/", env!("CARGO_PKG_VERSION")).to_string(),
            request_timeout: Duration::from_millis(cfg.request_timeout_ms),
        })
    }

    async fn send<T: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &T,
        headers: &[(&str, &str)],
        total_timeout: Option<Duration>,
    ) -> CoreResult<reqwest::Response> {
        let mut req = self
            .inner
            .post(url)
            .json(body)
            .header("User-Agent", &self.user_agent)
            .header("Accept", "text/event-stream");
        if let Some(t) = total_timeout {
            req = req.timeout(t);
        }

        // custom headers
        for (k, v) in headers {
            req = req.header(*k, *v);
        }

        let resp = req.send().await.map_err(|e| {
            tracing::warn!(url, error = %e, "upstream connection failed");
            BridgeError::UpstreamUnavailable {
                reason: e.to_string(),
            }
        })?;

        let status = resp.status();
        if !status.is_success() {
            let headers = resp.headers().clone();
            let ra = parse_retry_after(&headers);
            let body = resp.text().await.unwrap_or_default();
            tracing::warn!(url, status = status.as_u16(), "upstream returned an error status");
            return Err(map_http_error(status, ra, &body));
        }
        Ok(resp)
    }

    /// POST JSON and return the whole response body as text.
    pub async fn post_text<T: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &T,
        headers: &[(&str, &str)],
    ) -> CoreResult<String> {
        let resp = self.send(url, body, headers, Some(self.request_timeout)).await?;
        resp.text()
            .await
            .map_err(|e| BridgeError::UpstreamUnavailable {
                reason: format!("body read failed: {e}"),
            })
    }

    /// POST JSON and return the response body as a stream of text chunks.
    /// Chunk boundaries follow the network; a multi-byte character split
    /// across reads is held back until it is complete. Only the read timeout
    /// applies, so a stream may run as long as the upstream keeps sending.
    pub async fn post_chunks<T: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &T,
        headers: &[(&str, &str)],
    ) -> CoreResult<TextChunkStream> {
        let resp = self.send(url, body, headers, None).await?;
        Ok(Box::pin(Utf8ChunkStream::new(Box::pin(resp.bytes_stream()))))
    }
}

fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    if let Some(v) = headers.get("retry-after")
        && let Ok(s) = v.to_str()
        && let Ok(secs) = s.trim().parse::<u64>()
    {
        return Some(secs);
    }
    // HTTP-date forms are ignored.
    None
}

fn map_http_error(status: StatusCode, retry_after: Option<u64>, body: &str) -> BridgeError {
    match status {
        StatusCode::TOO_MANY_REQUESTS => BridgeError::RateLimited { retry_after },
        s if s.is_server_error() => BridgeError::UpstreamUnavailable {
            reason: format!("status {}", s.as_u16()),
        },
        s => BridgeError::UpstreamError {
            code: s.as_u16().to_string(),
            message: truncate(body, 300),
        },
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() > max {
        let mut end = max;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        let mut t = s[..end].to_string();
        t.push_str("...");
        t
    } else {
        s.to_string()
    }
}

/// Decode as much of `carry + bytes` as forms complete UTF-8.
///
/// An incomplete trailing sequence stays in `carry`; each invalid sequence
/// becomes one U+FFFD.
fn decode_utf8(carry: &mut Vec<u8>, bytes: &[u8]) -> String {
    carry.extend_from_slice(bytes);
    let mut out = String::new();
    let mut pos = 0;
    while pos < carry.len() {
        match std::str::from_utf8(&carry[pos..]) {
            Ok(s) => {
                out.push_str(s);
                pos = carry.len();
            }
            Err(e) => {
                let valid = pos + e.valid_up_to();
                out.push_str(&String::from_utf8_lossy(&carry[pos..valid]));
                match e.error_len() {
                    Some(n) => {
                        out.push(char::REPLACEMENT_CHARACTER);
                        pos = valid + n;
                    }
                    None => {
                        pos = valid;
                        break;
                    }
                }
            }
        }
    }
    carry.drain(..pos);
    out
}

/// Internal UTF-8 decoder over a bytes stream; yields text chunks as they arrive.
struct Utf8ChunkStream {
    inner: ByteStream,
    carry: Vec<u8>,
    done: bool,
}

impl Utf8ChunkStream {
    fn new(inner: ByteStream) -> Self {
        Self {
            inner,
            carry: Vec::new(),
            done: false,
        }
    }
}

impl Stream for Utf8ChunkStream {
    type Item = CoreResult<String>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            if self.done {
                return Poll::Ready(None);
            }
            match self.inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(chunk))) => {
                    let this = &mut *self;
                    let text = decode_utf8(&mut this.carry, &chunk);
                    if text.is_empty() {
                        continue;
                    }
                    return Poll::Ready(Some(Ok(text)));
                }
                Poll::Ready(Some(Err(e))) => {
                    self.done = true;
                    return Poll::Ready(Some(Err(BridgeError::UpstreamUnavailable {
                        reason: format!("stream read failed: {e}"),
                    })));
                }
                Poll::Ready(None) => {
                    self.done = true;
                    if self.carry.is_empty() {
                        return Poll::Ready(None);
                    }
                    let tail = String::from_utf8_lossy(&self.carry).into_owned();
                    self.carry.clear();
                    return Poll::Ready(Some(Ok(tail)));
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
