//! Sources of upstream response text.

use async_trait::async_trait;
use futures_util::StreamExt;
use secrecy::{ExposeSecret, SecretString};

use crate::config::Config;
use crate::error::{BridgeError, CoreResult};
use crate::http_client::{HttpClient, TextChunkStream};
use crate::model::UpstreamRequest;

/// Supplies an upstream response for a converted request.
///
/// `open_stream` yields raw chunks in arrival order with no alignment to
/// lines or events; the stream ends on completion or after one error item.
#[async_trait]
pub trait StreamSource: Send + Sync {
    fn name(&self) -> &str;

    async fn open_stream(&self, req: &UpstreamRequest) -> CoreResult<TextChunkStream>;

    /// Whole response body at once.
    async fn fetch(&self, req: &UpstreamRequest) -> CoreResult<String> {
        let mut stream = self.open_stream(req).await?;
        let mut body = String::new();
        while let Some(chunk) = stream.next().await {
            body.push_str(&chunk?);
        }
        Ok(body)
    }
}

/// POSTs the request to the configured chat endpoint.
pub struct HttpStreamSource {
    http: HttpClient,
    url: String,
    api_key: Option<SecretString>,
    headers: Vec<(String, String)>,
}

impl HttpStreamSource {
    pub fn new(http: HttpClient, url: impl Into<String>) -> Self {
        Self {
            http,
            url: url.into(),
            api_key: None,
            headers: Vec::new(),
        }
    }

    /// Build from config; the API key is read from the env var named in
    /// `upstream.api_key_env`, when set and present.
    pub fn from_config(cfg: &Config) -> CoreResult<Self> {
        let http = HttpClient::from_cfg(&cfg.http)?;
        let api_key = cfg
            .upstream
            .api_key_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
            .filter(|k| !k.is_empty())
            .map(SecretString::from);
        if cfg.upstream.api_key_env.is_some() && api_key.is_none() {
            tracing::warn!(
                var = cfg.upstream.api_key_env.as_deref().unwrap_or_default(),
                "upstream api key variable is not set; sending unauthenticated requests"
            );
        }
        Ok(Self {
            http,
            url: cfg.upstream_url(),
            api_key,
            headers: cfg
                .upstream
                .headers
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        })
    }

    pub fn with_api_key(mut self, key: SecretString) -> Self {
        self.api_key = Some(key);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    fn request_headers(&self) -> Vec<(String, String)> {
        let mut headers = self.headers.clone();
        if let Some(key) = &self.api_key {
            headers.push((
                "Authorization".into(),
                format!("Bearer {}", key.expose_secret()),
            ));
        }
        headers
    }
}

fn borrowed(headers: &[(String, String)]) -> Vec<(&str, &str)> {
    headers
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect()
}

#[async_trait]
impl StreamSource for HttpStreamSource {
    fn name(&self) -> &str {
        "http"
    }

    async fn open_stream(&self, req: &UpstreamRequest) -> CoreResult<TextChunkStream> {
        let owned = self.request_headers();
        self.http
            .post_chunks(&self.url, req, &borrowed(&owned))
            .await
    }

    async fn fetch(&self, req: &UpstreamRequest) -> CoreResult<String> {
        let owned = self.request_headers();
        self.http
            .post_text(&self.url, req, &borrowed(&owned))
            .await
    }
}

/// Replays captured chunks; used by the `replay` command and in tests.
#[derive(Debug, Clone, Default)]
pub struct ReplaySource {
    chunks: Vec<String>,
    fail_with: Option<String>,
}

impl ReplaySource {
    pub fn new<I, S>(chunks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            chunks: chunks.into_iter().map(Into::into).collect(),
            fail_with: None,
        }
    }

    /// End the stream with an `UpstreamUnavailable` error after the chunks.
    pub fn failing_after(mut self, reason: impl Into<String>) -> Self {
        self.fail_with = Some(reason.into());
        self
    }
}

#[async_trait]
impl StreamSource for ReplaySource {
    fn name(&self) -> &str {
        "replay"
    }

    async fn open_stream(&self, _req: &UpstreamRequest) -> CoreResult<TextChunkStream> {
        let mut items: Vec<CoreResult<String>> = self.chunks.iter().cloned().map(Ok).collect();
        if let Some(reason) = &self.fail_with {
            items.push(Err(BridgeError::UpstreamUnavailable {
                reason: reason.clone(),
            }));
        }
        Ok(Box::pin(futures_util::stream::iter(items)))
    }
}
