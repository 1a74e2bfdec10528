//! Push connection to the response server

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use reqwest::Client;
use reqwest::header::ACCEPT;
use serde::Deserialize;

use super::sse::SseParser;
use crate::error::TransportError;
use crate::{Error, Result};

/// Event payloads from one open push connection
pub type EventStream = BoxStream<'static, std::result::Result<String, TransportError>>;

/// Opens a push connection for a query
#[async_trait]
pub trait PushTransport: Send + Sync {
    /// Submit `query` and return its stream of event payloads
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] if the connection cannot be established
    async fn open(&self, query: &str) -> std::result::Result<EventStream, TransportError>;
}

/// Server-Sent Events over HTTP
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    url: String,
}

impl HttpTransport {
    /// Create a transport for `url`, the full query endpoint
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built
    pub fn new(url: impl Into<String>, connect_timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .user_agent(concat!("voxline/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(Error::Http)?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }

    /// Query endpoint URL
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl PushTransport for HttpTransport {
    async fn open(&self, query: &str) -> std::result::Result<EventStream, TransportError> {
        tracing::debug!(url = %self.url, "opening push connection");

        let response = self
            .client
            .get(&self.url)
            .query(&[("input", query)])
            .header(ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                status: status.as_u16(),
                message: error_message(&body, status.canonical_reason()),
            });
        }

        let events = response
            .bytes_stream()
            .scan(SseParser::new(), |parser, chunk| {
                let items: Vec<_> = match chunk {
                    Ok(bytes) => {
                        parser.push(&bytes);
                        parser.drain().into_iter().map(Ok).collect()
                    }
                    Err(e) => vec![Err(TransportError::Stream(e.to_string()))],
                };
                futures::future::ready(Some(stream::iter(items)))
            })
            .flatten();

        Ok(events.boxed())
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

/// Pull a readable message out of an error response body
fn error_message(body: &str, reason: Option<&str>) -> String {
    if let Ok(parsed) = serde_json::from_str::<ErrorBody>(body) {
        return parsed.error;
    }

    let body = body.trim();
    if body.is_empty() {
        return reason.unwrap_or("no response body").to_string();
    }
    body.chars().take(200).collect()
}
