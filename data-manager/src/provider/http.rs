//! Public REST client shared by the exchange connectors
//!
//! - Request pacing via a `governor` token bucket (requests per minute)
//! - Per-request timeout
//! - Mapping of transport failures, HTTP status and error bodies into
//!   `ProviderError`

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use governor::{
    clock::DefaultClock,
    middleware::NoOpMiddleware,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use reqwest::{header, Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

use super::{ProviderError, ProviderResult};
use crate::config::HttpSettings;
use trading_common::error::NetworkError;

type Limiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock, NoOpMiddleware>;

/// Error body shapes: Binance `{code, msg}`, Coinbase `{message}`
#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: Option<i64>,
    #[serde(default, alias = "message")]
    msg: Option<String>,
}

pub struct RestClient {
    client: Client,
    base_url: String,
    timeout: Duration,
    limiter: Option<Arc<Limiter>>,
}

impl RestClient {
    pub fn new(settings: &HttpSettings) -> ProviderResult<Self> {
        let mut headers = header::HeaderMap::new();
        headers.insert(header::ACCEPT, header::HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .timeout(settings.request_timeout())
            .default_headers(headers)
            // Coinbase rejects requests without a user agent
            .user_agent(concat!("data-manager/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| {
                trading_common::error::ConfigurationError::Invalid(format!(
                    "failed to create HTTP client: {}",
                    e
                ))
            })?;

        let limiter = NonZeroU32::new(settings.requests_per_minute)
            .map(|rate| Arc::new(RateLimiter::direct(Quota::per_minute(rate))));

        Ok(Self {
            client,
            base_url: settings.rest_url.trim_end_matches('/').to_string(),
            timeout: settings.request_timeout(),
            limiter,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// GET `path` with query `params` and decode the JSON body.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> ProviderResult<T> {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }

        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, ?params, "GET");

        let response = self
            .client
            .get(&url)
            .query(params)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        self.handle_response(response).await
    }

    fn transport_error(&self, err: reqwest::Error) -> ProviderError {
        let network = if err.is_timeout() {
            NetworkError::Timeout(self.timeout)
        } else if err.is_connect() {
            NetworkError::Connection(err.to_string())
        } else {
            NetworkError::Request(err.to_string())
        };
        ProviderError::Network(network)
    }

    async fn handle_response<T: DeserializeOwned>(&self, response: Response) -> ProviderResult<T> {
        let status = response.status();

        // 418 is Binance's escalation after ignored 429s
        if status == StatusCode::TOO_MANY_REQUESTS || status.as_u16() == 418 {
            let retry_after = response
                .headers()
                .get(header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(ProviderError::RateLimited { retry_after });
        }

        let body = response
            .text()
            .await
            .map_err(|e| ProviderError::Network(NetworkError::Receive(e.to_string())))?;

        if !status.is_success() {
            let message = match serde_json::from_str::<ErrorBody>(&body) {
                Ok(ErrorBody {
                    code: Some(code),
                    msg: Some(msg),
                }) => format!("{} (code {})", msg, code),
                Ok(ErrorBody { msg: Some(msg), .. }) => msg,
                _ => truncate(&body),
            };
            return Err(ProviderError::Exchange {
                status: Some(status.as_u16()),
                message,
            });
        }

        serde_json::from_str(&body).map_err(|e| {
            ProviderError::Parse(format!("{} - body: {}", e, truncate(&body)))
        })
    }
}

fn truncate(body: &str) -> String {
    const MAX: usize = 256;
    match body.char_indices().nth(MAX) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}

#[cfg(test)]
pub(crate) mod test_server {
    //! Minimal HTTP responder for connector tests.

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    /// Serve `responses` in order, one per connection. Returns the base URL
    /// and a receiver yielding each request line (`GET /path?query HTTP/1.1`).
    pub async fn serve(
        responses: Vec<(u16, &'static str, String)>,
    ) -> (String, mpsc::UnboundedReceiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            for (status, extra_headers, body) in responses {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                let mut buf = vec![0u8; 8192];
                let n = socket.read(&mut buf).await.unwrap_or(0);
                let head = String::from_utf8_lossy(&buf[..n]);
                let _ = tx.send(head.lines().next().unwrap_or_default().to_string());

                let reply = format!(
                    "HTTP/1.1 {} X\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n{}\r\n{}",
                    status,
                    body.len(),
                    extra_headers,
                    body
                );
                let _ = socket.write_all(reply.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });

        (format!("http://{}", addr), rx)
    }
}
