//! Origin client

use async_trait::async_trait;
use bytes::Bytes;
use http::header::{self, HeaderMap, HeaderName};
use http::{Method, Response};
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

use crate::error::ProxyError;

/// Headers that describe a single connection and must not be forwarded
const HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
    header::HOST,
];

/// A request to send to the network
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl FetchRequest {
    /// A bodiless GET with no extra headers
    pub fn get(url: Url) -> Self {
        Self {
            method: Method::GET,
            url,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }
}

/// The network as seen by the cache
///
/// `Ok` carries whatever the origin answered, including error statuses; `Err`
/// means no response was obtained at all.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: &FetchRequest) -> Result<Response<Bytes>, ProxyError>;
}

/// Origin client configuration
#[derive(Clone, Debug, Default)]
pub struct OriginClientConfig {
    /// Overall request timeout; `None` leaves it to the transport
    pub timeout: Option<Duration>,
    /// Skip TLS certificate verification
    pub skip_tls_verify: bool,
    /// User agent sent when the caller did not provide one
    pub user_agent: Option<String>,
}

/// HTTP client for the origin server
pub struct OriginClient {
    client: Client,
}

impl OriginClient {
    /// Create a new origin client
    pub fn new(config: OriginClientConfig) -> Result<Self, ProxyError> {
        let mut builder = Client::builder();

        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        if config.skip_tls_verify {
            builder = builder.danger_accept_invalid_certs(true);
        }
        if let Some(ref user_agent) = config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build()?;

        info!(
            "Created origin client (timeout: {:?}, skip_tls_verify: {})",
            config.timeout, config.skip_tls_verify
        );

        Ok(Self { client })
    }
}

#[async_trait]
impl Fetcher for OriginClient {
    async fn fetch(&self, request: &FetchRequest) -> Result<Response<Bytes>, ProxyError> {
        debug!("Fetching {} {}", request.method, request.url);

        let mut headers = request.headers.clone();
        strip_hop_by_hop(&mut headers);
        headers.remove(header::CONTENT_LENGTH);

        let mut builder = self
            .client
            .request(request.method.clone(), request.url.clone())
            .headers(headers);
        if !request.body.is_empty() {
            builder = builder.body(request.body.clone());
        }

        let response = builder.send().await.map_err(|e| classify_error(e, &request.url))?;

        let status = response.status();
        let mut headers = response.headers().clone();
        strip_hop_by_hop(&mut headers);
        // The body is fully buffered; the server recomputes the length
        headers.remove(header::CONTENT_LENGTH);

        let body = response
            .bytes()
            .await
            .map_err(|e| classify_error(e, &request.url))?;

        debug!("Origin answered {} for {} ({} bytes)", status, request.url, body.len());

        let mut out = Response::new(body);
        *out.status_mut() = status;
        *out.headers_mut() = headers;
        Ok(out)
    }
}

fn classify_error(error: reqwest::Error, url: &Url) -> ProxyError {
    if error.is_timeout() {
        ProxyError::Timeout(url.to_string())
    } else if error.is_connect() {
        ProxyError::Unreachable(format!("{}: {}", url, error))
    } else if error.is_builder() {
        ProxyError::InvalidRequest(error.to_string())
    } else {
        ProxyError::Http(error)
    }
}

/// Remove connection-scoped headers, including any named by `Connection`
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let named: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in named {
        headers.remove(name);
    }
    for name in HOP_BY_HOP.iter() {
        headers.remove(name);
    }
    headers.remove("keep-alive");
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[test]
    fn test_strip_hop_by_hop() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive, x-trace"));
        headers.insert("keep-alive", HeaderValue::from_static("timeout=5"));
        headers.insert("x-trace", HeaderValue::from_static("1"));
        headers.insert(header::HOST, HeaderValue::from_static("localhost"));
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/html"));
        headers.insert("x-prefetch", HeaderValue::from_static("true"));

        strip_hop_by_hop(&mut headers);

        assert_eq!(headers.len(), 2);
        assert!(headers.contains_key(header::CONTENT_TYPE));
        assert!(headers.contains_key("x-prefetch"));
    }

    #[tokio::test]
    async fn test_fetch_returns_origin_response() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let _ = socket.read(&mut buf).await;
            socket
                .write_all(
                    b"HTTP/1.1 200 OK\r\ncontent-type: text/css\r\ncontent-length: 6\r\nconnection: close\r\n\r\nbody{}",
                )
                .await
                .unwrap();
        });

        let client = OriginClient::new(OriginClientConfig::default()).unwrap();
        let url = Url::parse(&format!("http://{}/src/output.css", addr)).unwrap();
        let response = client.fetch(&FetchRequest::get(url)).await.unwrap();

        assert_eq!(response.status(), 200);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/css");
        assert!(!response.headers().contains_key(header::CONNECTION));
        assert_eq!(response.body(), &Bytes::from_static(b"body{}"));
    }

    #[tokio::test]
    async fn test_fetch_unreachable_origin_fails() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = OriginClient::new(OriginClientConfig {
            timeout: Some(Duration::from_secs(5)),
            ..Default::default()
        })
        .unwrap();
        let url = Url::parse(&format!("http://{}/", addr)).unwrap();

        assert!(client.fetch(&FetchRequest::get(url)).await.is_err());
    }
}
