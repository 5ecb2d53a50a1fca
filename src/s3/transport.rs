//! HTTP executor seam
//!
//! The engine never talks to a socket directly: it hands a [`SignedRequest`]
//! to an [`HttpExecutor`] and gets back status, headers and body. The default
//! executor is a hyper client tuned for S3 workloads; tests plug in scripted
//! executors.

use crate::s3::error::{Result, S3Error};
use crate::s3::signer::SignedRequest;
use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::header::HeaderMap;
use hyper::{Method, Request, StatusCode};
use hyper_tls::HttpsConnector;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client as HyperClient;
use hyper_util::rt::TokioExecutor;
use native_tls::TlsConnector;
use std::collections::BTreeMap;
use std::time::Duration;

/// How the payload hash enters the signature
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadSigning {
    /// SHA-256 of the body (small XML bodies, empty bodies)
    Signed,
    /// `UNSIGNED-PAYLOAD`; integrity comes from Content-MD5 instead
    Unsigned,
}

/// Outbound request before signing.
///
/// `path` is already URI-encoded (`/{bucket}/{encoded key}`); query pairs are
/// kept decoded and encoded once, canonically, by the signer.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    /// Lowercase header names
    pub headers: BTreeMap<String, String>,
    pub body: Bytes,
    pub payload: PayloadSigning,
}

impl HttpRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            headers: BTreeMap::new(),
            body: Bytes::new(),
            payload: PayloadSigning::Signed,
        }
    }

    /// Add a query parameter; an empty value renders as `name=`
    pub fn query(mut self, name: &str, value: impl Into<String>) -> Self {
        self.query.push((name.to_string(), value.into()));
        self
    }

    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn body(mut self, body: Bytes) -> Self {
        self.headers
            .insert("content-length".to_string(), body.len().to_string());
        self.body = body;
        self
    }

    pub fn unsigned_payload(mut self) -> Self {
        self.payload = PayloadSigning::Unsigned;
        self
    }

    /// Value of a query parameter, if present
    pub fn query_value(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Response as seen by the engine
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    /// Header value as a string, if present and valid UTF-8
    pub fn header_str(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// Sends signed requests. Implementations own connection handling and TLS.
#[async_trait]
pub trait HttpExecutor: Send + Sync {
    async fn execute(&self, request: SignedRequest) -> Result<HttpResponse>;
}

/// Hyper-backed executor
///
/// - HTTP/1.1 only
/// - Tuned connection pool (1024 idle per host, 90s idle timeout)
/// - TCP_NODELAY and 90s keepalive
/// - native-tls for https endpoints
#[derive(Clone)]
pub struct HyperExecutor {
    client: HyperClient<HttpsConnector<HttpConnector>, Full<Bytes>>,
    /// `scheme://host[:port]`, no trailing slash
    endpoint: String,
    timeout: Duration,
}

impl HyperExecutor {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self> {
        let mut http = HttpConnector::new();
        http.set_nodelay(true);
        http.enforce_http(false);
        http.set_connect_timeout(Some(Duration::from_secs(10)));
        http.set_keepalive(Some(Duration::from_secs(90)));

        let tls = TlsConnector::new()
            .map_err(|e| S3Error::Transport(format!("failed to build TLS connector: {}", e)))?;
        let https = HttpsConnector::from((http, tls.into()));

        let client = HyperClient::builder(TokioExecutor::new())
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(1024)
            .set_host(false)
            .build(https);

        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            timeout,
        })
    }

    async fn send(&self, request: SignedRequest) -> Result<HttpResponse> {
        let url = format!("{}{}", self.endpoint, request.path_and_query());
        let SignedRequest { request, .. } = request;

        let mut req = Request::builder().method(request.method).uri(&url);
        for (key, value) in request.headers.iter() {
            req = req.header(key, value);
        }
        let request = req.body(Full::new(request.body))?;

        let response = self.client.request(request).await?;
        let status = response.status();
        let headers = response.headers().clone();
        // Always drain body to return connection to pool
        let body = response.collect().await?.to_bytes();

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

#[async_trait]
impl HttpExecutor for HyperExecutor {
    async fn execute(&self, request: SignedRequest) -> Result<HttpResponse> {
        match tokio::time::timeout(self.timeout, self.send(request)).await {
            Ok(result) => result,
            Err(_) => Err(S3Error::Transport(format!(
                "request timed out after {:?}",
                self.timeout
            ))),
        }
    }
}
