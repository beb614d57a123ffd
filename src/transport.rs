use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use reqwest::header::{HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
pub use reqwest::Method;
use serde_json::Value;

use crate::error::Error;
use crate::result::Result;

pub static DEFAULT_BASE_URL: &str = "https://prod.vdoo.io";
pub static DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

pub type TransportFuture<'a> =
    Pin<Box<dyn Future<Output = std::result::Result<Value, TransportError>> + Send + 'a>>;

/// A failed request/response exchange, classified by where it failed.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("calling url {url} returned {}", describe_status(.status, .body))]
    Status {
        url: String,
        status: u16,
        body: Option<Value>,
    },

    #[error("calling url {url} failed: {message}")]
    Network { url: String, message: String },

    #[error("calling url {url} returned an invalid response: {message}")]
    InvalidResponse { url: String, message: String },
}

fn describe_status(status: &u16, body: &Option<Value>) -> String {
    match body {
        Some(body) => format!("an error: {}", body),
        None => format!("an error status code: {}", status),
    }
}

impl TransportError {
    pub fn status(&self) -> Option<u16> {
        match self {
            TransportError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// The `details` message of a JSON error body, if the service sent one.
    pub fn details(&self) -> Option<&str> {
        match self {
            TransportError::Status {
                body: Some(body), ..
            } => body.get("details").and_then(Value::as_str),
            _ => None,
        }
    }

    pub fn is_client_error(&self) -> bool {
        matches!(self.status(), Some(status) if (400..500).contains(&status))
    }
}

/// One request to the service or to a pre-signed storage URL.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub method: Method,
    /// Either a path relative to the base URL or an absolute `http(s)` URL.
    pub url: String,
    pub body: Option<Vec<u8>>,
    pub authenticated: bool,
    pub expect_json: bool,
    pub content_md5: Option<String>,
}

impl Request {
    /// An authenticated JSON API call.
    pub fn api(method: Method, path: impl Into<String>) -> Self {
        Request {
            method,
            url: path.into(),
            body: None,
            authenticated: true,
            expect_json: true,
            content_md5: None,
        }
    }

    pub fn with_json(mut self, body: &Value) -> Self {
        self.body = Some(body.to_string().into_bytes());
        self
    }

    /// A raw-bytes request against a pre-signed URL; no token is attached.
    pub fn presigned(method: Method, url: impl Into<String>, body: Vec<u8>) -> Self {
        Request {
            method,
            url: url.into(),
            body: Some(body),
            authenticated: false,
            expect_json: false,
            content_md5: None,
        }
    }

    pub fn with_content_md5(mut self, digest: Option<String>) -> Self {
        self.content_md5 = digest;
        self
    }
}

/// Performs a single request/response exchange.
///
/// Successful responses are returned as parsed JSON (`Value::Null` for an
/// empty body or when the request does not expect JSON).
pub trait Transport: Send + Sync {
    fn call(&self, request: Request) -> TransportFuture<'_>;
}

#[derive(Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub token: String,
    pub connect_timeout: Duration,
}

impl ClientConfig {
    pub fn new(base_url: &str, token: &str) -> Self {
        ClientConfig {
            base_url: normalize_base_url(base_url),
            token: token.to_owned(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("base_url", &self.base_url)
            .field("token", &"<redacted>")
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

/// Empty means the default service; a trailing slash is dropped.
pub fn normalize_base_url(base_url: &str) -> String {
    let base_url = base_url.trim();
    if base_url.is_empty() {
        return DEFAULT_BASE_URL.to_owned();
    }
    base_url.trim_end_matches('/').to_owned()
}

pub struct HttpTransport {
    http: reqwest::Client,
    base_url: String,
    authorization: HeaderValue,
}

impl HttpTransport {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        if config.token.is_empty() {
            return Err(Error::Config("token is empty".to_owned()));
        }

        let mut authorization = HeaderValue::from_str(&format!("Token {}", config.token))
            .map_err(|_| Error::Config("token contains invalid characters".to_owned()))?;
        authorization.set_sensitive(true);

        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|err| Error::Config(format!("error building http client: {}", err)))?;

        Ok(HttpTransport {
            http,
            base_url: normalize_base_url(&config.base_url),
            authorization,
        })
    }

    fn resolve(&self, url: &str) -> String {
        if url.starts_with("http") {
            url.to_owned()
        } else {
            format!("{}{}", self.base_url, url)
        }
    }

    async fn send(&self, request: Request) -> std::result::Result<Value, TransportError> {
        let url = self.resolve(&request.url);
        let mut builder = self.http.request(request.method, url.as_str());

        if request.authenticated {
            builder = builder
                .header(AUTHORIZATION, self.authorization.clone())
                .header(ACCEPT, "application/json");
        }
        if let Some(digest) = request.content_md5 {
            builder = builder.header("Content-MD5", digest);
        }
        if let Some(body) = request.body {
            if request.authenticated {
                builder = builder.header(CONTENT_TYPE, "application/json");
            }
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(|err| TransportError::Network {
            url: url.clone(),
            message: err.to_string(),
        })?;
        let status = response.status();
        let bytes = response.bytes().await.map_err(|err| TransportError::Network {
            url: url.clone(),
            message: err.to_string(),
        })?;

        if !status.is_success() {
            return Err(TransportError::Status {
                url,
                status: status.as_u16(),
                body: serde_json::from_slice(&bytes).ok(),
            });
        }

        if !request.expect_json || bytes.is_empty() {
            return Ok(Value::Null);
        }

        serde_json::from_slice(&bytes).map_err(|err| TransportError::InvalidResponse {
            url,
            message: err.to_string(),
        })
    }
}

impl Transport for HttpTransport {
    fn call(&self, request: Request) -> TransportFuture<'_> {
        Box::pin(self.send(request))
    }
}
