//! HTTP transport abstraction
//!
//! The request pipeline operates on plain request/response values so the
//! whole encryption layer can be exercised against an in-process fake.
//! Production traffic goes through [`ReqwestTransport`].

use async_trait::async_trait;
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::config::TransportConfig;
use crate::error::ClientResult;

/// A single outgoing HTTP exchange as seen by the pipeline
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    /// Path relative to the configured base URL, e.g. `/manage/user/list`
    pub path: String,
    pub headers: Vec<(String, String)>,
    /// JSON body, if any
    pub body: Option<Value>,
}

impl HttpRequest {
    /// Build a request with no headers or body
    pub fn new(method: Method, path: &str) -> Self {
        Self {
            method,
            path: path.to_string(),
            headers: Vec::new(),
            body: None,
        }
    }

    /// A GET request
    pub fn get(path: &str) -> Self {
        Self::new(Method::GET, path)
    }

    /// A POST request
    pub fn post(path: &str) -> Self {
        Self::new(Method::POST, path)
    }

    /// Attach a header
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// Attach a JSON body
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Look up a header value by name
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// The response to an [`HttpRequest`]
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    /// Parsed JSON body; `None` when the body was empty or not JSON
    pub body: Option<Value>,
}

impl HttpResponse {
    /// A 200 response with a JSON body
    pub fn ok(body: Value) -> Self {
        Self {
            status: 200,
            body: Some(body),
        }
    }

    /// Whether the status is in the 2xx range
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Deserialize the body into a typed value
    pub fn parse_body<T: DeserializeOwned>(&self) -> ClientResult<T> {
        let body = self.body.clone().unwrap_or(Value::Null);
        Ok(serde_json::from_value(body)?)
    }
}

/// An HTTP transport able to carry JSON bodies and custom headers
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send the request and return the response, whatever its status.
    /// Only connection-level failures surface as errors.
    async fn execute(&self, request: HttpRequest) -> ClientResult<HttpResponse>;
}

/// Production transport over a `reqwest` client
pub struct ReqwestTransport {
    client: Client,
    base_url: String,
}

impl ReqwestTransport {
    /// Build a transport for the configured base URL and timeout
    pub fn new(config: &TransportConfig) -> ClientResult<Self> {
        let client = Client::builder().timeout(config.request_timeout).build()?;

        Ok(Self {
            client,
            base_url: config.base_url.as_str().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn execute(&self, request: HttpRequest) -> ClientResult<HttpResponse> {
        let mut builder = self
            .client
            .request(request.method.clone(), self.url(&request.path));

        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }

        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let text = response.text().await?;
        let body = if text.is_empty() {
            None
        } else {
            serde_json::from_str(&text).ok()
        };

        Ok(HttpResponse { status, body })
    }
}
