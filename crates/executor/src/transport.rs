use std::collections::BTreeMap;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;

use weft_core::{ActionError, CredentialsMode, HttpMethod, PartValue, RequestBody, ResolvedRequest};

/// Raw HTTP response before decoding.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportResponse {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: Bytes,
}

impl TransportResponse {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: BTreeMap::new(),
            body: body.into(),
        }
    }

    /// JSON response with a matching content type.
    pub fn json(status: u16, value: &serde_json::Value) -> Self {
        Self::new(status, value.to_string()).with_header("content-type", "application/json")
    }

    #[must_use]
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.to_owned());
        self
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Sends one resolved HTTP request.
///
/// Implementations report non-2xx statuses as a normal response; only
/// failures to get any response are errors.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: &ResolvedRequest) -> Result<TransportResponse, ActionError>;
}

/// [`HttpTransport`] backed by `reqwest`.
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn build(&self, request: &ResolvedRequest) -> Result<reqwest::RequestBuilder, ActionError> {
        let method = match request.method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post | HttpMethod::Graphql => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Delete => reqwest::Method::DELETE,
            HttpMethod::Websocket => {
                return Err(ActionError::Unsupported(
                    "websocket requests go through the subscription manager".into(),
                ));
            }
        };

        let mut builder = self.client.request(method, &request.url);
        for (name, value) in &request.headers {
            if request.credentials == CredentialsMode::Omit && name.eq_ignore_ascii_case("cookie") {
                continue;
            }
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }

        builder = match &request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(value) => builder.json(value),
            RequestBody::Form(pairs) => builder.form(pairs),
            RequestBody::Raw(text) => builder.body(text.clone()),
            RequestBody::Multipart(parts) => {
                let mut form = reqwest::multipart::Form::new();
                for part in parts {
                    form = match &part.value {
                        PartValue::Text(text) => form.text(part.name.clone(), text.clone()),
                        PartValue::File {
                            filename,
                            content_type,
                            data,
                        } => {
                            let mut file = reqwest::multipart::Part::bytes(data.clone())
                                .file_name(filename.clone());
                            if let Some(ct) = content_type {
                                file = file.mime_str(ct).map_err(|e| {
                                    ActionError::Validation(format!("part '{}': {e}", part.name))
                                })?;
                            }
                            form.part(part.name.clone(), file)
                        }
                    };
                }
                builder.multipart(form)
            }
        };
        Ok(builder)
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: &ResolvedRequest) -> Result<TransportResponse, ActionError> {
        let builder = self.build(request)?;
        let response = builder.send().await.map_err(|e| classify(&e, request))?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_owned(), v.to_owned()))
            })
            .collect();
        let body = response.bytes().await.map_err(|e| classify(&e, request))?;
        debug!(status, url = %request.url, bytes = body.len(), "http response");
        Ok(TransportResponse {
            status,
            headers,
            body,
        })
    }
}

fn classify(err: &reqwest::Error, request: &ResolvedRequest) -> ActionError {
    if err.is_timeout() {
        ActionError::Timeout(request.timeout.unwrap_or_default())
    } else if err.is_builder() {
        ActionError::Validation(err.to_string())
    } else {
        ActionError::Transport(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_json_post() {
        let transport = ReqwestTransport::default();
        let mut request =
            ResolvedRequest::new("ds", HttpMethod::Graphql, "https://api.example.com/graphql")
                .with_body(RequestBody::Json(serde_json::json!({"query": "{ a }"})));
        request.set_header("X-Trace", "1");
        let built = transport.build(&request).unwrap().build().unwrap();
        assert_eq!(built.method(), reqwest::Method::POST);
        assert_eq!(built.headers()["x-trace"], "1");
        assert!(built.body().is_some());
    }

    #[test]
    fn omit_credentials_drops_cookie_header() {
        let transport = ReqwestTransport::default();
        let mut request = ResolvedRequest::new("ds", HttpMethod::Get, "https://api.example.com/a");
        request.set_header("Cookie", "sid=1");
        request.credentials = CredentialsMode::Omit;
        let built = transport.build(&request).unwrap().build().unwrap();
        assert!(built.headers().get("cookie").is_none());
    }

    #[test]
    fn websocket_is_rejected() {
        let transport = ReqwestTransport::default();
        let request = ResolvedRequest::new("ds", HttpMethod::Websocket, "wss://x");
        assert!(matches!(transport.build(&request), Err(ActionError::Unsupported(_))));
    }

    #[test]
    fn response_header_lookup() {
        let resp = TransportResponse::json(200, &serde_json::json!({"a": 1}));
        assert_eq!(resp.header("Content-Type"), Some("application/json"));
    }
}
