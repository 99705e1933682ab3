#![forbid(unsafe_code)]

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

pub const TETHER_USER_AGENT: &str = concat!("tether-sidecar/", env!("CARGO_PKG_VERSION"));

const MAX_ERROR_DETAIL_LEN: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
        }
    }
}

/// One outbound call. POST bodies are always form-encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub form: Vec<(String, String)>,
    pub timeout: Duration,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            method: HttpMethod::Get,
            url: url.into(),
            headers: Vec::new(),
            form: Vec::new(),
            timeout,
        }
    }

    pub fn post_form(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            method: HttpMethod::Post,
            url: url.into(),
            headers: Vec::new(),
            form: Vec::new(),
            timeout,
        }
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn form_fields(mut self, fields: &[(&str, &str)]) -> Self {
        self.form.extend(
            fields
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string())),
        );
        self
    }

    pub fn form_value(&self, name: &str) -> Option<&str> {
        self.form
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Any HTTP status with its body. Status interpretation is left to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn is_ok(&self) -> bool {
        self.status == 200
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    Timeout,
    Dns,
    Tls,
    Connection,
    InvalidUrl,
    Transport,
}

impl TransportErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TransportErrorKind::Timeout => "timeout",
            TransportErrorKind::Dns => "dns",
            TransportErrorKind::Tls => "tls",
            TransportErrorKind::Connection => "connection",
            TransportErrorKind::InvalidUrl => "invalid_url",
            TransportErrorKind::Transport => "transport",
        }
    }
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HttpError {
    #[error("{kind} error: {detail}")]
    Transport {
        kind: TransportErrorKind,
        detail: String,
    },
}

impl HttpError {
    pub fn transport(kind: TransportErrorKind, detail: impl Into<String>) -> Self {
        let detail = detail.into();
        let detail = if detail.len() > MAX_ERROR_DETAIL_LEN {
            detail.chars().take(MAX_ERROR_DETAIL_LEN).collect()
        } else {
            detail
        };
        HttpError::Transport { kind, detail }
    }

    pub fn kind(&self) -> TransportErrorKind {
        match self {
            HttpError::Transport { kind, .. } => *kind,
        }
    }
}

/// Network boundary. Implementations block until a response, an error, or the request timeout.
pub trait HttpClient {
    fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, HttpError>;
}

impl<T: HttpClient + ?Sized> HttpClient for &T {
    fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, HttpError> {
        (**self).execute(request)
    }
}

impl<T: HttpClient + ?Sized> HttpClient for Arc<T> {
    fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, HttpError> {
        (**self).execute(request)
    }
}

#[derive(Debug, Clone)]
pub struct UreqHttpClient {
    user_agent: String,
    proxy_from_env: bool,
}

impl Default for UreqHttpClient {
    fn default() -> Self {
        Self::new(TETHER_USER_AGENT)
    }
}

impl UreqHttpClient {
    pub fn new(user_agent: &str) -> Self {
        Self {
            user_agent: user_agent.to_string(),
            proxy_from_env: true,
        }
    }

    pub fn without_env_proxy(mut self) -> Self {
        self.proxy_from_env = false;
        self
    }

    fn build_agent(&self, timeout: Duration) -> ureq::Agent {
        let timeout = timeout.max(Duration::from_millis(100));
        ureq::AgentBuilder::new()
            .timeout_connect(timeout)
            .timeout_read(timeout)
            .timeout_write(timeout)
            .user_agent(&self.user_agent)
            .try_proxy_from_env(self.proxy_from_env)
            .build()
    }
}

impl HttpClient for UreqHttpClient {
    fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, HttpError> {
        let agent = self.build_agent(request.timeout);
        let mut req = match request.method {
            HttpMethod::Get => agent.get(&request.url),
            HttpMethod::Post => agent.post(&request.url),
        };
        for (name, value) in &request.headers {
            req = req.set(name, value);
        }
        let result = match request.method {
            HttpMethod::Get => req.call(),
            HttpMethod::Post => {
                let form: Vec<(&str, &str)> = request
                    .form
                    .iter()
                    .map(|(k, v)| (k.as_str(), v.as_str()))
                    .collect();
                req.send_form(&form)
            }
        };
        let response = match result {
            Ok(resp) => resp,
            Err(ureq::Error::Status(_, resp)) => resp,
            Err(ureq::Error::Transport(transport)) => {
                return Err(http_error_from_transport(transport))
            }
        };
        let status = response.status();
        let body = response.into_string().map_err(|err| {
            HttpError::transport(
                classify_transport_error_kind(&err.to_string()),
                format!("response body read failed: {err}"),
            )
        })?;
        tracing::debug!(
            method = request.method.as_str(),
            url = %request.url,
            status,
            "outbound request completed"
        );
        Ok(HttpResponse { status, body })
    }
}

fn http_error_from_transport(transport: ureq::Transport) -> HttpError {
    let kind = match transport.kind() {
        ureq::ErrorKind::Dns => TransportErrorKind::Dns,
        ureq::ErrorKind::ConnectionFailed => TransportErrorKind::Connection,
        ureq::ErrorKind::InvalidUrl | ureq::ErrorKind::UnknownScheme => {
            TransportErrorKind::InvalidUrl
        }
        _ => classify_transport_error_kind(&format!("{:?} {}", transport.kind(), transport)),
    };
    HttpError::transport(kind, transport.to_string())
}

fn classify_transport_error_kind(raw: &str) -> TransportErrorKind {
    let lower = raw.to_ascii_lowercase();
    if lower.contains("timeout") || lower.contains("timed out") {
        TransportErrorKind::Timeout
    } else if lower.contains("tls") || lower.contains("ssl") || lower.contains("certificate") {
        TransportErrorKind::Tls
    } else if lower.contains("dns") {
        TransportErrorKind::Dns
    } else if lower.contains("connection") || lower.contains("connect") {
        TransportErrorKind::Connection
    } else {
        TransportErrorKind::Transport
    }
}
