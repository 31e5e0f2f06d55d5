use axum::http::{header, request::Parts, HeaderMap};
use std::borrow::Cow;

/// The three request attributes tenant resolution is allowed to read.
pub trait TenantRequest {
    /// Header value by case-insensitive name.
    ///
    /// A present header is always returned; bytes that are not UTF-8 are
    /// replaced so validation rejects the value instead of skipping it.
    fn header(&self, name: &str) -> Option<Cow<'_, str>>;
    /// Host without port
    fn host(&self) -> Option<&str>;
    fn path(&self) -> &str;
}

/// Owned request snapshot, handy outside of a live HTTP stack
#[derive(Debug, Clone, Default)]
pub struct RequestInfo {
    pub headers: Vec<(String, String)>,
    pub host: Option<String>,
    pub path: String,
}

impl RequestInfo {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }
}

impl TenantRequest for RequestInfo {
    fn header(&self, name: &str) -> Option<Cow<'_, str>> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| Cow::Borrowed(value.as_str()))
    }

    fn host(&self) -> Option<&str> {
        self.host.as_deref().map(strip_port)
    }

    fn path(&self) -> &str {
        &self.path
    }
}

impl TenantRequest for Parts {
    fn header(&self, name: &str) -> Option<Cow<'_, str>> {
        self.headers
            .get(name)
            .map(|value| String::from_utf8_lossy(value.as_bytes()))
    }

    fn host(&self) -> Option<&str> {
        // HTTP/2 carries the authority in the URI, HTTP/1.1 in the Host header
        self.uri
            .host()
            .or_else(|| header_str(&self.headers, header::HOST.as_str()))
            .map(strip_port)
    }

    fn path(&self) -> &str {
        self.uri.path()
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

fn strip_port(host: &str) -> &str {
    host.rsplit_once(':')
        .filter(|(_, port)| port.bytes().all(|b| b.is_ascii_digit()))
        .map(|(host, _)| host)
        .unwrap_or(host)
}
