//! Inbound request representation.

use std::collections::HashMap;

/// The parts of an HTTP request the verifier reads.
///
/// Header names are matched case-insensitively.
#[derive(Debug, Clone, Default)]
pub struct InboundRequest {
    method: String,
    path: String,
    body: Vec<u8>,
    headers: HashMap<String, String>,
    ip: String,
    user_agent: Option<String>,
}

impl InboundRequest {
    /// Create a request. Any query string on `target` is dropped.
    pub fn new(method: &str, target: &str) -> Self {
        let path = target.split_once('?').map_or(target, |(path, _)| path);
        Self {
            method: method.to_string(),
            path: path.to_string(),
            ..Default::default()
        }
    }

    /// Set a header.
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    /// Set the raw body.
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Set the source IP.
    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip = ip.into();
        self
    }

    /// Set the user agent.
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// HTTP method as received.
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Request path without query string.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Raw body.
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Source IP.
    pub fn ip(&self) -> &str {
        &self.ip
    }

    /// User agent, if sent.
    pub fn user_agent(&self) -> Option<&str> {
        self.user_agent.as_deref()
    }

    /// Header value by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Header value, treating empty as absent.
    pub fn non_empty_header(&self, name: &str) -> Option<&str> {
        self.header(name).filter(|v| !v.is_empty())
    }
}
