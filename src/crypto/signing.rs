//! Canonical signing payload construction.
//!
//! The signed message is the five request fields joined by `\n`:
//! ```text
//! POST
//! /api/users
//! {"name":"John"}
//! 1704067200
//! n0nceN0nceN0nceN0nceN0nceN0nce12
//! ```
//! The method is upper-cased and the path normalized; body, timestamp and
//! nonce are used exactly as transmitted. No trailing newline.

use crate::ApiwardenError;

/// The exact fields a client signed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignaturePayload {
    method: String,
    path: String,
    body: Vec<u8>,
    timestamp: String,
    nonce: String,
}

impl SignaturePayload {
    /// Build a payload, normalizing method and path.
    ///
    /// # Errors
    /// * `InvalidPayload` - method, path, timestamp or nonce is empty
    pub fn new(
        method: &str,
        path: &str,
        body: &[u8],
        timestamp: &str,
        nonce: &str,
    ) -> Result<Self, ApiwardenError> {
        for (name, value) in [
            ("method", method),
            ("path", path),
            ("timestamp", timestamp),
            ("nonce", nonce),
        ] {
            if value.is_empty() {
                return Err(ApiwardenError::InvalidPayload(format!("{} is empty", name)));
            }
        }

        Ok(Self {
            method: method.to_ascii_uppercase(),
            path: normalize_path(path),
            body: body.to_vec(),
            timestamp: timestamp.to_string(),
            nonce: nonce.to_string(),
        })
    }

    /// Upper-cased HTTP method.
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Normalized request path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Raw request body.
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Timestamp as transmitted.
    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    /// Nonce as transmitted.
    pub fn nonce(&self) -> &str {
        &self.nonce
    }

    /// The canonical byte sequence that is signed.
    ///
    /// Bytes rather than `String` because request bodies need not be UTF-8.
    pub fn canonicalize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(
            self.method.len()
                + self.path.len()
                + self.body.len()
                + self.timestamp.len()
                + self.nonce.len()
                + 4,
        );
        out.extend_from_slice(self.method.as_bytes());
        out.push(b'\n');
        out.extend_from_slice(self.path.as_bytes());
        out.push(b'\n');
        out.extend_from_slice(&self.body);
        out.push(b'\n');
        out.extend_from_slice(self.timestamp.as_bytes());
        out.push(b'\n');
        out.extend_from_slice(self.nonce.as_bytes());
        out
    }
}

/// Normalize a request path.
///
/// Repeated slashes collapse, the trailing slash is dropped, a leading slash
/// is ensured, and the root (or an all-slash path) becomes `/`.
pub fn normalize_path(path: &str) -> String {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if segments.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", segments.join("/"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_format() {
        let payload = SignaturePayload::new(
            "post",
            "/api/users",
            br#"{"name":"John"}"#,
            "1704067200",
            "n0nceN0nceN0nceN0nceN0nceN0nce12",
        )
        .unwrap();

        assert_eq!(
            payload.canonicalize(),
            b"POST\n/api/users\n{\"name\":\"John\"}\n1704067200\nn0nceN0nceN0nceN0nceN0nceN0nce12"
                .to_vec()
        );
    }

    #[test]
    fn test_empty_body_allowed() {
        let payload = SignaturePayload::new("GET", "/health", b"", "1", "abc").unwrap();
        assert_eq!(payload.canonicalize(), b"GET\n/health\n\n1\nabc".to_vec());
    }

    #[test]
    fn test_empty_fields_rejected() {
        assert!(matches!(
            SignaturePayload::new("", "/a", b"", "1", "n"),
            Err(ApiwardenError::InvalidPayload(_))
        ));
        assert!(SignaturePayload::new("GET", "", b"", "1", "n").is_err());
        assert!(SignaturePayload::new("GET", "/a", b"", "", "n").is_err());
        assert!(SignaturePayload::new("GET", "/a", b"", "1", "").is_err());
    }

    #[test]
    fn test_bodies_produce_distinct_canonical_forms() {
        let a = SignaturePayload::new("POST", "/a", b"x", "1", "n").unwrap();
        let b = SignaturePayload::new("POST", "/a", b"y", "1", "n").unwrap();
        assert_ne!(a.canonicalize(), b.canonicalize());
    }

    #[test]
    fn test_normalize_path_cases() {
        assert_eq!(normalize_path("//a//b/"), "/a/b");
        assert_eq!(normalize_path("/"), "/");
        assert_eq!(normalize_path("///"), "/");
        assert_eq!(normalize_path("/api/users/"), "/api/users");
        assert_eq!(normalize_path("api/users"), "/api/users");
    }

    #[test]
    fn test_normalize_path_idempotent() {
        for path in ["//a//b/", "/", "", "a", "/x/y/z//", "////q", "/a b/c%20d/"] {
            let once = normalize_path(path);
            assert_eq!(normalize_path(&once), once, "path {:?}", path);
        }
    }

    #[test]
    fn test_method_uppercased() {
        let payload = SignaturePayload::new("patch", "/a", b"", "1", "n").unwrap();
        assert_eq!(payload.method(), "PATCH");
    }
}
