use std::time::Duration;

/// Headers whose values never reach a log line.
const SECRET_HEADERS: &[&str] = &["authorization", "x-goog-api-key"];

/// A JSON `POST` ready to hand to [`crate::runtime::execute`].
///
/// Built by the provider modules as plain data so tests can inspect it without
/// any network.
#[derive(Clone, PartialEq, Eq)]
pub struct JsonPost {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
    /// Whole-request deadline, connect included.
    pub timeout: Duration,
}

impl JsonPost {
    pub fn new(url: impl Into<String>, body: impl Into<String>, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            headers: vec![("Content-Type".into(), "application/json".into())],
            body: body.into(),
            timeout,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

impl std::fmt::Debug for JsonPost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let headers: Vec<(&str, &str)> = self
            .headers
            .iter()
            .map(|(k, v)| {
                let secret = SECRET_HEADERS.iter().any(|s| k.eq_ignore_ascii_case(s));
                (k.as_str(), if secret { "[REDACTED]" } else { v.as_str() })
            })
            .collect();

        // The body is a base64 audio file.
        f.debug_struct("JsonPost")
            .field("url", &self.url)
            .field("headers", &headers)
            .field("body_len", &self.body.len())
            .field("timeout", &self.timeout)
            .finish()
    }
}
