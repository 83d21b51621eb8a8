//! Response heads and the messages that travel down the outbound path.

use crate::http::types::{self, header, Headers, StatusCode, Version};
use bytes::Bytes;

/// Status line and headers of a response, before any framing is applied.
///
/// Heads are built by the dispatcher and normalized by the outbound
/// hygiene stage (version, framing and keep-alive headers) before the
/// encoder serializes them.
///
/// # Examples
/// ```
/// use chunkpause::{ResponseHead, StatusCode};
///
/// let head = ResponseHead::new(StatusCode::Ok)
///     .header("content-type", "text/html")
///     .content_length(42);
///
/// assert_eq!(head.get_content_length(), Some(42));
/// assert!(!head.is_chunked());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseHead {
    version: Version,
    status: StatusCode,
    headers: Headers,
}

impl ResponseHead {
    /// A head for `status`, `HTTP/1.1`, no headers.
    pub fn new(status: StatusCode) -> Self {
        Self {
            version: Version::Http11,
            status,
            headers: Headers::with_capacity(4),
        }
    }

    /// Sets `name` to `value`, replacing earlier values.
    pub fn header<V: Into<String>>(mut self, name: &str, value: V) -> Self {
        self.headers.set(name, value);
        self
    }

    /// Declares a `Content-Length` framed body.
    pub fn content_length(mut self, len: usize) -> Self {
        self.headers.set(header::CONTENT_LENGTH, len.to_string());
        self
    }

    /// Response status.
    #[inline(always)]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// Protocol version written on the status line.
    #[inline(always)]
    pub const fn version(&self) -> Version {
        self.version
    }

    /// Overrides the status-line version.
    #[inline(always)]
    pub fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    /// Headers in write order.
    #[inline(always)]
    pub const fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Mutable access to the headers.
    #[inline(always)]
    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    /// Declared `Content-Length`, if present and well formed.
    pub fn get_content_length(&self) -> Option<usize> {
        self.headers
            .get(header::CONTENT_LENGTH)
            .and_then(|v| types::slice_to_usize(v.trim().as_bytes()))
    }

    /// Whether `Transfer-Encoding` lists `chunked`.
    #[inline]
    pub fn is_chunked(&self) -> bool {
        self.headers
            .contains_token(header::TRANSFER_ENCODING, header::CHUNKED)
    }

    /// Marks the connection persistent or not for this head's version:
    /// HTTP/1.1 drops `Connection` on keep-alive and says `close` otherwise,
    /// HTTP/1.0 says `keep-alive` on keep-alive and drops `Connection`
    /// otherwise.
    pub fn set_keep_alive(&mut self, keep_alive: bool) {
        match (self.version, keep_alive) {
            (Version::Http11, true) | (Version::Http10, false) => {
                self.headers.remove(header::CONNECTION)
            }
            (Version::Http11, false) => self.headers.set(header::CONNECTION, header::CLOSE),
            (Version::Http10, true) => self.headers.set(header::CONNECTION, header::KEEP_ALIVE),
        }
    }
}

/// One message on the outbound path, in the order
/// `Head`, zero or more `Body`, `Last`.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Head(ResponseHead),
    Body(Bytes),
    Last,
}

impl Outbound {
    /// Short label for wire tracing.
    #[inline]
    pub(crate) const fn kind(&self) -> &'static str {
        match self {
            Outbound::Head(_) => "head",
            Outbound::Body(_) => "body",
            Outbound::Last => "last",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder() {
        let head = ResponseHead::new(StatusCode::NotFound)
            .header("Content-Type", "text/html")
            .header("content-type", "text/plain")
            .content_length(0);

        assert_eq!(head.status(), StatusCode::NotFound);
        assert_eq!(head.version(), Version::Http11);
        assert_eq!(head.headers().get(header::CONTENT_TYPE), Some("text/plain"));
        assert_eq!(head.headers().len(), 2);
        assert_eq!(head.get_content_length(), Some(0));
    }

    #[test]
    fn framing_headers() {
        #[rustfmt::skip]
        let cases = [
            (None,                  None,                      None,     false),
            (Some("12"),            None,                      Some(12), false),
            (Some(" 7 "),           None,                      Some(7),  false),
            (Some("x"),             None,                      None,     false),
            (None,                  Some("chunked"),           None,     true),
            (None,                  Some("gzip, Chunked"),     None,     true),
            (None,                  Some("gzip"),              None,     false),
        ];

        for (length, encoding, expected_len, expected_chunked) in cases {
            let mut head = ResponseHead::new(StatusCode::Ok);
            if let Some(v) = length {
                head.headers_mut().add(header::CONTENT_LENGTH, v);
            }
            if let Some(v) = encoding {
                head.headers_mut().add(header::TRANSFER_ENCODING, v);
            }

            assert_eq!(head.get_content_length(), expected_len, "{length:?}");
            assert_eq!(head.is_chunked(), expected_chunked, "{encoding:?}");
        }
    }

    #[test]
    fn keep_alive() {
        #[rustfmt::skip]
        let cases = [
            (Version::Http11, true,  None),
            (Version::Http11, false, Some("close")),
            (Version::Http10, true,  Some("keep-alive")),
            (Version::Http10, false, None),
        ];

        for (version, keep_alive, expected) in cases {
            let mut head = ResponseHead::new(StatusCode::Ok).header("Connection", "Upgrade");
            head.set_version(version);
            head.set_keep_alive(keep_alive);

            assert_eq!(
                head.headers().get(header::CONNECTION),
                expected,
                "{version} {keep_alive}"
            );
        }
    }

    #[test]
    fn kinds() {
        assert_eq!(Outbound::Head(ResponseHead::new(StatusCode::Ok)).kind(), "head");
        assert_eq!(Outbound::Body(Bytes::from_static(b"x")).kind(), "body");
        assert_eq!(Outbound::Last.kind(), "last");
    }
}
