//! Core HTTP protocol types and utilities

use crate::errors::ParseError;
use std::fmt;

/// Lower-case header names used by the server.
pub mod header {
    /// `Cache-Control`
    pub const CACHE_CONTROL: &str = "cache-control";
    /// `Connection`
    pub const CONNECTION: &str = "connection";
    /// `Content-Length`
    pub const CONTENT_LENGTH: &str = "content-length";
    /// `Content-Type`
    pub const CONTENT_TYPE: &str = "content-type";
    /// `Transfer-Encoding`
    pub const TRANSFER_ENCODING: &str = "transfer-encoding";

    /// `Transfer-Encoding` value.
    pub const CHUNKED: &str = "chunked";
    /// `Connection` value.
    pub const CLOSE: &str = "close";
    /// `Connection` value.
    pub const KEEP_ALIVE: &str = "keep-alive";
}

#[inline(always)]
pub(crate) fn slice_to_usize(bytes: &[u8]) -> Option<usize> {
    if bytes.is_empty() {
        return None;
    }

    let mut result: usize = 0;
    for &byte in bytes {
        if !byte.is_ascii_digit() {
            return None;
        }

        result = result
            .checked_mul(10)?
            .checked_add((byte - b'0') as usize)?;
    }

    Some(result)
}

// METHOD

/// Request method. Anything else is rejected by the parser.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Put,
    Post,
    Head,
    Patch,
    Delete,
    Options,
}

impl Method {
    #[inline(always)]
    pub(crate) fn from_bytes(src: &[u8]) -> Result<Self, ParseError> {
        match src {
            b"GET" => Ok(Method::Get),
            b"PUT" => Ok(Method::Put),
            b"POST" => Ok(Method::Post),
            b"HEAD" => Ok(Method::Head),
            b"PATCH" => Ok(Method::Patch),
            b"DELETE" => Ok(Method::Delete),
            b"OPTIONS" => Ok(Method::Options),
            _ => Err(ParseError::InvalidMethod),
        }
    }

    /// Method token as sent on the request line.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Put => "PUT",
            Method::Post => "POST",
            Method::Head => "HEAD",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
            Method::Options => "OPTIONS",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// VERSION

/// Supported protocol versions.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Version {
    Http10,
    Http11,
}

impl Version {
    #[inline(always)]
    pub(crate) const fn from_bytes(src: &[u8]) -> Result<Self, ParseError> {
        match src {
            b"HTTP/1.1" => Ok(Self::Http11),
            b"HTTP/1.0" => Ok(Self::Http10),
            [b'H', b'T', b'T', b'P', b'/', ..] => Err(ParseError::UnsupportedVersion),
            _ => Err(ParseError::InvalidVersion),
        }
    }

    /// Whether connections persist unless told otherwise.
    #[inline(always)]
    pub const fn is_keep_alive_default(&self) -> bool {
        matches!(self, Version::Http11)
    }

    /// `HTTP/1.0` or `HTTP/1.1`.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Version::Http10 => "HTTP/1.0",
            Version::Http11 => "HTTP/1.1",
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// STATUS_CODE

macro_rules! set_status_codes {
    ($(
        $name:ident = ($num:expr, $str:expr);
    )+) => {
        /// Response status codes known to the server.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum StatusCode { $(
            #[doc = concat!(stringify!($num), " ", $str)]
            $name = $num,
        )+ }

        impl StatusCode {
            // Returns the HTTP first line as bytes (e.g., `b"HTTP/1.1 200 OK\r\n"`).
            #[inline]
            pub(crate) const fn to_first_line(&self, version: Version) -> &'static [u8] {
                match (self, version) { $(
                    (StatusCode::$name, Version::Http11) => {
                        concat!("HTTP/1.1 ", $num, " ", $str, "\r\n").as_bytes()
                    },
                    (StatusCode::$name, Version::Http10) => {
                        concat!("HTTP/1.0 ", $num, " ", $str, "\r\n").as_bytes()
                    },
                )+ }
            }

            /// Reason phrase, `"OK"` for `200`.
            #[inline]
            pub const fn reason(&self) -> &'static str {
                match self { $(
                    StatusCode::$name => $str,
                )+ }
            }
        }
    }
}

set_status_codes! {
    Continue = (100, "Continue");

    Ok = (200, "OK");
    NoContent = (204, "No Content");
    PartialContent = (206, "Partial Content");

    MovedPermanently = (301, "Moved Permanently");
    Found = (302, "Found");
    NotModified = (304, "Not Modified");

    BadRequest = (400, "Bad Request");
    Forbidden = (403, "Forbidden");
    NotFound = (404, "Not Found");
    MethodNotAllowed = (405, "Method Not Allowed");
    RequestTimeout = (408, "Request Timeout");
    PayloadTooLarge = (413, "Payload Too Large");
    UriTooLong = (414, "URI Too Long");
    RequestHeaderFieldsTooLarge = (431, "Request Header Fields Too Large");

    InternalServerError = (500, "Internal Server Error");
    NotImplemented = (501, "Not Implemented");
    ServiceUnavailable = (503, "Service Unavailable");
    HttpVersionNotSupported = (505, "HTTP Version Not Supported");
}

impl StatusCode {
    /// Numeric code.
    #[inline]
    pub const fn as_u16(&self) -> u16 {
        *self as u16
    }
}

// HEADERS

/// Ordered, case-insensitive header list.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    /// Empty list.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty list with room for `capacity` headers.
    #[inline]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
        }
    }

    /// First value of `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Whether `name` is present.
    #[inline]
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Whether any value of `name` lists `token` (comma separated,
    /// case-insensitive), e.g. `Connection: keep-alive, Upgrade`.
    pub fn contains_token(&self, name: &str, token: &str) -> bool {
        self.entries
            .iter()
            .filter(|(n, _)| n.eq_ignore_ascii_case(name))
            .flat_map(|(_, v)| v.split(','))
            .any(|t| t.trim().eq_ignore_ascii_case(token))
    }

    /// Appends a value, keeping existing ones.
    pub fn add<N: Into<String>, V: Into<String>>(&mut self, name: N, value: V) {
        self.entries.push((name.into(), value.into()));
    }

    /// Replaces every value of `name` with one value.
    pub fn set<N: Into<String>, V: Into<String>>(&mut self, name: N, value: V) {
        let name = name.into();
        self.remove(&name);
        self.entries.push((name, value.into()));
    }

    /// Drops every value of `name`.
    pub fn remove(&mut self, name: &str) {
        self.entries.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
    }

    /// Name and value pairs in order.
    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Number of header lines.
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no headers are set.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method() {
        #[rustfmt::skip]
        let cases: [(&[u8], Option<Method>); 9] = [
            (b"GET",     Some(Method::Get)),
            (b"PUT",     Some(Method::Put)),
            (b"POST",    Some(Method::Post)),
            (b"HEAD",    Some(Method::Head)),
            (b"PATCH",   Some(Method::Patch)),
            (b"DELETE",  Some(Method::Delete)),
            (b"OPTIONS", Some(Method::Options)),

            (b"get",     None),
            (b"GETGET",  None),
        ];

        for (src, expected) in cases {
            match expected {
                Some(method) => assert_eq!(Method::from_bytes(src), Ok(method)),
                None => assert_eq!(Method::from_bytes(src), Err(ParseError::InvalidMethod)),
            }
        }
    }

    #[test]
    fn version() {
        #[rustfmt::skip]
        let cases: [(&[u8], Result<Version, ParseError>); 5] = [
            (b"HTTP/1.1", Ok(Version::Http11)),
            (b"HTTP/1.0", Ok(Version::Http10)),
            (b"HTTP/2.0", Err(ParseError::UnsupportedVersion)),
            (b"HTTP/0.9", Err(ParseError::UnsupportedVersion)),
            (b"HTTX/1.1", Err(ParseError::InvalidVersion)),
        ];

        for (src, expected) in cases {
            assert_eq!(Version::from_bytes(src), expected);
        }

        assert!(Version::Http11.is_keep_alive_default());
        assert!(!Version::Http10.is_keep_alive_default());
    }

    #[test]
    fn first_line() {
        #[rustfmt::skip]
        let cases = [
            (StatusCode::Ok,                  Version::Http11, "HTTP/1.1 200 OK\r\n"),
            (StatusCode::Ok,                  Version::Http10, "HTTP/1.0 200 OK\r\n"),
            (StatusCode::NotFound,            Version::Http11, "HTTP/1.1 404 Not Found\r\n"),
            (StatusCode::InternalServerError, Version::Http10, "HTTP/1.0 500 Internal Server Error\r\n"),
        ];

        for (status, version, line) in cases {
            assert_eq!(status.to_first_line(version), line.as_bytes());
        }
        assert_eq!(StatusCode::ServiceUnavailable.as_u16(), 503);
    }

    #[test]
    fn usize_parsing() {
        #[rustfmt::skip]
        let cases: [(&[u8], Option<usize>); 6] = [
            (b"0",     Some(0)),
            (b"1234",  Some(1234)),
            (b"",      None),
            (b"12a",   None),
            (b"-1",    None),
            (b"99999999999999999999999", None),
        ];

        for (src, expected) in cases {
            assert_eq!(slice_to_usize(src), expected);
        }
    }

    #[test]
    fn headers() {
        let mut headers = Headers::new();
        headers.add("Connection", "keep-alive, Upgrade");
        headers.add("X-Tag", "a");
        headers.add("x-tag", "b");

        assert_eq!(headers.get("connection"), Some("keep-alive, Upgrade"));
        assert!(headers.contains_token(header::CONNECTION, "Keep-Alive"));
        assert!(headers.contains_token(header::CONNECTION, "upgrade"));
        assert!(!headers.contains_token(header::CONNECTION, "close"));

        headers.set("X-TAG", "c");
        assert_eq!(headers.get("x-tag"), Some("c"));
        assert_eq!(headers.len(), 2);

        headers.remove("CONNECTION");
        assert!(!headers.contains(header::CONNECTION));
        assert_eq!(headers.iter().collect::<Vec<_>>(), vec![("X-TAG", "c")]);
    }
}
