use crate::{
    config::{ConnLimits, ReqLimits},
    errors::{Error, ParseError, Result},
    http::types::{self, header, Headers, Method, Version},
};
use bytes::{Buf, Bytes, BytesMut};
use memchr::{memchr_iter, memmem};
use std::time::Duration;
use tokio::{
    io::{AsyncRead, AsyncReadExt},
    sync::watch,
    time::timeout,
};

/// Parsed request line and headers. Immutable once parsed.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestHead {
    method: Method,
    uri: String,
    version: Version,
    headers: Headers,
    content_length: Option<usize>,
}

// Public API
impl RequestHead {
    /// Head with no headers, for tests and tools.
    pub fn new(method: Method, uri: impl Into<String>, version: Version) -> Self {
        Self {
            method,
            uri: uri.into(),
            version,
            headers: Headers::new(),
            content_length: None,
        }
    }

    /// Builder-style header addition, mostly for tests and tools.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.add(name, value);
        self
    }

    /// Request method.
    #[inline(always)]
    pub const fn method(&self) -> Method {
        self.method
    }

    /// The request-target exactly as sent, query included.
    #[inline(always)]
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// The target without its query string.
    #[inline]
    pub fn path(&self) -> &str {
        match self.uri.split_once('?') {
            Some((path, _)) => path,
            None => &self.uri,
        }
    }

    /// The query string without the leading `?`.
    #[inline]
    pub fn query(&self) -> Option<&str> {
        self.uri.split_once('?').map(|(_, query)| query)
    }

    /// Protocol version of the request line.
    #[inline(always)]
    pub const fn version(&self) -> Version {
        self.version
    }

    /// All headers in arrival order.
    #[inline(always)]
    pub const fn headers(&self) -> &Headers {
        &self.headers
    }

    /// First value of `name`, case-insensitive.
    #[inline(always)]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    /// Declared body length, if any.
    #[inline(always)]
    pub const fn content_length(&self) -> Option<usize> {
        self.content_length
    }

    /// HTTP/1.1 without `Connection: close`, or HTTP/1.0 with
    /// `Connection: keep-alive`.
    pub fn is_keep_alive(&self) -> bool {
        if self.headers.contains_token(header::CONNECTION, header::CLOSE) {
            return false;
        }

        self.version.is_keep_alive_default()
            || self
                .headers
                .contains_token(header::CONNECTION, header::KEEP_ALIVE)
    }
}

// Parse
impl RequestHead {
    /// Parses one head, `head` ending with the blank line.
    pub(crate) fn parse(head: &[u8], limits: &ReqLimits) -> Result<Self, ParseError> {
        let text = simdutf8::basic::from_utf8(head).map_err(|_| ParseError::InvalidEncoding)?;

        let mut lines = LineIter::new(text);
        let first = lines.next().ok_or(ParseError::InvalidVersion)??;
        let mut request = Self::parse_first_line(first)?;

        for line in lines {
            let line = line?;
            if line.is_empty() {
                break;
            }
            if request.headers.len() >= limits.header_count {
                return Err(ParseError::TooManyHeaders);
            }
            request.parse_header(line)?;
        }

        Ok(request)
    }

    fn parse_first_line(line: &str) -> Result<Self, ParseError> {
        let mut parts = line.split(' ');

        let method = parts.next().ok_or(ParseError::InvalidMethod)?;
        let method = Method::from_bytes(method.as_bytes())?;

        let uri = parts.next().ok_or(ParseError::InvalidUrl)?;
        if !uri.starts_with('/') {
            return Err(ParseError::InvalidUrl);
        }

        let version = parts.next().ok_or(ParseError::InvalidVersion)?;
        let version = Version::from_bytes(version.as_bytes())?;

        if parts.next().is_some() {
            return Err(ParseError::InvalidVersion);
        }

        Ok(Self::new(method, uri, version))
    }

    fn parse_header(&mut self, line: &str) -> Result<(), ParseError> {
        let (name, value) = line.split_once(':').ok_or(ParseError::InvalidHeader)?;

        if name.is_empty() || name.bytes().any(|b| b.is_ascii_whitespace()) {
            return Err(ParseError::InvalidHeader);
        }
        let value = value.trim();

        if name.eq_ignore_ascii_case(header::CONTENT_LENGTH) {
            let len =
                types::slice_to_usize(value.as_bytes()).ok_or(ParseError::InvalidContentLength)?;
            if self.content_length.is_some_and(|prev| prev != len) {
                return Err(ParseError::InvalidContentLength);
            }
            self.content_length = Some(len);
        } else if name.eq_ignore_ascii_case(header::TRANSFER_ENCODING) {
            return Err(ParseError::UnsupportedTransferEncoding);
        }

        self.headers.add(name, value);
        Ok(())
    }
}

/// One message on the inbound path, in the order
/// `Head`, zero or more `Body`, `Last`.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Head(RequestHead),
    Body(Bytes),
    Last,
}

/// CRLF-terminated lines of a head.
struct LineIter<'a> {
    text: &'a str,
    start: usize,
    breaks: memchr::Memchr<'a>,
}

impl<'a> LineIter<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            text,
            start: 0,
            breaks: memchr_iter(b'\n', text.as_bytes()),
        }
    }
}

impl<'a> Iterator for LineIter<'a> {
    type Item = Result<&'a str, ParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        let lf = self.breaks.next()?;
        let line = &self.text[self.start..lf];
        self.start = lf + 1;

        Some(line.strip_suffix('\r').ok_or(ParseError::InvalidHeader))
    }
}

//

/// Inbound side of a connection: reads heads and bodies off the socket,
/// keeping pipelined bytes for the next request.
#[derive(Debug)]
pub(crate) struct Parser {
    buffer: BytesMut,
    body_remaining: usize,
}

impl Parser {
    const READ_CHUNK: usize = 4096;

    pub(crate) fn new(limits: &ReqLimits) -> Self {
        Self {
            buffer: BytesMut::with_capacity(limits.max_head_size),
            body_remaining: 0,
        }
    }

    #[inline]
    pub(crate) fn reset(&mut self) {
        self.buffer.clear();
        self.body_remaining = 0;
    }

    /// Reads the next request head.
    ///
    /// `Ok(None)` means the peer closed cleanly between requests, or
    /// shutdown began while the connection was idle.
    pub(crate) async fn read_head<R: AsyncRead + Unpin>(
        &mut self,
        io: &mut R,
        req_limits: &ReqLimits,
        conn_limits: &ConnLimits,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<Option<RequestHead>> {
        loop {
            self.skip_empty_lines();

            let window = self.buffer.len().min(req_limits.max_head_size);
            if let Some(end) = memmem::find(&self.buffer[..window], b"\r\n\r\n") {
                let head = self.buffer.split_to(end + 4);
                let request = RequestHead::parse(&head, req_limits)?;
                self.body_remaining = request.content_length.unwrap_or(0);
                return Ok(Some(request));
            }

            if window >= req_limits.max_head_size {
                return Err(ParseError::HeadTooLarge.into());
            }

            let n = match self.buffer.is_empty() {
                true => {
                    let idle = conn_limits.idle_timeout;
                    tokio::select! {
                        biased;

                        read = self.fill(io, idle) => match read {
                            Err(Error::ReadTimeout) => return Err(Error::IdleTimeout(idle)),
                            other => other?,
                        },
                        _ = async {
                            let _ = shutdown.wait_for(|stop| *stop).await;
                        } => return Ok(None),
                    }
                }
                false => self.fill(io, conn_limits.socket_read_timeout).await?,
            };

            if n == 0 {
                return match self.buffer.is_empty() {
                    true => Ok(None),
                    false => Err(ParseError::Incomplete.into()),
                };
            }
        }
    }

    /// Next part of the current request body, `None` once it is consumed.
    pub(crate) async fn read_body<R: AsyncRead + Unpin>(
        &mut self,
        io: &mut R,
        conn_limits: &ConnLimits,
    ) -> Result<Option<Bytes>> {
        if self.body_remaining == 0 {
            return Ok(None);
        }

        if self.buffer.is_empty() && self.fill(io, conn_limits.socket_read_timeout).await? == 0 {
            return Err(ParseError::Incomplete.into());
        }

        let take = self.body_remaining.min(self.buffer.len());
        self.body_remaining -= take;
        Ok(Some(self.buffer.split_to(take).freeze()))
    }

    /// Whether bytes of a further request are already buffered.
    #[cfg(test)]
    pub(crate) fn has_pipelined(&self) -> bool {
        !self.buffer.is_empty()
    }

    async fn fill<R: AsyncRead + Unpin>(&mut self, io: &mut R, time: Duration) -> Result<usize> {
        self.buffer.reserve(Self::READ_CHUNK);

        match timeout(time, io.read_buf(&mut self.buffer)).await {
            Ok(read) => Ok(read?),
            Err(_) => Err(Error::ReadTimeout),
        }
    }

    #[inline]
    fn skip_empty_lines(&mut self) {
        while self.buffer.starts_with(b"\r\n") {
            self.buffer.advance(2);
        }
    }
}
