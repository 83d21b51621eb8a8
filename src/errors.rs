use std::{io, time::Duration};

/// Result type used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Everything that can go wrong while serving a connection.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("malformed request: {0}")]
    Parse(#[from] ParseError),

    #[error("socket read timed out")]
    ReadTimeout,

    #[error("connection idle for {0:?}")]
    IdleTimeout(Duration),

    #[error("socket write timed out")]
    WriteTimeout,

    #[error("asset not found: {0}")]
    AssetNotFound(String),

    #[error("framing violation: {0}")]
    Framing(&'static str),

    #[error("invalid value {value:?} for config key `{key}`")]
    Config { key: String, value: String },

    #[error("invalid config file: {0}")]
    ConfigFile(#[from] toml::de::Error),
}

impl Error {
    /// Errors after which the peer simply goes away, nothing worth a 500.
    pub(crate) fn is_quiet_close(&self) -> bool {
        matches!(self, Error::IdleTimeout(_)) || matches!(self, Error::Io(e) if is_disconnect(e))
    }
}

#[inline]
pub(crate) fn is_disconnect(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof
    )
}

/// Reasons the request parser rejects a head. The connection is dropped
/// without a response for all of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("invalid method")]
    InvalidMethod,
    #[error("invalid request target")]
    InvalidUrl,
    #[error("invalid HTTP version")]
    InvalidVersion,
    #[error("unsupported HTTP version")]
    UnsupportedVersion,
    #[error("invalid header line")]
    InvalidHeader,
    #[error("too many headers")]
    TooManyHeaders,
    #[error("invalid Content-Length")]
    InvalidContentLength,
    #[error("request head is not valid UTF-8")]
    InvalidEncoding,
    #[error("request head too large")]
    HeadTooLarge,
    #[error("request Transfer-Encoding is not supported")]
    UnsupportedTransferEncoding,
    #[error("connection closed mid-request")]
    Incomplete,
}

/// Canned reply for streams accepted over the connection limit.
pub(crate) const SERVICE_UNAVAILABLE: &[u8] =
    b"HTTP/1.1 503 Service Unavailable\r\nconnection: close\r\ncontent-length: 0\r\n\r\n";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quiet_close() {
        #[rustfmt::skip]
        let cases = [
            (Error::IdleTimeout(Duration::from_secs(30)),                      true),
            (Error::Io(io::Error::from(io::ErrorKind::ConnectionReset)),       true),
            (Error::Io(io::Error::from(io::ErrorKind::BrokenPipe)),            true),
            (Error::Io(io::Error::from(io::ErrorKind::PermissionDenied)),      false),
            (Error::ReadTimeout,                                               false),
            (Error::Parse(ParseError::InvalidMethod),                          false),
            (Error::AssetNotFound("/web/x".into()),                            false),
        ];

        for (err, expected) in cases {
            assert_eq!(err.is_quiet_close(), expected, "{err}");
        }
    }

    #[test]
    fn display() {
        assert_eq!(
            Error::AssetNotFound("/web/clean/missing.png".into()).to_string(),
            "asset not found: /web/clean/missing.png"
        );
        assert_eq!(
            Error::from(ParseError::TooManyHeaders).to_string(),
            "malformed request: too many headers"
        );
        assert_eq!(
            Error::Config {
                key: "server.chunk.pause".into(),
                value: "soon".into()
            }
            .to_string(),
            "invalid value \"soon\" for config key `server.chunk.pause`"
        );
    }

    #[test]
    fn canned_503_is_framed() {
        let text = std::str::from_utf8(SERVICE_UNAVAILABLE).unwrap();
        assert!(text.starts_with("HTTP/1.1 503 "));
        assert!(text.ends_with("content-length: 0\r\n\r\n"));
    }
}
