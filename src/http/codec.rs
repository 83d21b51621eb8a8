//! Response serialization with `Content-Length` or chunked framing.

use crate::{
    errors::{Error, Result},
    http::response::{Outbound, ResponseHead},
};

#[derive(Debug, Clone, Copy, PartialEq)]
enum State {
    /// Between responses.
    Idle,
    Chunked,
    Fixed { remaining: usize },
}

/// Turns outbound messages into wire bytes, checking that bodies match
/// the framing their head declared.
#[derive(Debug)]
pub(crate) struct Encoder {
    state: State,
}

impl Encoder {
    pub(crate) const fn new() -> Self {
        Self { state: State::Idle }
    }

    #[inline]
    pub(crate) fn reset(&mut self) {
        self.state = State::Idle;
    }

    /// Appends the encoding of `msg` to `dst`. On error nothing is appended.
    pub(crate) fn encode(&mut self, msg: &Outbound, dst: &mut Vec<u8>) -> Result<()> {
        match (msg, self.state) {
            (Outbound::Head(head), State::Idle) => {
                self.state = match head.is_chunked() {
                    true => State::Chunked,
                    false => State::Fixed {
                        remaining: head.get_content_length().unwrap_or(0),
                    },
                };
                Self::write_head(head, dst);
            }
            (Outbound::Head(_), _) => {
                return Err(Error::Framing("response head before the previous response ended"))
            }

            (Outbound::Body(data), State::Chunked) => {
                // A zero-size chunk would end the message.
                if !data.is_empty() {
                    Self::write_chunk_size(data.len(), dst);
                    dst.extend_from_slice(data);
                    dst.extend_from_slice(b"\r\n");
                }
            }
            (Outbound::Body(data), State::Fixed { remaining }) => {
                if data.len() > remaining {
                    return Err(Error::Framing("body exceeds declared content-length"));
                }
                self.state = State::Fixed {
                    remaining: remaining - data.len(),
                };
                dst.extend_from_slice(data);
            }

            (Outbound::Last, State::Chunked) => {
                dst.extend_from_slice(b"0\r\n\r\n");
                self.state = State::Idle;
            }
            (Outbound::Last, State::Fixed { remaining: 0 }) => self.state = State::Idle,
            (Outbound::Last, State::Fixed { .. }) => {
                return Err(Error::Framing("message ended short of declared content-length"))
            }

            (Outbound::Body(_) | Outbound::Last, State::Idle) => {
                return Err(Error::Framing("body sent outside of a response"))
            }
        }

        Ok(())
    }

    fn write_head(head: &ResponseHead, dst: &mut Vec<u8>) {
        dst.extend_from_slice(head.status().to_first_line(head.version()));
        for (name, value) in head.headers().iter() {
            dst.extend_from_slice(name.as_bytes());
            dst.extend_from_slice(b": ");
            dst.extend_from_slice(value.as_bytes());
            dst.extend_from_slice(b"\r\n");
        }
        dst.extend_from_slice(b"\r\n");
    }

    #[inline]
    fn write_chunk_size(mut len: usize, dst: &mut Vec<u8>) {
        const HEX: &[u8; 16] = b"0123456789abcdef";

        let mut buf = [0u8; 2 * std::mem::size_of::<usize>()];
        let mut pos = buf.len();
        loop {
            pos -= 1;
            buf[pos] = HEX[len & 0xf];
            len >>= 4;
            if len == 0 {
                break;
            }
        }

        dst.extend_from_slice(&buf[pos..]);
        dst.extend_from_slice(b"\r\n");
    }
}
