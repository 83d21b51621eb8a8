use crate::{
    errors::{Error, Result},
    http::{
        codec::Encoder,
        response::{Outbound, ResponseHead},
        types::{header, Version},
    },
    pipeline::context::ConnContext,
};
use std::time::Duration;
use tokio::{
    io::{AsyncWrite, AsyncWriteExt},
    time::timeout,
};
use tracing::{trace, warn};

/// Normalizes every response head against the request it answers and
/// decides whether the connection survives the exchange.
#[derive(Debug, Default)]
pub(crate) struct OutboundHygiene;

impl OutboundHygiene {
    /// Mutates `msg` before it reaches the transport.
    pub(crate) fn on_write(&self, ctx: &mut ConnContext, msg: &mut Outbound) {
        if let Outbound::Head(head) = msg {
            Self::on_head(ctx, head);
        }
    }

    /// Called once `msg` has been handed to the transport.
    #[inline]
    pub(crate) fn on_written(&self, ctx: &mut ConnContext, msg: &Outbound) {
        if matches!(msg, Outbound::Last) && ctx.should_close_after_last {
            ctx.close_now = true;
        }
    }

    fn on_head(ctx: &mut ConnContext, head: &mut ResponseHead) {
        if head.get_content_length().is_some() && head.is_chunked() {
            head.headers_mut().remove(header::CONTENT_LENGTH);
        }
        if head.get_content_length().is_none() && !head.is_chunked() {
            head.headers_mut()
                .set(header::TRANSFER_ENCODING, header::CHUNKED);
        }

        let Some(request) = ctx.request.take() else {
            warn!(status = head.status().as_u16(), "response without a request, closing after it");
            ctx.should_close_after_last = true;
            head.set_keep_alive(false);
            return;
        };

        if head.version() != request.version() {
            head.set_version(request.version());
        }

        if request.is_keep_alive() {
            head.set_keep_alive(true);
        } else {
            ctx.should_close_after_last = true;
            if request.version() == Version::Http10 {
                head.headers_mut().set(header::CONNECTION, header::CLOSE);
            }
        }
    }
}

//

/// Write side of a connection: encodes messages into a buffer and hands
/// the buffer to the socket on flush.
///
/// Once closed, writes and flushes are discarded without error.
#[derive(Debug)]
pub(crate) struct Transport<W> {
    io: W,
    buffer: Vec<u8>,
    encoder: Encoder,
    write_timeout: Duration,
    closed: bool,
}

impl<W: AsyncWrite + Unpin> Transport<W> {
    pub(crate) fn new(io: W, write_timeout: Duration) -> Self {
        Self {
            io,
            buffer: Vec::with_capacity(4096),
            encoder: Encoder::new(),
            write_timeout,
            closed: false,
        }
    }

    pub(crate) fn write(&mut self, msg: &Outbound) -> Result<()> {
        if self.closed {
            trace!(kind = msg.kind(), "discarding write on closed connection");
            return Ok(());
        }

        trace!(kind = msg.kind(), message = ?msg, "outbound");
        self.encoder.encode(msg, &mut self.buffer)
    }

    /// Writes out everything buffered. A failed or timed out flush closes
    /// the transport before the error is returned.
    pub(crate) async fn flush(&mut self) -> Result<()> {
        if self.closed || self.buffer.is_empty() {
            self.buffer.clear();
            return Ok(());
        }

        let result = match timeout(self.write_timeout, async {
            self.io.write_all(&self.buffer).await?;
            self.io.flush().await
        })
        .await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(Error::Io(e)),
            Err(_) => Err(Error::WriteTimeout),
        };

        self.buffer.clear();
        if result.is_err() {
            self.closed = true;
        }
        result
    }

    /// Ends the connection. Only the hygiene stage decides when.
    pub(super) async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.buffer.clear();
        self.encoder.reset();
        // The peer may already be gone.
        let _ = timeout(self.write_timeout, self.io.shutdown()).await;
    }

    #[inline]
    pub(crate) fn is_closed(&self) -> bool {
        self.closed
    }
}
