use crate::{
    errors::{Error, Result},
    http::{
        request::{Inbound, RequestHead},
        response::Outbound,
    },
    pipeline::{
        context::ConnContext,
        dispatcher::{Dispatcher, ResponseShape},
        inbound::InboundCapture,
        outbound::{OutboundHygiene, Transport},
    },
};
use std::time::Duration;
use tokio::io::AsyncWrite;

/// The per-connection handler chain.
///
/// Inbound messages pass through request capture into the dispatcher;
/// outbound messages pass through the hygiene stage into the transport.
/// A `Pipeline` lives exactly as long as its connection.
#[derive(Debug)]
pub(crate) struct Pipeline<W> {
    ctx: ConnContext,
    inbound: InboundCapture,
    outbound: OutboundHygiene,
    transport: Transport<W>,
}

impl<W: AsyncWrite + Unpin> Pipeline<W> {
    pub(crate) fn new(io: W, write_timeout: Duration) -> Self {
        Self {
            ctx: ConnContext::default(),
            inbound: InboundCapture,
            outbound: OutboundHygiene,
            transport: Transport::new(io, write_timeout),
        }
    }

    pub(crate) async fn fire_read(&mut self, msg: Inbound, dispatcher: &Dispatcher) -> Result<()> {
        let msg = self.inbound.on_read(&mut self.ctx, msg);
        dispatcher.on_read(self, msg).await
    }

    /// Handles an error raised while reading or answering a request. If a
    /// request is still waiting for its head, it gets the default error
    /// response and the connection closes after it.
    pub(crate) async fn fire_error(&mut self, err: &Error) -> Result<()> {
        if !self.inbound.on_error(&self.ctx, err) {
            return Ok(());
        }

        self.ctx.should_close_after_last = true;
        for msg in ResponseShape::default_error().into_messages() {
            self.write(msg)?;
        }
        self.flush().await
    }

    /// Request currently being answered, if its response head has not gone
    /// out yet.
    #[inline]
    pub(crate) fn request(&self) -> Option<&RequestHead> {
        self.ctx.request.as_ref()
    }

    /// Hands `msg` to the transport after the hygiene stage.
    pub(crate) fn write(&mut self, mut msg: Outbound) -> Result<()> {
        self.outbound.on_write(&mut self.ctx, &mut msg);
        self.transport.write(&msg)?;
        self.outbound.on_written(&mut self.ctx, &msg);
        Ok(())
    }

    /// Flushes buffered output, then closes the connection if the last
    /// message of a closing exchange went out with it.
    pub(crate) async fn flush(&mut self) -> Result<()> {
        self.transport.flush().await?;
        if self.ctx.close_now {
            self.transport.close().await;
        }
        Ok(())
    }

    #[inline]
    pub(crate) fn is_closed(&self) -> bool {
        self.transport.is_closed()
    }
}
