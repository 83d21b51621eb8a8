use crate::{
    config::{ConnLimits, ReqLimits},
    errors::Result,
    http::request::{Inbound, Parser},
    pipeline::{chain::Pipeline, dispatcher::Dispatcher},
};
use std::sync::Arc;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::watch,
};
use tracing::debug;

/// One client connection, owned by its own task. The parser buffer is
/// reused across the requests of that connection.
pub(crate) struct HttpConnection {
    dispatcher: Arc<Dispatcher>,
    parser: Parser,
    conn_limits: ConnLimits,
    req_limits: ReqLimits,
    shutdown: watch::Receiver<bool>,
}

impl HttpConnection {
    #[inline]
    pub(crate) fn new(
        dispatcher: Arc<Dispatcher>,
        conn_limits: ConnLimits,
        req_limits: ReqLimits,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            dispatcher,
            parser: Parser::new(&req_limits),
            conn_limits,
            req_limits,
            shutdown,
        }
    }

    /// Serves requests on `stream` until the peer leaves, the pipeline
    /// closes the connection, or an error ends it.
    pub(crate) async fn run<S: AsyncRead + AsyncWrite>(&mut self, stream: S) -> Result<()> {
        self.parser.reset();

        let (mut reader, writer) = tokio::io::split(stream);
        let mut pipeline = Pipeline::new(writer, self.conn_limits.socket_write_timeout);

        let result = self.serve(&mut reader, &mut pipeline).await;
        if let Err(err) = &result {
            if let Err(err) = pipeline.fire_error(err).await {
                debug!(error = %err, "default error response not delivered");
            }
        }
        result
    }

    async fn serve<R, W>(&mut self, reader: &mut R, pipeline: &mut Pipeline<W>) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        loop {
            let head = self
                .parser
                .read_head(reader, &self.req_limits, &self.conn_limits, &mut self.shutdown)
                .await?;
            let Some(head) = head else {
                return Ok(());
            };

            pipeline.fire_read(Inbound::Head(head), &self.dispatcher).await?;
            while let Some(part) = self.parser.read_body(reader, &self.conn_limits).await? {
                pipeline.fire_read(Inbound::Body(part), &self.dispatcher).await?;
            }
            pipeline.fire_read(Inbound::Last, &self.dispatcher).await?;

            if pipeline.is_closed() {
                return Ok(());
            }
        }
    }
}
