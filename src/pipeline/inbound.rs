use crate::{errors::Error, http::request::Inbound, pipeline::context::ConnContext};
use tracing::{debug, error};

/// Stashes each request head on the connection context so later stages
/// can consult it, then forwards the message unchanged.
#[derive(Debug, Default)]
pub(crate) struct InboundCapture;

impl InboundCapture {
    pub(crate) fn on_read(&self, ctx: &mut ConnContext, msg: Inbound) -> Inbound {
        if let Inbound::Head(head) = &msg {
            ctx.request = Some(head.clone());
        }
        msg
    }

    /// Logs a transport error and reports whether the exchange can still be
    /// answered with the default error response: only while a request is
    /// waiting for its response head.
    pub(crate) fn on_error(&self, ctx: &ConnContext, err: &Error) -> bool {
        match ctx.request_uri() {
            Some(uri) => {
                error!(uri, error = %err, "error while serving request");
                true
            }
            None if err.is_quiet_close() => {
                debug!(error = %err, "connection closed");
                false
            }
            None => {
                debug!(error = %err, "connection error");
                false
            }
        }
    }
}
