use crate::http::request::RequestHead;

/// Per-connection state shared by the pipeline stages.
///
/// Created with the connection and dropped with it. Only the task serving
/// the connection touches it.
#[derive(Debug, Default)]
pub(crate) struct ConnContext {
    /// Head of the request currently being answered.
    pub(crate) request: Option<RequestHead>,
    /// The exchange in progress ends the connection.
    pub(crate) should_close_after_last: bool,
    /// The final message was handed to the transport; close on next flush.
    pub(crate) close_now: bool,
}

impl ConnContext {
    #[inline]
    pub(crate) fn request_uri(&self) -> Option<&str> {
        self.request.as_ref().map(RequestHead::uri)
    }
}
