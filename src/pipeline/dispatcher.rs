//! Application dispatcher: route table and response shapes.

use crate::{
    assets::{self, AssetStore},
    errors::Result,
    http::{
        request::{Inbound, RequestHead},
        response::{Outbound, ResponseHead},
        types::{header, StatusCode},
    },
    pipeline::{chain::Pipeline, scheduler::DelayScheduler},
};
use bytes::{Bytes, BytesMut};
use std::{sync::Arc, time::Duration};
use tokio::io::AsyncWrite;
use tracing::{debug, error};

const GREETING_FIRST: &str =
    "<html><head><title>Chunking Test</title></head><body><p>First Chunk</p>";
const GREETING_TAIL: &str = "<p>2nd Chunk</p></body></html>";

const IG_PAGE: &str = "/ig-eliminating-roundtrips/";
const IG_PREFIX: &str = "/ig-eliminating-roundtrips";
const IG_FILES: &str =
    "/ig-eliminating-roundtrips/Eliminating-Roundtrips-with-Preconnect_igvita.com_files/";
const IG_FRAG1: &str = "/web/Eliminating-Roundtrips-with-Preconnect_igvita.com_frag1.html";
const IG_FRAG2: &str = "/web/Eliminating-Roundtrips-with-Preconnect_igvita.com_frag2.html";

const CLEAN_PAGE: &str = "/clean/";
const CLEAN_FRAG1: &str = "/web/clean/index_frag1.html";
const CLEAN_FRAG2: &str = "/web/clean/index_frag2.html";

const FAVICON: &str = "/favicon.ico";
const FAVICON_ASSET: &str = "/web/clean/favicon.ico";

const CACHE_CONTROL: &str = "max-age=60, public";

/// How a response is delivered.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseShape {
    /// Head and whole body in one flush.
    Immediate { head: ResponseHead, body: Bytes },
    /// Head and first chunk flushed at once; tail chunk and end of message
    /// flushed after `delay`.
    ChunkedWithDelayedTail {
        head: ResponseHead,
        first: Bytes,
        tail: Bytes,
        delay: Duration,
    },
    /// Head carrying `Content-Length` of both parts flushed at once; the
    /// concatenated body flushed after `delay`.
    BufferedWithDelayedTail {
        head: ResponseHead,
        first: Bytes,
        tail: Bytes,
        delay: Duration,
    },
}

impl ResponseShape {
    /// `500` with an empty `Content-Length` framed body.
    pub fn default_error() -> Self {
        Self::Immediate {
            head: ResponseHead::new(StatusCode::InternalServerError).content_length(0),
            body: Bytes::new(),
        }
    }

    /// `404` with an empty body and no framing header of its own.
    pub fn not_found() -> Self {
        Self::Immediate {
            head: ResponseHead::new(StatusCode::NotFound),
            body: Bytes::new(),
        }
    }

    /// Response head, whatever the shape.
    #[inline]
    pub fn head(&self) -> &ResponseHead {
        match self {
            Self::Immediate { head, .. }
            | Self::ChunkedWithDelayedTail { head, .. }
            | Self::BufferedWithDelayedTail { head, .. } => head,
        }
    }

    /// The shape as one undelayed message sequence.
    pub(crate) fn into_messages(self) -> Vec<Outbound> {
        let mut messages = Vec::with_capacity(4);
        match self {
            Self::Immediate { head, body } => {
                messages.push(Outbound::Head(head));
                if !body.is_empty() {
                    messages.push(Outbound::Body(body));
                }
            }
            Self::ChunkedWithDelayedTail {
                head, first, tail, ..
            }
            | Self::BufferedWithDelayedTail {
                head, first, tail, ..
            } => {
                messages.push(Outbound::Head(head));
                messages.push(Outbound::Body(first));
                messages.push(Outbound::Body(tail));
            }
        }
        messages.push(Outbound::Last);
        messages
    }
}

//

/// Route match predicate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Predicate {
    /// Target equals the path.
    Exact(&'static str),
    /// Target equals the path, or is the path followed by a query string.
    WithQuery(&'static str),
    /// Target starts with the prefix.
    Prefix(&'static str),
}

impl Predicate {
    #[inline]
    pub(crate) fn matches(&self, uri: &str) -> bool {
        match *self {
            Predicate::Exact(path) => uri == path,
            Predicate::WithQuery(path) => {
                uri == path
                    || uri
                        .strip_prefix(path)
                        .is_some_and(|rest| rest.starts_with('?'))
            }
            Predicate::Prefix(prefix) => uri.starts_with(prefix),
        }
    }
}

type Handler = fn(&Dispatcher, &RequestHead) -> Result<ResponseShape>;

#[derive(Clone, Copy)]
pub(crate) struct Route {
    predicate: Predicate,
    handler: Handler,
}

impl std::fmt::Debug for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Route")
            .field("predicate", &self.predicate)
            .finish_non_exhaustive()
    }
}

/// Evaluated top to bottom, first match wins.
#[rustfmt::skip]
static ROUTES: [Route; 6] = [
    Route { predicate: Predicate::Exact("/"),          handler: Dispatcher::greeting },
    Route { predicate: Predicate::Exact(IG_PAGE),      handler: Dispatcher::ig_page },
    Route { predicate: Predicate::WithQuery(CLEAN_PAGE), handler: Dispatcher::clean_page },
    Route { predicate: Predicate::Prefix(IG_FILES),    handler: Dispatcher::ig_file },
    Route { predicate: Predicate::Prefix(CLEAN_PAGE),  handler: Dispatcher::clean_file },
    Route { predicate: Predicate::Exact(FAVICON),      handler: Dispatcher::favicon },
];

/// Answers each complete request with a shape picked from the route table.
///
/// Shared by every connection; per-connection state stays in the
/// [`Pipeline`].
#[derive(Debug)]
pub struct Dispatcher {
    routes: &'static [Route],
    assets: Arc<AssetStore>,
    scheduler: DelayScheduler,
}

impl Dispatcher {
    /// Dispatcher over the full route table, serving `assets` and pausing
    /// through `scheduler`.
    pub fn new(assets: Arc<AssetStore>, scheduler: DelayScheduler) -> Self {
        Self {
            routes: &ROUTES,
            assets,
            scheduler,
        }
    }

    /// Picks the response for `request`. Handler failures are logged with
    /// the request target and answered with [`ResponseShape::default_error`].
    pub fn select(&self, request: &RequestHead) -> ResponseShape {
        let uri = request.uri();
        let route = self.routes.iter().find(|route| route.predicate.matches(uri));

        let Some(route) = route else {
            return ResponseShape::not_found();
        };

        match (route.handler)(self, request) {
            Ok(shape) => shape,
            Err(err) => {
                error!(uri, error = %err, "error during respond");
                ResponseShape::default_error()
            }
        }
    }

    pub(crate) async fn on_read<W: AsyncWrite + Unpin>(
        &self,
        pipeline: &mut Pipeline<W>,
        msg: Inbound,
    ) -> Result<()> {
        match msg {
            Inbound::Head(_) | Inbound::Body(_) => Ok(()),
            Inbound::Last => {
                let Some(request) = pipeline.request() else {
                    debug!("end of request without a head");
                    return Ok(());
                };
                let shape = self.select(request);
                self.emit(pipeline, shape).await
            }
        }
    }

    /// Writes `shape` through the pipeline, waiting out any delayed tail.
    pub(crate) async fn emit<W: AsyncWrite + Unpin>(
        &self,
        pipeline: &mut Pipeline<W>,
        shape: ResponseShape,
    ) -> Result<()> {
        match shape {
            shape @ ResponseShape::Immediate { .. } => {
                for msg in shape.into_messages() {
                    pipeline.write(msg)?;
                }
                pipeline.flush().await
            }
            ResponseShape::ChunkedWithDelayedTail {
                head,
                first,
                tail,
                delay,
            } => {
                pipeline.write(Outbound::Head(head))?;
                pipeline.write(Outbound::Body(first))?;
                pipeline.flush().await?;

                self.scheduler
                    .run_after(delay, async {
                        pipeline.write(Outbound::Body(tail))?;
                        pipeline.write(Outbound::Last)?;
                        pipeline.flush().await
                    })
                    .await
            }
            ResponseShape::BufferedWithDelayedTail {
                head,
                first,
                tail,
                delay,
            } => {
                pipeline.write(Outbound::Head(head))?;
                pipeline.flush().await?;

                self.scheduler
                    .run_after(delay, async {
                        let mut body = BytesMut::with_capacity(first.len() + tail.len());
                        body.extend_from_slice(&first);
                        body.extend_from_slice(&tail);

                        pipeline.write(Outbound::Body(body.freeze()))?;
                        pipeline.write(Outbound::Last)?;
                        pipeline.flush().await
                    })
                    .await
            }
        }
    }
}

// Handlers
impl Dispatcher {
    fn greeting(&self, _: &RequestHead) -> Result<ResponseShape> {
        Ok(self.delayed_chunks(
            Bytes::from_static(GREETING_FIRST.as_bytes()),
            Bytes::from_static(GREETING_TAIL.as_bytes()),
        ))
    }

    fn ig_page(&self, _: &RequestHead) -> Result<ResponseShape> {
        Ok(self.delayed_chunks(self.assets.get(IG_FRAG1)?, self.assets.get(IG_FRAG2)?))
    }

    fn clean_page(&self, request: &RequestHead) -> Result<ResponseShape> {
        let first = self.assets.get(CLEAN_FRAG1)?;
        let tail = self.assets.get(CLEAN_FRAG2)?;

        if !request.uri().contains("chunked=false") {
            return Ok(self.delayed_chunks(first, tail));
        }

        Ok(ResponseShape::BufferedWithDelayedTail {
            head: ResponseHead::new(StatusCode::Ok)
                .header(header::CONTENT_TYPE, "text/html")
                .content_length(first.len() + tail.len()),
            first,
            tail,
            delay: self.scheduler.pause(),
        })
    }

    fn ig_file(&self, request: &RequestHead) -> Result<ResponseShape> {
        let rest = request.uri().strip_prefix(IG_PREFIX).unwrap_or(request.uri());
        self.file(&format!("{}{rest}", AssetStore::ROOT))
    }

    fn clean_file(&self, request: &RequestHead) -> Result<ResponseShape> {
        self.file(&format!("{}{}", AssetStore::ROOT, request.uri()))
    }

    fn favicon(&self, _: &RequestHead) -> Result<ResponseShape> {
        self.file(FAVICON_ASSET)
    }

    fn delayed_chunks(&self, first: Bytes, tail: Bytes) -> ResponseShape {
        ResponseShape::ChunkedWithDelayedTail {
            head: ResponseHead::new(StatusCode::Ok)
                .header(header::CONTENT_TYPE, "text/html")
                .header(header::TRANSFER_ENCODING, header::CHUNKED),
            first,
            tail,
            delay: self.scheduler.pause(),
        }
    }

    fn file(&self, path: &str) -> Result<ResponseShape> {
        let body = self.assets.get(path)?;

        Ok(ResponseShape::Immediate {
            head: ResponseHead::new(StatusCode::Ok)
                .header(header::CONTENT_TYPE, assets::content_type(path))
                .content_length(body.len())
                .header(header::CACHE_CONTROL, CACHE_CONTROL),
            body,
        })
    }
}
