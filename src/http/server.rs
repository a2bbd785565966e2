//! HTTP server setup.
//!
//! # Responsibilities
//! - Build the Axum router for the two download routes
//! - Wire up middleware (request ID, tracing)
//! - Spawn one producer task per stream and hand its response head to Axum
//!
//! # Routes
//! - `GET /test`: synthetic sequence, one key per line
//! - `GET /`: CSV export of the configured table, mounted only when
//!   storage is available

use std::num::NonZeroUsize;
use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderName, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use tokio_util::sync::CancellationToken;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::Instrument;

use crate::config::{ServerConfig, StreamingConfig};
use crate::lifecycle::inflight::InFlightTracker;
use crate::storage::{RowSource, SequenceSource};
use crate::streaming::{
    ChannelSink, DelimitedEncoder, LineEncoder, PageCursor, StreamEncoder, StreamingHandler,
};

const REQUEST_ID_HEADER: &str = "x-request-id";

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub streaming: Arc<StreamingConfig>,
    pub store: Option<Arc<dyn RowSource>>,
    pub sequence: Arc<SequenceSource>,
    pub page_size: NonZeroUsize,
    pub sequence_page_size: NonZeroUsize,
    pub sequence_handler: Arc<StreamingHandler<LineEncoder>>,
    pub export_handler: Arc<StreamingHandler<DelimitedEncoder>>,
    /// Parent of every per-stream token. Cancelled only when the grace
    /// period runs out.
    pub streams: CancellationToken,
    pub tracker: InFlightTracker,
}

/// HTTP front end: a router plus the handles the supervisor needs to
/// drain it.
pub struct HttpServer {
    router: Router,
    streams: CancellationToken,
    tracker: InFlightTracker,
}

impl HttpServer {
    /// `store` is `None` when storage is disabled or failed to open; the
    /// export route is then left unmounted.
    pub fn new(config: &ServerConfig, store: Option<Arc<dyn RowSource>>) -> Self {
        let streaming = &config.streaming;

        let mut header = Vec::with_capacity(config.storage.columns.len() + 1);
        header.push(config.storage.key_column.clone());
        header.extend(config.storage.columns.iter().cloned());

        let state = AppState {
            streaming: Arc::new(streaming.clone()),
            store,
            sequence: Arc::new(SequenceSource::new(streaming.sequence_length)),
            page_size: page_size("streaming.page_size", streaming.page_size),
            sequence_page_size: page_size(
                "streaming.sequence_page_size",
                streaming.sequence_page_size,
            ),
            sequence_handler: Arc::new(StreamingHandler::new(
                "/test",
                LineEncoder,
                &streaming.sequence_filename,
            )),
            export_handler: Arc::new(StreamingHandler::new(
                "/",
                DelimitedEncoder::csv(header),
                &streaming.export_filename,
            )),
            streams: CancellationToken::new(),
            tracker: InFlightTracker::new(),
        };

        let streams = state.streams.clone();
        let tracker = state.tracker.clone();
        let router = Self::build_router(state);
        Self {
            router,
            streams,
            tracker,
        }
    }

    fn build_router(state: AppState) -> Router {
        let mut router = Router::new().route("/test", get(sequence_route));
        if state.store.is_some() {
            router = router.route("/", get(export_route));
        } else {
            tracing::warn!("Storage unavailable, export route not mounted");
        }

        let request_id = HeaderName::from_static(REQUEST_ID_HEADER);
        router
            .with_state(state)
            .layer(TraceLayer::new_for_http())
            .layer(PropagateRequestIdLayer::new(request_id.clone()))
            .layer(SetRequestIdLayer::new(request_id, MakeRequestUuid))
    }

    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub fn tracker(&self) -> &InFlightTracker {
        &self.tracker
    }

    pub fn into_parts(self) -> (Router, CancellationToken, InFlightTracker) {
        (self.router, self.streams, self.tracker)
    }
}

/// Validated configs never hold zero; a hand-built one is clamped to a
/// single row per page.
fn page_size(field: &'static str, rows: usize) -> NonZeroUsize {
    NonZeroUsize::new(rows).unwrap_or_else(|| {
        tracing::warn!(field, "Page size of zero, using 1");
        NonZeroUsize::MIN
    })
}

async fn sequence_route(State(state): State<AppState>) -> Response {
    let source: Arc<dyn RowSource> = state.sequence.clone();
    let cursor = PageCursor::new(source, state.sequence_page_size);
    let handler = Arc::clone(&state.sequence_handler);
    spawn_stream(&state, "/test", handler, cursor).await
}

async fn export_route(State(state): State<AppState>) -> Response {
    let Some(store) = state.store.clone() else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let cursor = PageCursor::new(store, state.page_size);
    let handler = Arc::clone(&state.export_handler);
    spawn_stream(&state, "/", handler, cursor).await
}

/// Run `handler` on its own task and wait only for the response head.
///
/// The producer keeps writing after this returns; Axum pulls the body from
/// the sink's channel.
async fn spawn_stream<E>(
    state: &AppState,
    route: &'static str,
    handler: Arc<StreamingHandler<E>>,
    cursor: PageCursor,
) -> Response
where
    E: StreamEncoder + 'static,
{
    let (sink, head) = ChannelSink::new(state.streaming.channel_capacity);
    let token = state.streams.child_token();
    let guard = state.tracker.track();
    let span = tracing::info_span!("stream", stream_id = %guard.id(), route);

    tracing::info!(parent: &span, "Stream started");
    tokio::spawn(
        async move {
            let _guard = guard;
            handler.execute(cursor, sink, token).await;
        }
        .instrument(span),
    );

    match head.await {
        Ok(response) => response,
        Err(_) => {
            tracing::error!(route, "Stream task ended without a response");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
