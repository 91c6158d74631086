use std::{
    fmt,
    ops::Deref,
    sync::{Arc, Mutex, OnceLock, PoisonError},
};

use http::{header::HeaderName, request::Parts, HeaderMap, HeaderValue};
use tokio_util::sync::CancellationToken;

use crate::{ProcedureKind, Settings, StreamError};

/// The request header a reconnecting client sends its resume token in.
pub const LAST_EVENT_ID: &str = "last-event-id";

/// Identity of a registered procedure.
#[derive(Debug)]
pub(crate) struct Route {
    pub(crate) service: Arc<str>,
    pub(crate) method: Arc<str>,
    pub(crate) path: Arc<str>,
    pub(crate) kind: ProcedureKind,
}

/// Per-call state shared with the stream machinery, independent of the user's context type.
#[derive(Debug)]
pub(crate) struct CallState {
    cancel: CancellationToken,
    close_reason: OnceLock<StreamError>,
    last_event_id: Option<String>,
}

impl CallState {
    pub(crate) fn new(cancel: CancellationToken, last_event_id: Option<String>) -> Self {
        Self {
            cancel,
            close_reason: OnceLock::new(),
            last_event_id,
        }
    }

    pub(crate) fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub(crate) fn last_event_id(&self) -> Option<&str> {
        self.last_event_id.as_deref()
    }

    /// End the call. The first reason recorded is the one handlers observe.
    pub(crate) fn close(&self, reason: StreamError) {
        let _ = self.close_reason.set(reason);
        self.cancel.cancel();
    }

    /// What a handler sees when it sends on a stream that has ended.
    pub(crate) fn close_reason(&self) -> StreamError {
        self.close_reason
            .get()
            .cloned()
            .unwrap_or(StreamError::Closed)
    }
}

/// Everything known about a single call.
///
/// For unary procedures this lives as long as the request. For streams it lives as long as the
/// connection. It is cheap to clone and dereferences to the user's context `TCtx`.
pub struct RequestContext<TCtx> {
    inner: Arc<Inner<TCtx>>,
}

struct Inner<TCtx> {
    ctx: TCtx,
    route: Arc<Route>,
    request: Parts,
    settings: Arc<Settings>,
    call: Arc<CallState>,
    response_headers: Mutex<HeaderMap>,
}

impl<TCtx> Clone for RequestContext<TCtx> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<TCtx> fmt::Debug for RequestContext<TCtx> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("path", &self.path())
            .field("kind", &self.kind())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

impl<TCtx> Deref for RequestContext<TCtx> {
    type Target = TCtx;

    fn deref(&self) -> &Self::Target {
        &self.inner.ctx
    }
}

impl<TCtx> RequestContext<TCtx> {
    pub(crate) fn new(
        ctx: TCtx,
        route: Arc<Route>,
        request: Parts,
        settings: Arc<Settings>,
        cancel: CancellationToken,
    ) -> Self {
        let last_event_id = request
            .headers
            .get(LAST_EVENT_ID)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(str::to_owned);

        Self {
            inner: Arc::new(Inner {
                ctx,
                route,
                request,
                settings,
                call: Arc::new(CallState::new(cancel, last_event_id)),
                response_headers: Mutex::new(HeaderMap::new()),
            }),
        }
    }

    /// The user supplied context.
    pub fn ctx(&self) -> &TCtx {
        &self.inner.ctx
    }

    pub fn service(&self) -> &str {
        &self.inner.route.service
    }

    pub fn method(&self) -> &str {
        &self.inner.route.method
    }

    /// `{Service}/{Method}`
    pub fn path(&self) -> &str {
        &self.inner.route.path
    }

    pub fn kind(&self) -> ProcedureKind {
        self.inner.route.kind
    }

    /// The head of the HTTP request (method, URI, headers and extensions).
    pub fn request(&self) -> &Parts {
        &self.inner.request
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.inner.request.headers
    }

    pub fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    /// The resume token a reconnecting client sent in `Last-Event-ID`, if any.
    pub fn last_event_id(&self) -> Option<&str> {
        self.inner.call.last_event_id()
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.call.cancel.is_cancelled()
    }

    /// Resolves once the call is cancelled: client disconnect, stream shutdown or router shutdown.
    pub async fn cancelled(&self) {
        self.inner.call.cancel.cancelled().await
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.inner.call.cancel.clone()
    }

    /// Add a header to the response. For streams this only has effect during setup, before the
    /// stream headers are sent.
    pub fn insert_response_header(&self, name: HeaderName, value: HeaderValue) {
        self.inner
            .response_headers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name, value);
    }

    pub(crate) fn take_response_headers(&self) -> HeaderMap {
        std::mem::take(
            &mut *self
                .inner
                .response_headers
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        )
    }

    pub(crate) fn call(&self) -> &Arc<CallState> {
        &self.inner.call
    }
}
