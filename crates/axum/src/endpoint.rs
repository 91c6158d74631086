use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Path, Request},
    http::request::Parts,
    response::{IntoResponse, Response},
    routing::any,
};
use futures::StreamExt;
use rpcflow::{BuiltRouter, Reply, StreamReply};
use tokio_util::io::ReaderStream;

/// Bytes of encoded events buffered between a stream and its client.
///
/// A client that falls this far behind makes the next write wait, which is what the write timeout
/// measures.
pub const DEFAULT_BUFFER_SIZE: usize = 16 * 1024;

/// Construct a new [`axum::Router`](axum::Router) to expose a given [`rpcflow::BuiltRouter`].
///
/// Every procedure is served at `/{Service}/{Method}`: `GET` for queries, streams and atoms and
/// `POST` for execs. Other methods and paths get the router's JSON error envelope rather than an
/// empty axum response.
pub struct Endpoint<TCtx> {
    router: BuiltRouter<TCtx>,
    buffer_size: usize,
}

impl<TCtx: Send + Sync + 'static> Endpoint<TCtx> {
    /// Construct a new [`axum::Router`](axum::Router) with the default settings.
    ///
    /// # Usage
    ///
    /// ```rust
    /// axum::Router::<()>::new().nest(
    ///     "/rpc",
    ///     rpcflow_axum::Endpoint::new(rpcflow::Router::<()>::new().build().unwrap(), |_| ()),
    /// );
    /// ```
    pub fn new<S>(
        router: BuiltRouter<TCtx>,
        ctx_fn: impl Fn(&Parts) -> TCtx + Send + Sync + 'static,
    ) -> axum::Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        Self::builder(router).build(ctx_fn)
    }

    pub fn builder(router: BuiltRouter<TCtx>) -> Self {
        Self {
            router,
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }

    /// See [`DEFAULT_BUFFER_SIZE`].
    pub fn buffer_size(self, buffer_size: usize) -> Self {
        Self {
            buffer_size: buffer_size.max(1),
            ..self
        }
    }

    /// Build an [`axum::Router`](axum::Router), building the context of each call with `ctx_fn`.
    pub fn build<S>(
        self,
        ctx_fn: impl Fn(&Parts) -> TCtx + Send + Sync + 'static,
    ) -> axum::Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        let ctx_fn = Arc::new(ctx_fn);
        let router = self.router;
        let buffer_size = self.buffer_size;

        let handler = {
            let ctx_fn = ctx_fn.clone();
            let router = router.clone();
            move |Path((service, method)): Path<(String, String)>, req: Request| {
                let ctx_fn = ctx_fn.clone();
                let router = router.clone();
                async move {
                    let (parts, body) = req.into_parts();
                    let ctx = (ctx_fn)(&parts);

                    let reply = router
                        .dispatch(&service, &method, Request::from_parts(parts, body), ctx)
                        .await;
                    respond(reply, buffer_size)
                }
            }
        };

        let fallback = move |req: Request| {
            let ctx_fn = ctx_fn.clone();
            let router = router.clone();
            async move {
                let (parts, body) = req.into_parts();
                let ctx = (ctx_fn)(&parts);

                let reply = router.handle(Request::from_parts(parts, body), ctx).await;
                respond(reply, buffer_size)
            }
        };

        axum::Router::new()
            .route("/:service/:method", any(handler))
            .fallback(fallback)
    }
}

fn respond(reply: Reply, buffer_size: usize) -> Response {
    match reply {
        Reply::Unary(response) => response.map(Body::from).into_response(),
        Reply::Stream(stream) => stream_response(stream, buffer_size),
    }
}

/// Send the stream headers now and pump events into the body from a background task.
fn stream_response(stream: StreamReply, buffer_size: usize) -> Response {
    let (writer, reader) = tokio::io::duplex(buffer_size);

    // Hyper drops the body when the client goes away, which ends the stream.
    let guard = stream.cancellation_token().drop_guard();
    let body = ReaderStream::new(reader).map(move |chunk| {
        let _guard = &guard;
        chunk
    });

    let mut response = Response::new(Body::from_stream(body));
    *response.headers_mut() = stream.headers().clone();

    tokio::spawn(async move {
        let outcome = stream.pump(writer).await;
        tracing::trace!(%outcome, "stream response finished");
    });

    response
}
