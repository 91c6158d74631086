use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;

use crate::{procedure::Payload, stream::EventStream, BoxError, RequestContext};

use super::{Next, StreamInterceptor, StreamNext, UnaryInterceptor};

pub(crate) type UnaryFn<TCtx> = Arc<
    dyn Fn(RequestContext<TCtx>, Payload) -> BoxFuture<'static, Result<Value, BoxError>>
        + Send
        + Sync,
>;

pub(crate) type StreamFn<TCtx> =
    Arc<dyn Fn(RequestContext<TCtx>, Payload) -> EventStream + Send + Sync>;

/// Fold `interceptors` around `terminal`. The first interceptor ends up outermost.
pub(crate) fn compose_unary<TCtx: 'static>(
    interceptors: &[UnaryInterceptor<TCtx>],
    terminal: UnaryFn<TCtx>,
) -> UnaryFn<TCtx> {
    interceptors
        .iter()
        .rev()
        .fold(terminal, |next, interceptor| {
            let handler = interceptor.handler.clone();
            Arc::new(move |ctx: RequestContext<TCtx>, input: Payload| {
                handler(
                    ctx,
                    input,
                    Next {
                        inner: next.clone(),
                    },
                )
            })
        })
}

/// Fold `interceptors` around `terminal`. The first interceptor ends up outermost.
pub(crate) fn compose_stream<TCtx: 'static>(
    interceptors: &[StreamInterceptor<TCtx>],
    terminal: StreamFn<TCtx>,
) -> StreamFn<TCtx> {
    interceptors
        .iter()
        .rev()
        .fold(terminal, |next, interceptor| {
            let handler = interceptor.handler.clone();
            Arc::new(move |ctx: RequestContext<TCtx>, input: Payload| {
                handler(
                    ctx,
                    input,
                    StreamNext {
                        inner: next.clone(),
                    },
                )
            })
        })
}
