use std::{fmt, sync::Arc};

use futures::{Stream, StreamExt};

use crate::{
    procedure::Payload,
    stream::{Event, EventStream},
    BoxError, RequestContext,
};

use super::StreamFn;

type InterceptFn<TCtx> =
    Arc<dyn Fn(RequestContext<TCtx>, Payload, StreamNext<TCtx>) -> EventStream + Send + Sync>;

/// Wraps the event sequence of a stream or atom procedure.
///
/// The sequence returned by `next` is lazy. An interceptor can map, filter or count events as
/// they pass and must stop pulling (drop the sequence) when its own consumer stops.
///
/// ```rust
/// use futures::StreamExt;
/// use rpcflow::middleware::StreamInterceptor;
///
/// // Only forward the first 100 events of any stream.
/// let limit = StreamInterceptor::<()>::new(|ctx, input, next| next.run(ctx, input).take(100));
/// ```
pub struct StreamInterceptor<TCtx> {
    pub(super) handler: InterceptFn<TCtx>,
}

impl<TCtx> Clone for StreamInterceptor<TCtx> {
    fn clone(&self) -> Self {
        Self {
            handler: self.handler.clone(),
        }
    }
}

impl<TCtx> fmt::Debug for StreamInterceptor<TCtx> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamInterceptor").finish()
    }
}

impl<TCtx: Send + Sync + 'static> StreamInterceptor<TCtx> {
    pub fn new<F, S>(handler: F) -> Self
    where
        F: Fn(RequestContext<TCtx>, Payload, StreamNext<TCtx>) -> S + Send + Sync + 'static,
        S: Stream<Item = Result<Event, BoxError>> + Send + 'static,
    {
        Self {
            handler: Arc::new(
                move |ctx: RequestContext<TCtx>, input: Payload, next: StreamNext<TCtx>| {
                    handler(ctx, input, next).boxed()
                },
            ),
        }
    }
}

/// The remainder of a stream chain.
pub struct StreamNext<TCtx> {
    pub(super) inner: StreamFn<TCtx>,
}

impl<TCtx> fmt::Debug for StreamNext<TCtx> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamNext").finish()
    }
}

impl<TCtx> StreamNext<TCtx> {
    /// The event sequence produced by the rest of the chain. Nothing runs until it is polled.
    pub fn run(self, ctx: RequestContext<TCtx>, input: Payload) -> EventStream {
        (self.inner)(ctx, input)
    }
}
