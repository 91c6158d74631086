use std::{
    pin::Pin,
    task::{Context, Poll},
    time::Instant,
};

use futures::Stream;
use pin_project_lite::pin_project;

use crate::{stream::Event, BoxError, RequestContext};

use super::{StreamInterceptor, UnaryInterceptor};

/// Log the start, end and duration of every call at `debug` level.
pub fn logging<TCtx: Send + Sync + 'static>() -> UnaryInterceptor<TCtx> {
    UnaryInterceptor::new(|ctx: RequestContext<TCtx>, input, next| async move {
        let start = Instant::now();
        let path = ctx.path().to_owned();
        let kind = ctx.kind();
        tracing::debug!(procedure = %path, %kind, "call started");

        let result = next.run(ctx, input).await;
        tracing::debug!(
            procedure = %path,
            %kind,
            ok = result.is_ok(),
            elapsed = ?start.elapsed(),
            "call finished"
        );
        result
    })
}

/// Log how many events a stream produced and how long it was open, once it ends.
pub fn stream_logging<TCtx: Send + Sync + 'static>() -> StreamInterceptor<TCtx> {
    StreamInterceptor::new(|ctx: RequestContext<TCtx>, input, next| {
        let log = StreamLog {
            path: ctx.path().to_owned(),
            start: Instant::now(),
            events: 0,
            errors: 0,
        };
        tracing::debug!(procedure = %log.path, "stream opened");

        Logged {
            inner: next.run(ctx, input),
            log,
        }
    })
}

pin_project! {
    struct Logged<S> {
        #[pin]
        inner: S,
        log: StreamLog,
    }
}

impl<S> Stream for Logged<S>
where
    S: Stream<Item = Result<Event, BoxError>>,
{
    type Item = S::Item;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();
        let item = this.inner.poll_next(cx);
        match &item {
            Poll::Ready(Some(Ok(_))) => this.log.events += 1,
            Poll::Ready(Some(Err(_))) => this.log.errors += 1,
            _ => {}
        }
        item
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

struct StreamLog {
    path: String,
    start: Instant,
    events: u64,
    errors: u64,
}

// Runs when the transport drops the sequence, which covers disconnects as well as clean ends.
impl Drop for StreamLog {
    fn drop(&mut self) {
        tracing::debug!(
            procedure = %self.path,
            events = self.events,
            errors = self.errors,
            elapsed = ?self.start.elapsed(),
            "stream closed"
        );
    }
}
