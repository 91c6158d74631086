use std::{fmt, future::Future, marker::PhantomData, sync::Arc};

use futures::{stream, StreamExt};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::task::AbortOnDropHandle;

use crate::{context::CallState, BoxError, Error, StreamError};

use super::{Event, EventStream};

/// The handle a stream handler pushes events to one client through.
///
/// Every send waits until the connection's writer has taken the previous event, so a slow client
/// slows the handler down instead of growing a buffer. Once the stream has ended, for whatever
/// reason, sends fail with the [`StreamError`] that ended it and the handler should return.
///
/// ```rust
/// use rpcflow::{Emitter, RequestContext, StreamError};
///
/// async fn countdown(_: RequestContext<()>, from: u32, tx: Emitter<u32>) -> Result<(), StreamError> {
///     for n in (0..=from).rev() {
///         tx.send(n).await?;
///     }
///     Ok(())
/// }
/// ```
pub struct Emitter<T> {
    tx: mpsc::Sender<Event>,
    call: Arc<CallState>,
    phantom: PhantomData<fn(T)>,
}

impl<T> fmt::Debug for Emitter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Emitter")
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl<T: Serialize> Emitter<T> {
    pub async fn send(&self, event: T) -> Result<(), StreamError> {
        self.emit(None, &event).await
    }

    /// Send an event tagged with a resume token. See [`Emitter::last_event_id`].
    pub async fn send_with_id(&self, id: impl Into<String>, event: T) -> Result<(), StreamError> {
        self.emit(Some(id.into()), &event).await
    }

    pub(crate) async fn emit(&self, id: Option<String>, event: &T) -> Result<(), StreamError> {
        let data =
            serde_json::to_value(event).map_err(|err| StreamError::Encode(Arc::new(err)))?;

        let cancel = self.call.cancel_token();
        if cancel.is_cancelled() {
            return Err(self.call.close_reason());
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(self.call.close_reason()),
            result = self.tx.send(Event::from_parts(id, data)) => {
                result.map_err(|_| self.call.close_reason())
            }
        }
    }
}

impl<T> Emitter<T> {
    /// The resume token the client reconnected with, if any.
    pub fn last_event_id(&self) -> Option<&str> {
        self.call.last_event_id()
    }

    /// Whether the stream has ended and further sends will fail.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed() || self.call.cancel_token().is_cancelled()
    }
}

enum State<F> {
    Idle(F, Arc<CallState>),
    Running {
        rx: mpsc::Receiver<Event>,
        handle: AbortOnDropHandle<Result<(), BoxError>>,
    },
    Done,
}

/// Run a stream handler as a lazy event sequence.
///
/// The handler is spawned when the sequence is first polled. Events it sends are yielded in
/// order. A handler error is yielded after everything it sent before failing, unless it only
/// signals the stream ending. Dropping the sequence aborts the handler task, along with its
/// [`Emitter`] and anything else it holds.
pub(crate) fn emitter_stream<T, F, Fut>(call: Arc<CallState>, handler: F) -> EventStream
where
    T: 'static,
    F: FnOnce(Emitter<T>) -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
{
    stream::unfold(State::Idle(handler, call), |state| async move {
        let (mut rx, handle) = match state {
            State::Idle(handler, call) => {
                let (tx, rx) = mpsc::channel(1);
                let handle = AbortOnDropHandle::new(tokio::spawn(handler(Emitter {
                    tx,
                    call,
                    phantom: PhantomData,
                })));
                (rx, handle)
            }
            State::Running { rx, handle } => (rx, handle),
            State::Done => return None,
        };

        if let Some(event) = rx.recv().await {
            return Some((Ok(event), State::Running { rx, handle }));
        }

        // The emitter is gone so the handler has returned (or handed it off and dropped it).
        match handle.await {
            Ok(Ok(())) => None,
            Ok(Err(err)) if StreamError::is_termination(&*err) => None,
            Ok(Err(err)) => Some((Err(err), State::Done)),
            Err(err) if err.is_cancelled() => None,
            Err(err) => {
                tracing::error!(error = %err, "stream handler panicked");
                Some((
                    Err(Error::internal("stream handler panicked").into()),
                    State::Done,
                ))
            }
        }
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;
    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    use super::*;

    fn call() -> Arc<CallState> {
        Arc::new(CallState::new(CancellationToken::new(), None))
    }

    #[tokio::test]
    async fn yields_events_then_ends() {
        let events = emitter_stream(call(), |tx: Emitter<u32>| async move {
            tx.send(1).await?;
            tx.send_with_id("two", 2).await?;
            Ok(())
        });

        let events: Vec<_> = events.map(|e| e.unwrap()).collect().await;
        assert_eq!(
            events,
            vec![Event::new(json!(1)), Event::new(json!(2)).with_id("two")]
        );
    }

    #[tokio::test]
    async fn handler_errors_follow_sent_events() {
        let events = emitter_stream(call(), |tx: Emitter<u32>| async move {
            tx.send(1).await?;
            Err::<(), BoxError>(Error::not_found("gone").into())
        });

        let items: Vec<_> = events.collect().await;
        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert_eq!(
            items[1]
                .as_ref()
                .unwrap_err()
                .downcast_ref::<Error>()
                .unwrap()
                .code(),
            crate::ErrorCode::NotFound
        );
    }

    #[tokio::test]
    async fn closed_is_not_an_error() {
        let events = emitter_stream(call(), |_: Emitter<u32>| async move {
            Err::<(), BoxError>(StreamError::Closed.into())
        });
        assert_eq!(events.count().await, 0);
    }

    #[tokio::test]
    async fn sends_fail_with_the_close_reason() {
        let call = call();
        let (tx, _rx) = mpsc::channel(1);
        let emitter = Emitter::<u32> {
            tx,
            call: call.clone(),
            phantom: PhantomData,
        };

        call.close(StreamError::WriteTimeout);
        assert!(emitter.is_closed());
        assert!(emitter.send(1).await.unwrap_err().is_write_timeout());
    }

    #[tokio::test]
    async fn exposes_last_event_id() {
        let call = Arc::new(CallState::new(CancellationToken::new(), Some("41".into())));
        let (tx, _rx) = mpsc::channel(1);
        let emitter = Emitter::<u32> {
            tx,
            call,
            phantom: PhantomData,
        };
        assert_eq!(emitter.last_event_id(), Some("41"));
    }
}
