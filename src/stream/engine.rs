use std::{fmt, future, io, sync::Arc, time::Duration};

use futures::StreamExt;
use tokio::{
    io::{AsyncWrite, AsyncWriteExt},
    sync::mpsc,
    time::{Instant, Interval, MissedTickBehavior},
};

use crate::{context::CallState, transform::report, BoxError, Settings, StreamError};

use super::{disconnect::is_disconnect, wire, EventStream};

/// How a push stream ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOutcome {
    /// The event sequence ended.
    Completed,
    /// The sequence failed and a terminal error frame was written.
    Failed,
    /// The call was cancelled: client disconnect seen by the transport or router shutdown.
    Cancelled,
    /// The client stopped draining the connection.
    WriteTimeout,
    /// A write found the client gone.
    Disconnected,
    /// A write failed for some other reason.
    WriteFailed,
}

impl fmt::Display for StreamOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::WriteTimeout => "write timeout",
            Self::Disconnected => "disconnected",
            Self::WriteFailed => "write failed",
        })
    }
}

enum WriteFailure {
    Timeout,
    Io(io::Error),
}

/// Drive `events` onto `writer` until the sequence ends, the call is cancelled or the client
/// stops keeping up.
///
/// A background task pulls the sequence and hands each item over through a single slot, so the
/// handler can never get more than one event ahead of the writer. Every exit cancels the call,
/// which stops the puller and fails any send the handler is blocked on.
pub(crate) async fn pump<W>(
    events: EventStream,
    call: Arc<CallState>,
    settings: Arc<Settings>,
    path: Arc<str>,
    mut writer: W,
) -> StreamOutcome
where
    W: AsyncWrite + Unpin + Send,
{
    let cancel = call.cancel_token().clone();
    // The pump future being dropped counts as the client going away.
    let _guard = cancel.clone().drop_guard();

    let (tx, mut rx) = mpsc::channel::<Result<_, BoxError>>(1);
    let puller = tokio::spawn({
        let cancel = cancel.clone();
        let mut events = events;
        async move {
            loop {
                let item = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    item = events.next() => item,
                };
                let Some(item) = item else { break };
                let last = item.is_err();

                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    sent = tx.send(item) => if sent.is_err() { break },
                }
                if last {
                    break;
                }
            }
        }
    });

    let write_timeout = settings.write_timeout();
    let mut keepalive = settings.keepalive().and_then(keepalive_interval);

    let outcome = loop {
        let frame = tokio::select! {
            biased;
            _ = cancel.cancelled() => break StreamOutcome::Cancelled,
            item = rx.recv() => match item {
                None => break StreamOutcome::Completed,
                Some(Ok(event)) => match wire::encode_event(&event) {
                    Ok(frame) => frame,
                    Err(err) => {
                        let err = StreamError::Encode(Arc::new(err));
                        break fail(&mut writer, &settings, &path, write_timeout, err.into()).await;
                    }
                },
                Some(Err(err)) if StreamError::is_termination(&*err) => break StreamOutcome::Completed,
                Some(Err(err)) => break fail(&mut writer, &settings, &path, write_timeout, err).await,
            },
            _ = tick(&mut keepalive) => bytes::Bytes::from_static(wire::KEEPALIVE),
        };

        if let Err(failure) = write(&mut writer, &frame, write_timeout).await {
            break on_write_failure(&call, &path, failure);
        }
        if let Some(keepalive) = &mut keepalive {
            keepalive.reset();
        }
    };

    call.close(StreamError::Closed);
    if let Err(err) = puller.await {
        tracing::error!(procedure = %path, error = %err, "stream puller panicked");
    }

    tracing::debug!(procedure = %path, %outcome, "stream ended");
    outcome
}

/// `None` when the period is too long to schedule, which is as good as never ticking.
fn keepalive_interval(period: Duration) -> Option<Interval> {
    // Resetting after a write schedules `now + period` again, so leave headroom for that.
    let now = Instant::now();
    now.checked_add(period.checked_mul(2)?)?;

    let mut interval = tokio::time::interval_at(now.checked_add(period)?, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    Some(interval)
}

async fn tick(keepalive: &mut Option<Interval>) {
    match keepalive {
        Some(interval) => {
            interval.tick().await;
        }
        None => future::pending().await,
    }
}

async fn write<W>(writer: &mut W, frame: &[u8], timeout: Option<Duration>) -> Result<(), WriteFailure>
where
    W: AsyncWrite + Unpin,
{
    let write = async {
        writer.write_all(frame).await?;
        writer.flush().await
    };

    match timeout {
        Some(timeout) => tokio::time::timeout(timeout, write)
            .await
            .map_err(|_| WriteFailure::Timeout)?
            .map_err(WriteFailure::Io),
        None => write.await.map_err(WriteFailure::Io),
    }
}

/// Report a failed sequence to the client with one terminal error frame.
async fn fail<W>(
    writer: &mut W,
    settings: &Settings,
    path: &str,
    timeout: Option<Duration>,
    err: BoxError,
) -> StreamOutcome
where
    W: AsyncWrite + Unpin,
{
    let err = report(
        settings.transformer.as_ref(),
        settings.mask_internal_errors(),
        path,
        err,
    );

    if let Err(failure) = write(writer, &wire::encode_error(&err), timeout).await {
        match failure {
            WriteFailure::Timeout => {
                tracing::debug!(procedure = path, "timed out writing stream error frame")
            }
            WriteFailure::Io(err) => {
                tracing::debug!(procedure = path, error = %err, "error writing stream error frame")
            }
        }
    }
    StreamOutcome::Failed
}

fn on_write_failure(call: &CallState, path: &str, failure: WriteFailure) -> StreamOutcome {
    match failure {
        WriteFailure::Timeout => {
            tracing::warn!(procedure = path, "client is not draining the stream, closing it");
            call.close(StreamError::WriteTimeout);
            StreamOutcome::WriteTimeout
        }
        WriteFailure::Io(err) if is_disconnect(&err) => {
            tracing::debug!(procedure = path, error = %err, "client disconnected");
            StreamOutcome::Disconnected
        }
        WriteFailure::Io(err) => {
            tracing::warn!(procedure = path, error = %err, "error writing to stream");
            StreamOutcome::WriteFailed
        }
    }
}

#[cfg(test)]
mod tests {
    use futures::stream;
    use serde_json::json;
    use tokio::io::AsyncReadExt;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::{config::Overrides, stream::Event, Config, Error};

    fn settings(config: Config) -> Arc<Settings> {
        Arc::new(Settings::resolve(
            &config,
            &Overrides::default(),
            &Overrides::default(),
        ))
    }

    fn call() -> Arc<CallState> {
        Arc::new(CallState::new(CancellationToken::new(), None))
    }

    async fn run(events: EventStream, config: Config) -> (StreamOutcome, String) {
        let (writer, mut reader) = tokio::io::duplex(1024);
        let outcome = pump(events, call(), settings(config), "Test/Run".into(), writer).await;

        let mut out = String::new();
        reader.read_to_string(&mut out).await.unwrap();
        (outcome, out)
    }

    #[tokio::test]
    async fn writes_events_in_order() {
        let events: EventStream = stream::iter([
            Ok(Event::new(json!(1))),
            Ok(Event::new(json!(2)).with_id("b")),
        ])
        .boxed();

        let (outcome, out) = run(events, Config::new()).await;
        assert_eq!(outcome, StreamOutcome::Completed);
        assert_eq!(
            out,
            "data: {\"result\":1}\n\nid: b\ndata: {\"result\":2}\n\n"
        );
    }

    #[tokio::test]
    async fn errors_end_with_one_frame() {
        let events: EventStream = stream::iter([
            Ok(Event::new(json!(1))),
            Err(Error::permission_denied("revoked").into()),
            Ok(Event::new(json!(2))),
        ])
        .boxed();

        let (outcome, out) = run(events, Config::new()).await;
        assert_eq!(outcome, StreamOutcome::Failed);
        assert_eq!(
            out,
            "data: {\"result\":1}\n\ndata: {\"error\":{\"code\":\"permission_denied\",\"message\":\"revoked\"}}\n\n"
        );
    }

    #[tokio::test]
    async fn closed_sentinel_writes_nothing() {
        let events: EventStream = stream::iter([
            Ok(Event::new(json!(1))),
            Err(StreamError::Closed.into()),
        ])
        .boxed();

        let (outcome, out) = run(events, Config::new()).await;
        assert_eq!(outcome, StreamOutcome::Completed);
        assert_eq!(out, "data: {\"result\":1}\n\n");
    }

    #[tokio::test]
    async fn internal_errors_are_masked() {
        let events: EventStream = stream::iter([Err("connection string leaked".into())]).boxed();

        let (_, out) = run(events, Config::new()).await;
        assert!(!out.contains("leaked"));
        assert!(out.contains("\"internal error\""));
    }

    #[tokio::test(start_paused = true)]
    async fn idle_streams_get_keepalives() {
        let events: EventStream = stream::pending().boxed();
        let (writer, mut reader) = tokio::io::duplex(1024);
        let call = call();
        let task = tokio::spawn(pump(
            events,
            call.clone(),
            settings(Config::new().keepalive(Duration::from_secs(1))),
            "Test/Idle".into(),
            writer,
        ));

        let mut buf = [0u8; wire::KEEPALIVE.len()];
        reader.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, wire::KEEPALIVE);

        call.cancel_token().cancel();
        assert_eq!(task.await.unwrap(), StreamOutcome::Cancelled);
    }

    #[tokio::test]
    async fn unschedulable_keepalive_is_disabled() {
        let events: EventStream = stream::iter([Ok(Event::new(json!(1)))]).boxed();

        let (outcome, out) = run(events, Config::new().keepalive(Duration::MAX)).await;
        assert_eq!(outcome, StreamOutcome::Completed);
        assert_eq!(out, "data: {\"result\":1}\n\n");
    }

    #[tokio::test]
    async fn slow_clients_time_out() {
        let events: EventStream = stream::repeat_with(|| Ok(Event::new(json!("x".repeat(64))))).boxed();
        // Nobody reads, so the pipe fills and the next write stalls.
        let (writer, _reader) = tokio::io::duplex(16);
        let call = call();

        let outcome = pump(
            events,
            call.clone(),
            settings(Config::new().write_timeout(Duration::from_millis(20))),
            "Test/Slow".into(),
            writer,
        )
        .await;

        assert_eq!(outcome, StreamOutcome::WriteTimeout);
        assert!(call.close_reason().is_write_timeout());
    }

    #[tokio::test]
    async fn dropped_readers_disconnect() {
        let events: EventStream = stream::repeat_with(|| Ok(Event::new(json!(1)))).boxed();
        let (writer, reader) = tokio::io::duplex(64);
        drop(reader);

        let outcome = pump(events, call(), settings(Config::new()), "Test/Gone".into(), writer).await;
        assert_eq!(outcome, StreamOutcome::Disconnected);
    }
}
