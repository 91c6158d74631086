//! Serving calls: decode, run the interceptor chain, invoke and encode.

use std::{fmt, sync::Arc};

use bytes::Bytes;
use futures::FutureExt;
use http::{header, HeaderMap, HeaderValue, Request, Response, StatusCode};
use http_body::Body;
use http_body_util::{BodyExt, LengthLimitError, Limited};
use serde_json::Value;
use specta::TypeMap;
use tokio::io::AsyncWrite;
use tokio_util::sync::CancellationToken;

use crate::{
    context::{CallState, Route},
    middleware::{compose_stream, compose_unary, StreamFn, StreamInterceptor, UnaryFn, UnaryInterceptor},
    procedure::{CacheControl, Endpoint, Metadata, Payload, RawInput, Terminal},
    stream::{self, wire, EventStream, StreamOutcome},
    transform::report,
    BoxError, BuiltRouter, DecodeError, Envelope, Error, ProcedureKind, RequestContext, Settings,
};

const JSON: &str = "application/json";

enum Chain<TCtx> {
    Unary(UnaryFn<TCtx>),
    Stream {
        setup: UnaryFn<TCtx>,
        events: StreamFn<TCtx>,
    },
}

/// A procedure with its settings resolved and its interceptors composed.
pub(crate) struct Compiled<TCtx> {
    route: Arc<Route>,
    settings: Arc<Settings>,
    pub(crate) metadata: Metadata,
    cache: Option<CacheControl>,
    validate: bool,
    endpoint: Arc<dyn Endpoint<TCtx>>,
    chain: Chain<TCtx>,
}

impl<TCtx: Send + Sync + 'static> Compiled<TCtx> {
    pub(crate) fn new(
        route: Arc<Route>,
        settings: Arc<Settings>,
        interceptors: &[UnaryInterceptor<TCtx>],
        stream_interceptors: &[StreamInterceptor<TCtx>],
        procedure: &crate::Procedure<TCtx>,
        types: &mut TypeMap,
    ) -> Self {
        let interceptors = [interceptors, &procedure.interceptors[..]].concat();

        let chain = match procedure.endpoint.clone().terminal() {
            Terminal::Unary(terminal) => Chain::Unary(compose_unary(&interceptors, terminal)),
            Terminal::Stream(terminal) => {
                let stream_interceptors =
                    [stream_interceptors, &procedure.stream_interceptors[..]].concat();
                // Setup interceptors gate the connection, the handler runs in the stream chain.
                let noop: UnaryFn<TCtx> = Arc::new(|_: RequestContext<TCtx>, _: Payload| {
                    async { Ok::<_, BoxError>(Value::Null) }.boxed()
                });

                Chain::Stream {
                    setup: compose_unary(&interceptors, noop),
                    events: compose_stream(&stream_interceptors, terminal),
                }
            }
        };

        Self {
            metadata: procedure.endpoint.metadata(types),
            route,
            settings,
            cache: procedure.cache,
            validate: procedure.validate,
            endpoint: procedure.endpoint.clone(),
            chain,
        }
    }
}

impl<TCtx: Send + Sync + 'static> BuiltRouter<TCtx> {
    /// Serve a request addressed by its path, `/{Service}/{Method}`.
    pub async fn handle<B>(&self, req: Request<B>, ctx: TCtx) -> Reply
    where
        B: Body + Send,
        B::Data: Send,
        B::Error: Into<BoxError>,
    {
        let path = req.uri().path().trim_start_matches('/');
        let Some((service, method)) = path.split_once('/').filter(|(_, m)| !m.contains('/')) else {
            let err = Error::not_found(format!("no procedure at '/{path}'"));
            return self.reject(path, err.into());
        };

        let (service, method) = (service.to_owned(), method.to_owned());
        self.dispatch(&service, &method, req, ctx).await
    }

    /// Serve a request for the procedure `method` of `service`.
    ///
    /// Read-style procedures (query, stream, atom) must be called with `GET` and take their input
    /// from the `input` query parameter. Exec procedures must be called with `POST` and take their
    /// input from the body.
    pub async fn dispatch<B>(&self, service: &str, method: &str, req: Request<B>, ctx: TCtx) -> Reply
    where
        B: Body + Send,
        B::Data: Send,
        B::Error: Into<BoxError>,
    {
        let path = format!("{service}/{method}");
        let Some(procedure) = self.inner.procedures.get(&path) else {
            let err = Error::not_found(format!("no procedure '{path}'"));
            return self.reject(&path, err.into());
        };

        let kind = procedure.route.kind;
        if req.method() != kind.http_method() {
            let err = DecodeError::Method {
                method: req.method().clone(),
                kind,
            };
            return procedure.reject(err.into());
        }

        let (parts, body) = req.into_parts();

        let input = if kind.is_read() {
            let raw = RawInput::from_query(parts.uri.query());
            procedure
                .endpoint
                .decode(RawInput::Query(raw.as_deref()), procedure.validate)
        } else {
            match read_body(body, procedure.settings.max_body_size()).await {
                Ok(body) => procedure
                    .endpoint
                    .decode(RawInput::Body(&body), procedure.validate),
                Err(err) => Err(err.into()),
            }
        };
        let input = match input {
            Ok(input) => input,
            Err(err) => return procedure.reject(err),
        };

        let ctx = RequestContext::new(
            ctx,
            procedure.route.clone(),
            parts,
            procedure.settings.clone(),
            self.inner.shutdown.child_token(),
        );

        match &procedure.chain {
            Chain::Unary(chain) => procedure.unary(chain, ctx, input).await,
            Chain::Stream { setup, events } => procedure.stream(setup, events, ctx, input).await,
        }
    }

    fn reject(&self, path: &str, err: BoxError) -> Reply {
        let settings = &self.inner.fallback;
        let err = report(
            settings.transformer.as_ref(),
            settings.mask_internal_errors(),
            path,
            err,
        );
        Reply::Unary(error_response(&err, HeaderMap::new()))
    }
}

impl<TCtx: Send + Sync + 'static> Compiled<TCtx> {
    async fn unary(&self, chain: &UnaryFn<TCtx>, ctx: RequestContext<TCtx>, input: Payload) -> Reply {
        let result = chain(ctx.clone(), input).await;
        let mut headers = ctx.take_response_headers();

        let value = match result {
            Ok(value) => value,
            Err(err) => return Reply::Unary(error_response(&self.report(err), headers)),
        };

        let body = match serde_json::to_vec(&Envelope::Result(value)) {
            Ok(body) => body,
            Err(err) => return Reply::Unary(error_response(&self.report(err.into()), headers)),
        };

        if self.route.kind == ProcedureKind::Query {
            if let Some(cache) = &self.cache {
                headers.insert(header::CACHE_CONTROL, cache.header_value());
            }
        }
        Reply::Unary(json_response(StatusCode::OK, body, headers))
    }

    async fn stream(
        &self,
        setup: &UnaryFn<TCtx>,
        events: &StreamFn<TCtx>,
        ctx: RequestContext<TCtx>,
        input: Payload,
    ) -> Reply {
        if let Err(err) = setup(ctx.clone(), input.clone()).await {
            let headers = ctx.take_response_headers();
            return Reply::Unary(error_response(&self.report(err), headers));
        }

        let mut headers = ctx.take_response_headers();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(wire::CONTENT_TYPE));
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
        headers.insert("x-accel-buffering", HeaderValue::from_static("no"));

        Reply::Stream(StreamReply {
            headers,
            events: events(ctx.clone(), input),
            call: ctx.call().clone(),
            settings: self.settings.clone(),
            path: self.route.path.clone(),
        })
    }

    fn report(&self, err: BoxError) -> Error {
        report(
            self.settings.transformer.as_ref(),
            self.settings.mask_internal_errors(),
            &self.route.path,
            err,
        )
    }

    fn reject(&self, err: BoxError) -> Reply {
        Reply::Unary(error_response(&self.report(err), HeaderMap::new()))
    }
}

async fn read_body<B>(body: B, limit: usize) -> Result<Bytes, DecodeError>
where
    B: Body,
    B::Error: Into<BoxError>,
{
    match Limited::new(body, limit).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(err) if err.downcast_ref::<LengthLimitError>().is_some() => {
            Err(DecodeError::BodyTooLarge { limit })
        }
        Err(err) => Err(DecodeError::Body(err)),
    }
}

fn json_response(status: StatusCode, body: Vec<u8>, headers: HeaderMap) -> Response<Bytes> {
    let mut response = Response::new(Bytes::from(body));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static(JSON));
    response
}

fn error_response(err: &Error, headers: HeaderMap) -> Response<Bytes> {
    let status = StatusCode::from_u16(err.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = serde_json::to_vec(&Envelope::<()>::Error(err.clone())).unwrap_or_else(|_| {
        br#"{"error":{"code":"internal","message":"internal error"}}"#.to_vec()
    });
    json_response(status, body, headers)
}

/// The outcome of dispatching a call.
#[derive(Debug)]
pub enum Reply {
    /// A complete response: a unary result, or an error from any procedure kind.
    Unary(Response<Bytes>),
    /// An event stream whose setup succeeded. The transport sends the headers and then drives
    /// [`StreamReply::pump`].
    Stream(StreamReply),
}

impl Reply {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unary(response) => response.status(),
            Self::Stream(_) => StatusCode::OK,
        }
    }

    /// The unary response, if this is one.
    pub fn into_unary(self) -> Option<Response<Bytes>> {
        match self {
            Self::Unary(response) => Some(response),
            Self::Stream(_) => None,
        }
    }

    pub fn into_stream(self) -> Option<StreamReply> {
        match self {
            Self::Unary(_) => None,
            Self::Stream(stream) => Some(stream),
        }
    }
}

/// An open event stream, waiting to be written to the client.
pub struct StreamReply {
    headers: HeaderMap,
    events: EventStream,
    call: Arc<CallState>,
    settings: Arc<Settings>,
    path: Arc<str>,
}

impl fmt::Debug for StreamReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamReply")
            .field("path", &self.path)
            .field("headers", &self.headers)
            .finish()
    }
}

impl StreamReply {
    /// The response headers to send before the first event.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Cancel this to end the stream, eg. when the transport sees the client disconnect.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.call.cancel_token().clone()
    }

    /// Write events to `writer` until the stream ends. See [`StreamOutcome`].
    pub async fn pump<W>(self, writer: W) -> StreamOutcome
    where
        W: AsyncWrite + Unpin + Send,
    {
        stream::pump(self.events, self.call, self.settings, self.path, writer).await
    }
}
