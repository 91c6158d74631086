use std::{fmt, future::Future, marker::PhantomData, sync::Arc, time::Duration};

use serde::Serialize;
use specta::Type;

use crate::{
    config::Overrides,
    middleware::{StreamInterceptor, UnaryInterceptor},
    Atom, BoxError, Emitter, RequestContext, StreamError,
};

use super::{
    endpoint::{StreamEndpoint, UnaryEndpoint},
    CacheControl, Endpoint, Input, Procedure, ProcedureKind, Unvalidated,
};

/// Configures a procedure before its handler is attached.
///
/// Interceptors added here run innermost, after the global and service ones.
pub struct ProcedureBuilder<TCtx> {
    interceptors: Vec<UnaryInterceptor<TCtx>>,
    stream_interceptors: Vec<StreamInterceptor<TCtx>>,
    overrides: Overrides,
    cache: Option<CacheControl>,
    validate: bool,
}

impl<TCtx> Default for ProcedureBuilder<TCtx> {
    fn default() -> Self {
        Self {
            interceptors: Vec::new(),
            stream_interceptors: Vec::new(),
            overrides: Overrides::default(),
            cache: None,
            validate: true,
        }
    }
}

impl<TCtx> fmt::Debug for ProcedureBuilder<TCtx> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcedureBuilder")
            .field("overrides", &self.overrides)
            .field("cache", &self.cache)
            .field("validate", &self.validate)
            .finish()
    }
}

impl<TCtx: Send + Sync + 'static> ProcedureBuilder<TCtx> {
    /// Add a unary interceptor. For stream and atom procedures it runs once during setup.
    pub fn with(mut self, interceptor: UnaryInterceptor<TCtx>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    /// Add an interceptor around the event sequence of a stream or atom procedure.
    pub fn with_stream(mut self, interceptor: StreamInterceptor<TCtx>) -> Self {
        self.stream_interceptors.push(interceptor);
        self
    }

    /// Attach `Cache-Control` to successful query responses.
    pub fn cache_control(mut self, cache: CacheControl) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Accept input without running its [`validator`] rules.
    pub fn skip_validation(mut self) -> Self {
        self.validate = false;
        self
    }

    pub fn mask_internal_errors(mut self, mask: bool) -> Self {
        self.overrides.mask_internal_errors = Some(mask);
        self
    }

    pub fn max_body_size(mut self, limit: usize) -> Self {
        self.overrides.max_body_size = Some(limit);
        self
    }

    pub fn keepalive(mut self, interval: Duration) -> Self {
        self.overrides.keepalive = Some(interval);
        self
    }

    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.overrides.write_timeout = Some(timeout);
        self
    }

    /// A cacheable read, served on `GET` with the input in the `input` query parameter.
    pub fn query<F, Fut, I, M, O, E>(self, handler: F) -> Procedure<TCtx>
    where
        F: Fn(RequestContext<TCtx>, I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O, E>> + Send + 'static,
        I: Input<M>,
        M: 'static,
        O: Serialize + Type + 'static,
        E: Into<BoxError> + 'static,
    {
        self.unary(ProcedureKind::Query, handler)
    }

    /// A mutation, served on `POST` with the input as the request body.
    pub fn exec<F, Fut, I, M, O, E>(self, handler: F) -> Procedure<TCtx>
    where
        F: Fn(RequestContext<TCtx>, I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O, E>> + Send + 'static,
        I: Input<M>,
        M: 'static,
        O: Serialize + Type + 'static,
        E: Into<BoxError> + 'static,
    {
        self.unary(ProcedureKind::Exec, handler)
    }

    /// A server push sequence. The handler sends events through its [`Emitter`] until it
    /// returns or the stream closes.
    pub fn stream<F, Fut, I, M, O, E>(self, handler: F) -> Procedure<TCtx>
    where
        F: Fn(RequestContext<TCtx>, I, Emitter<O>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        I: Input<M>,
        M: 'static,
        O: Serialize + Type + 'static,
        E: Into<BoxError> + 'static,
    {
        self.streaming(ProcedureKind::Stream, handler)
    }

    /// Keep clients in sync with `atom`. Each client gets the current value, then every update.
    pub fn atom<T>(self, atom: &Atom<T>) -> Procedure<TCtx>
    where
        T: Serialize + Type + Send + Sync + 'static,
    {
        self.streaming::<_, _, (), Unvalidated, T, StreamError>(ProcedureKind::Atom, atom.handler())
    }

    fn unary<F, Fut, I, M, O, E>(self, kind: ProcedureKind, handler: F) -> Procedure<TCtx>
    where
        F: Fn(RequestContext<TCtx>, I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O, E>> + Send + 'static,
        I: Input<M>,
        M: 'static,
        O: Serialize + Type + 'static,
        E: Into<BoxError> + 'static,
    {
        self.finish(Arc::new(UnaryEndpoint::<F, Fut, I, M, O, E> {
            kind,
            handler,
            phantom: PhantomData,
        }))
    }

    fn streaming<F, Fut, I, M, O, E>(self, kind: ProcedureKind, handler: F) -> Procedure<TCtx>
    where
        F: Fn(RequestContext<TCtx>, I, Emitter<O>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        I: Input<M>,
        M: 'static,
        O: Serialize + Type + 'static,
        E: Into<BoxError> + 'static,
    {
        self.finish(Arc::new(StreamEndpoint::<F, Fut, I, M, O, E> {
            kind,
            handler: Arc::new(handler),
            phantom: PhantomData,
        }))
    }

    fn finish(self, endpoint: Arc<dyn Endpoint<TCtx>>) -> Procedure<TCtx> {
        Procedure {
            endpoint,
            interceptors: self.interceptors,
            stream_interceptors: self.stream_interceptors,
            overrides: self.overrides,
            cache: self.cache,
            validate: self.validate,
        }
    }
}
