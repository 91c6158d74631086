use std::{fmt, sync::Arc};

use crate::{
    config::Overrides,
    middleware::{StreamInterceptor, UnaryInterceptor},
};

use super::{CacheControl, Endpoint, ProcedureBuilder, ProcedureKind};

/// A single handler along with its interceptors and settings, ready to be added to a
/// [`Service`](crate::Service).
pub struct Procedure<TCtx = ()> {
    pub(crate) endpoint: Arc<dyn Endpoint<TCtx>>,
    pub(crate) interceptors: Vec<UnaryInterceptor<TCtx>>,
    pub(crate) stream_interceptors: Vec<StreamInterceptor<TCtx>>,
    pub(crate) overrides: Overrides,
    pub(crate) cache: Option<CacheControl>,
    pub(crate) validate: bool,
}

impl<TCtx: 'static> fmt::Debug for Procedure<TCtx> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Procedure")
            .field("kind", &self.endpoint.kind())
            .field("interceptors", &self.interceptors.len())
            .field("stream_interceptors", &self.stream_interceptors.len())
            .field("cache", &self.cache)
            .field("validate", &self.validate)
            .finish()
    }
}

impl<TCtx: Send + Sync + 'static> Procedure<TCtx> {
    /// Construct a new procedure using [`ProcedureBuilder`].
    pub fn builder() -> ProcedureBuilder<TCtx> {
        ProcedureBuilder::default()
    }
}

impl<TCtx: 'static> Procedure<TCtx> {
    pub fn kind(&self) -> ProcedureKind {
        self.endpoint.kind()
    }
}
