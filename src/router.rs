use std::{
    borrow::Cow,
    collections::{btree_map::Entry, BTreeMap},
    fmt,
    sync::Arc,
};

use specta::TypeMap;
use tokio_util::sync::CancellationToken;

use crate::{
    config::Overrides,
    context::Route,
    dispatch::Compiled,
    middleware::{StreamInterceptor, UnaryInterceptor},
    procedure::Metadata,
    Config, Procedure, Settings,
};

/// Problems found while building a [`Router`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum BuildError {
    #[error("invalid name '{0}': names must be non-empty and must not contain '/'")]
    InvalidName(String),
    #[error("service '{0}' is registered more than once")]
    DuplicateService(String),
    #[error("procedure '{0}' is registered more than once")]
    DuplicateProcedure(String),
}

/// A group of procedures served under `/{Service}/...`.
///
/// Settings and interceptors set here apply to every procedure of the service.
pub struct Service<TCtx = ()> {
    overrides: Overrides,
    interceptors: Vec<UnaryInterceptor<TCtx>>,
    stream_interceptors: Vec<StreamInterceptor<TCtx>>,
    procedures: Vec<(Cow<'static, str>, Procedure<TCtx>)>,
}

impl<TCtx> Default for Service<TCtx> {
    fn default() -> Self {
        Self {
            overrides: Overrides::default(),
            interceptors: Vec::new(),
            stream_interceptors: Vec::new(),
            procedures: Vec::new(),
        }
    }
}

impl<TCtx: 'static> fmt::Debug for Service<TCtx> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Service")
            .field("overrides", &self.overrides)
            .field("procedures", &self.procedures)
            .finish()
    }
}

impl<TCtx> Service<TCtx> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn procedure(mut self, method: impl Into<Cow<'static, str>>, procedure: Procedure<TCtx>) -> Self {
        self.procedures.push((method.into(), procedure));
        self
    }

    pub fn with(mut self, interceptor: UnaryInterceptor<TCtx>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    pub fn with_stream(mut self, interceptor: StreamInterceptor<TCtx>) -> Self {
        self.stream_interceptors.push(interceptor);
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

    pub fn keepalive(mut self, interval: std::time::Duration) -> Self {
        self.overrides.keepalive = Some(interval);
        self
    }

    pub fn write_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.overrides.write_timeout = Some(timeout);
        self
    }
}

/// The registry of every service and procedure.
///
/// ```rust
/// use rpcflow::{Procedure, Router, Service};
///
/// let router = Router::<()>::new()
///     .service(
///         "Greeter",
///         Service::new().procedure(
///             "Hello",
///             Procedure::builder().query(|_, name: String| async move {
///                 Ok::<_, rpcflow::Error>(format!("Hello, {name}!"))
///             }),
///         ),
///     )
///     .build()
///     .unwrap();
///
/// assert_eq!(router.procedures().count(), 1);
/// ```
pub struct Router<TCtx = ()> {
    config: Config,
    interceptors: Vec<UnaryInterceptor<TCtx>>,
    stream_interceptors: Vec<StreamInterceptor<TCtx>>,
    services: Vec<(Cow<'static, str>, Service<TCtx>)>,
}

impl<TCtx> Default for Router<TCtx> {
    fn default() -> Self {
        Self {
            config: Config::default(),
            interceptors: Vec::new(),
            stream_interceptors: Vec::new(),
            services: Vec::new(),
        }
    }
}

impl<TCtx: 'static> fmt::Debug for Router<TCtx> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router")
            .field("config", &self.config)
            .field("services", &self.services)
            .finish()
    }
}

impl<TCtx: Send + Sync + 'static> Router<TCtx> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Add a unary interceptor to every procedure. Global interceptors run outermost.
    pub fn with(mut self, interceptor: UnaryInterceptor<TCtx>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    /// Add a stream interceptor to every stream and atom procedure.
    pub fn with_stream(mut self, interceptor: StreamInterceptor<TCtx>) -> Self {
        self.stream_interceptors.push(interceptor);
        self
    }

    pub fn service(mut self, name: impl Into<Cow<'static, str>>, service: Service<TCtx>) -> Self {
        self.services.push((name.into(), service));
        self
    }

    /// Resolve every procedure's settings and compose its interceptor chains.
    pub fn build(self) -> Result<BuiltRouter<TCtx>, BuildError> {
        let mut types = TypeMap::default();
        let mut procedures = BTreeMap::new();
        let mut seen = Vec::<&str>::new();

        for (service_name, service) in &self.services {
            check_name(service_name)?;
            if seen.contains(&&**service_name) {
                return Err(BuildError::DuplicateService(service_name.to_string()));
            }
            seen.push(service_name);

            let interceptors = [&self.interceptors[..], &service.interceptors[..]].concat();
            let stream_interceptors =
                [&self.stream_interceptors[..], &service.stream_interceptors[..]].concat();

            for (method, procedure) in &service.procedures {
                check_name(method)?;
                let path = format!("{service_name}/{method}");

                let Entry::Vacant(entry) = procedures.entry(path.clone()) else {
                    return Err(BuildError::DuplicateProcedure(path));
                };

                let route = Arc::new(Route {
                    service: Arc::from(&**service_name),
                    method: Arc::from(&**method),
                    path: path.into(),
                    kind: procedure.kind(),
                });
                let settings =
                    Settings::resolve(&self.config, &service.overrides, &procedure.overrides);

                entry.insert(Compiled::new(
                    route,
                    Arc::new(settings),
                    &interceptors,
                    &stream_interceptors,
                    procedure,
                    &mut types,
                ));
            }
        }

        let fallback = Settings::resolve(&self.config, &Overrides::default(), &Overrides::default());
        tracing::debug!(procedures = procedures.len(), "router built");

        Ok(BuiltRouter {
            inner: Arc::new(RouterInner {
                procedures,
                types,
                fallback: Arc::new(fallback),
                shutdown: CancellationToken::new(),
            }),
        })
    }
}

fn check_name(name: &str) -> Result<(), BuildError> {
    if name.is_empty() || name.contains('/') {
        return Err(BuildError::InvalidName(name.to_owned()));
    }
    Ok(())
}

/// A built [`Router`], ready to serve calls. Cheap to clone.
pub struct BuiltRouter<TCtx = ()> {
    pub(crate) inner: Arc<RouterInner<TCtx>>,
}

pub(crate) struct RouterInner<TCtx> {
    pub(crate) procedures: BTreeMap<String, Compiled<TCtx>>,
    pub(crate) types: TypeMap,
    /// Used for failures that happen before a procedure is found.
    pub(crate) fallback: Arc<Settings>,
    pub(crate) shutdown: CancellationToken,
}

impl<TCtx> Clone for BuiltRouter<TCtx> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<TCtx> fmt::Debug for BuiltRouter<TCtx> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuiltRouter")
            .field("procedures", &self.inner.procedures.keys())
            .finish()
    }
}

impl<TCtx> BuiltRouter<TCtx> {
    /// Every procedure by `{Service}/{Method}` path, in path order.
    pub fn procedures(&self) -> impl Iterator<Item = (&str, &Metadata)> {
        self.inner
            .procedures
            .iter()
            .map(|(path, procedure)| (path.as_str(), &procedure.metadata))
    }

    pub fn get(&self, path: &str) -> Option<&Metadata> {
        self.inner
            .procedures
            .get(path)
            .map(|procedure| &procedure.metadata)
    }

    /// Named types referenced by the procedures' [`Metadata`].
    pub fn types(&self) -> &TypeMap {
        &self.inner.types
    }

    /// Cancel every in-flight call. Open streams end and handlers' sends start failing.
    pub fn shutdown(&self) {
        tracing::debug!("router shutting down");
        self.inner.shutdown.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }
}
