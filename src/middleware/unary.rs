use std::{fmt, future::Future, sync::Arc};

use futures::{future::BoxFuture, FutureExt};
use serde_json::Value;

use crate::{procedure::Payload, BoxError, RequestContext};

use super::UnaryFn;

type InterceptFn<TCtx> = Arc<
    dyn Fn(RequestContext<TCtx>, Payload, Next<TCtx>) -> BoxFuture<'static, Result<Value, BoxError>>
        + Send
        + Sync,
>;

/// Wraps a single request → response call.
///
/// ```rust
/// use rpcflow::{middleware::UnaryInterceptor, Error};
///
/// struct Ctx {
///     user: Option<String>,
/// }
///
/// let auth = UnaryInterceptor::<Ctx>::new(|ctx, input, next| async move {
///     if ctx.user.is_none() {
///         return Err(Error::unauthenticated("sign in first").into());
///     }
///
///     next.run(ctx, input).await
/// });
/// ```
pub struct UnaryInterceptor<TCtx> {
    pub(super) handler: InterceptFn<TCtx>,
}

impl<TCtx> Clone for UnaryInterceptor<TCtx> {
    fn clone(&self) -> Self {
        Self {
            handler: self.handler.clone(),
        }
    }
}

impl<TCtx> fmt::Debug for UnaryInterceptor<TCtx> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnaryInterceptor").finish()
    }
}

impl<TCtx: Send + Sync + 'static> UnaryInterceptor<TCtx> {
    pub fn new<F, Fut>(handler: F) -> Self
    where
        F: Fn(RequestContext<TCtx>, Payload, Next<TCtx>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, BoxError>> + Send + 'static,
    {
        Self {
            handler: Arc::new(
                move |ctx: RequestContext<TCtx>, input: Payload, next: Next<TCtx>| {
                    handler(ctx, input, next).boxed()
                },
            ),
        }
    }
}

/// The remainder of a unary chain.
pub struct Next<TCtx> {
    pub(super) inner: UnaryFn<TCtx>,
}

impl<TCtx> fmt::Debug for Next<TCtx> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Next").finish()
    }
}

impl<TCtx> Next<TCtx> {
    /// Run the rest of the chain, ending in the handler.
    ///
    /// The result is the handler's encoded response.
    pub async fn run(self, ctx: RequestContext<TCtx>, input: Payload) -> Result<Value, BoxError> {
        (self.inner)(ctx, input).await
    }
}
