use std::{future::Future, marker::PhantomData, sync::Arc};

use futures::{stream, FutureExt, StreamExt};
use serde::Serialize;
use specta::{Generics, Type, TypeMap};

use crate::{
    middleware::{StreamFn, UnaryFn},
    stream::emitter_stream,
    BoxError, Emitter, RequestContext,
};

use super::{
    input::{decode, RawInput},
    Input, Metadata, Payload, ProcedureKind,
};

/// The innermost callable of a procedure, before interceptors are composed around it.
pub(crate) enum Terminal<TCtx> {
    Unary(UnaryFn<TCtx>),
    Stream(StreamFn<TCtx>),
}

/// A registered handler with its input and output types erased.
///
/// There is one implementation per call shape family, each generic over the handler's input and
/// output types.
pub(crate) trait Endpoint<TCtx>: Send + Sync + 'static {
    fn kind(&self) -> ProcedureKind;

    fn metadata(&self, types: &mut TypeMap) -> Metadata;

    /// Deserialize and validate the raw input into the handler's input type.
    fn decode(&self, input: RawInput<'_>, validate: bool) -> Result<Payload, BoxError>;

    fn terminal(self: Arc<Self>) -> Terminal<TCtx>;
}

fn metadata<I: Type, O: Type>(kind: ProcedureKind, types: &mut TypeMap) -> Metadata {
    Metadata {
        kind,
        input: I::inline(types, Generics::Definition),
        output: O::inline(types, Generics::Definition),
    }
}

/// A [`ProcedureKind::Query`] or [`ProcedureKind::Exec`] handler.
pub(crate) struct UnaryEndpoint<F, Fut, I, M, O, E> {
    pub(crate) kind: ProcedureKind,
    pub(crate) handler: F,
    pub(crate) phantom: PhantomData<fn() -> (Fut, I, M, O, E)>,
}

impl<TCtx, F, Fut, I, M, O, E> Endpoint<TCtx> for UnaryEndpoint<F, Fut, I, M, O, E>
where
    TCtx: Send + Sync + 'static,
    F: Fn(RequestContext<TCtx>, I) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<O, E>> + Send + 'static,
    I: Input<M>,
    M: 'static,
    O: Serialize + Type + 'static,
    E: Into<BoxError> + 'static,
{
    fn kind(&self) -> ProcedureKind {
        self.kind
    }

    fn metadata(&self, types: &mut TypeMap) -> Metadata {
        metadata::<I, O>(self.kind, types)
    }

    fn decode(&self, input: RawInput<'_>, validate: bool) -> Result<Payload, BoxError> {
        decode::<I, M>(input, validate).map(Payload::new)
    }

    fn terminal(self: Arc<Self>) -> Terminal<TCtx> {
        Terminal::Unary(Arc::new(move |ctx: RequestContext<TCtx>, input: Payload| {
            let this = self.clone();
            async move {
                let input = input.take::<I>()?;
                let output = (this.handler)(ctx, input)
                    .await
                    .map_err(Into::<BoxError>::into)?;
                Ok::<_, BoxError>(serde_json::to_value(output)?)
            }
            .boxed()
        }))
    }
}

/// A [`ProcedureKind::Stream`] or [`ProcedureKind::Atom`] handler.
pub(crate) struct StreamEndpoint<F, Fut, I, M, O, E> {
    pub(crate) kind: ProcedureKind,
    pub(crate) handler: Arc<F>,
    pub(crate) phantom: PhantomData<fn() -> (Fut, I, M, O, E)>,
}

impl<TCtx, F, Fut, I, M, O, E> Endpoint<TCtx> for StreamEndpoint<F, Fut, I, M, O, E>
where
    TCtx: Send + Sync + 'static,
    F: Fn(RequestContext<TCtx>, I, Emitter<O>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
    I: Input<M>,
    M: 'static,
    O: Serialize + Type + 'static,
    E: Into<BoxError> + 'static,
{
    fn kind(&self) -> ProcedureKind {
        self.kind
    }

    fn metadata(&self, types: &mut TypeMap) -> Metadata {
        metadata::<I, O>(self.kind, types)
    }

    fn decode(&self, input: RawInput<'_>, validate: bool) -> Result<Payload, BoxError> {
        decode::<I, M>(input, validate).map(Payload::new)
    }

    fn terminal(self: Arc<Self>) -> Terminal<TCtx> {
        Terminal::Stream(Arc::new(move |ctx: RequestContext<TCtx>, input: Payload| {
            let input = match input.take::<I>() {
                Ok(input) => input,
                Err(err) => return stream::once(async move { Err(err) }).boxed(),
            };

            let handler = self.handler.clone();
            let call = ctx.call().clone();
            emitter_stream(call, move |tx: Emitter<O>| async move {
                handler(ctx, input, tx).await.map_err(Into::<BoxError>::into)
            })
        }))
    }
}
