//! Interceptors: cross-cutting logic composed around procedures.
//!
//! A [`UnaryInterceptor`] wraps a single request → response call. A [`StreamInterceptor`] wraps a
//! whole event sequence. Both receive the call's [`RequestContext`](crate::RequestContext), the
//! erased [`Payload`](crate::procedure::Payload) and a `next` handle for the rest of the chain.
//!
//! Interceptors are registered globally on the [`Router`](crate::Router), per
//! [`Service`](crate::Service) and per procedure. They are composed once when the router is
//! built: global first, then service, then procedure, with the first registered running
//! outermost.
//!
//! For stream and atom procedures the unary interceptors run once during setup, before any event
//! is sent, so they can be used to gate the connection (eg. authentication).

mod chain;
mod logging;
mod stream;
mod unary;

pub use logging::{logging, stream_logging};
pub use stream::{StreamInterceptor, StreamNext};
pub use unary::{Next, UnaryInterceptor};

pub(crate) use chain::{compose_stream, compose_unary, StreamFn, UnaryFn};
