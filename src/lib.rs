//! rpcflow: Typesafe RPC procedures and real-time push streams over HTTP.
//!
//! Procedures are grouped into [`Service`]s on a [`Router`] and addressed as
//! `/{Service}/{Method}`. There are four call shapes:
//!
//!  - **Query**: a cacheable read, served on `GET`.
//!  - **Exec**: a mutation, served on `POST`.
//!  - **Stream**: a server push sequence written as an event stream.
//!  - **Atom**: a shared [`Atom`] value every client is kept in sync with.
//!
//! Every response body is an envelope: `{"result": ...}` on success and
//! `{"error": {"code": ..., "message": ..., "details"?: ...}}` on failure. Streams send one
//! envelope per event.
//!
#![warn(
    clippy::all,
    clippy::cargo,
    clippy::unwrap_used,
    clippy::panic,
    clippy::todo,
    clippy::panic_in_result_fn,
    // missing_docs
)]
#![forbid(unsafe_code)]
#![allow(clippy::module_inception)]
#![cfg_attr(docsrs, feature(doc_cfg))]

mod atom;
mod config;
mod context;
mod dispatch;
mod error;
mod router;
mod transform;

pub mod middleware;
pub mod procedure;
pub mod stream;

pub use atom::{Atom, Subscription};
pub use config::{Config, Settings, DEFAULT_KEEPALIVE, DEFAULT_MAX_BODY_SIZE};
pub use context::{RequestContext, LAST_EVENT_ID};
pub use dispatch::{Reply, StreamReply};
pub use error::{BoxError, DecodeError, Envelope, Error, ErrorCode, StreamError, MASKED_MESSAGE};
pub use procedure::{CacheControl, Procedure, ProcedureKind};
pub use router::{BuildError, BuiltRouter, Router, Service};
pub use stream::{Emitter, Event, StreamOutcome};
pub use transform::{default_transform, ErrorTransformer};
