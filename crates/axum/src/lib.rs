//! Serve an [rpcflow](rpcflow) router from an [Axum](https://docs.rs/axum/latest/axum/) HTTP server.
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
#![cfg_attr(docsrs, feature(doc_cfg))]

mod endpoint;

pub use endpoint::{Endpoint, DEFAULT_BUFFER_SIZE};
