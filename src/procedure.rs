//! Defining procedures.
//!
//! A procedure is built with [`Procedure::builder`] and one of its terminal methods, which fixes
//! the call shape ([`ProcedureKind`]):
//!
//! ```rust
//! use rpcflow::{Error, Procedure};
//!
//! let hello = <Procedure>::builder().query(|_ctx, name: String| async move {
//!     if name.is_empty() {
//!         return Err(Error::invalid_argument("name is required"));
//!     }
//!
//!     Ok(format!("Hello, {name}!"))
//! });
//! ```

mod builder;
mod cache;
mod endpoint;
mod input;
mod kind;
mod meta;
mod payload;
#[allow(clippy::module_inception)]
mod procedure;

pub use builder::ProcedureBuilder;
pub use cache::CacheControl;
pub use input::{Input, Unvalidated, Validated};
pub use kind::ProcedureKind;
pub use meta::Metadata;
pub use payload::Payload;
pub use procedure::Procedure;

pub(crate) use endpoint::{Endpoint, Terminal};
pub(crate) use input::RawInput;
