//! Push streams: turning a handler's lazy event sequence into the event-stream wire format.

mod disconnect;
mod emitter;
mod engine;
mod event;
pub(crate) mod wire;

pub use emitter::Emitter;
pub use engine::StreamOutcome;
pub use event::{Event, EventStream};

pub(crate) use emitter::emitter_stream;
pub(crate) use engine::pump;
