//! Turn pipeline: search, context assembly, generation, persistence.

pub mod emitter;
pub mod turn;

pub use emitter::EventSink;
pub use turn::{run_turn, TurnInput};
