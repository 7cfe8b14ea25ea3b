mod call_context;
mod request_simulator;

pub use call_context::{CallContext, SimulationError};
pub use request_simulator::{RequestSimulator, MAX_COMPLEXITY, MAX_PROCESSED_CHARS, MIN_COMPLEXITY};
