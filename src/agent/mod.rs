//! Agent runtime: the shared turn loop and the top-level orchestrator.

pub mod orchestrator;
pub mod turn_loop;

pub use orchestrator::{CHAT_FAILED_MESSAGE, Orchestrator};
pub use turn_loop::{BUDGET_EXHAUSTED_MESSAGE, TurnLoop, TurnOutcome, TurnTally};
