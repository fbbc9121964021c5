// Turning signals into orders, one bot cycle at a time
pub mod executor;
pub mod pipeline;
pub mod scheduler;

pub use executor::{order_size, plan, protective_exit, ExecutionAction, ExecutionDecision, ExitReason};
pub use pipeline::{CycleOutcome, Pipeline};
pub use scheduler::{Scheduler, TickSummary};
