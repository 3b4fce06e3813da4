pub mod queue;
pub mod scheduler;

pub use queue::GroupQueues;
pub use scheduler::{EnqueueOutcome, Scheduler};
