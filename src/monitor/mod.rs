pub mod extract;
pub mod registry;
pub mod report;
pub mod router;
pub mod scheduler;
pub mod stats;
pub mod task;

pub use scheduler::Monitor;
