//! Page-level work: the job runner executed by pool workers and the
//! cancellation registry it consults between steps.

pub mod cancellation;
pub mod runner;

pub use cancellation::CancellationRegistry;
pub use runner::{PageJobRunner, RunnerConfig};
