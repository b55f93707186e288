pub mod job;
pub mod pool;

pub use job::{
    JobHandler, JobQueue, PageArtifacts, PageJob, PageJobResult, PageOutcome,
};
pub use pool::WorkerPool;
