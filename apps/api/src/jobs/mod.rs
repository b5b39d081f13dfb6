// Generation jobs: the queued work item, the enqueue-side dispatcher, the
// bounded worker pool, and the runner with its retry policy.

pub mod dispatcher;
pub mod queue;
pub mod request;
pub mod retry;
pub mod runner;

#[cfg(test)]
mod tests;

pub use dispatcher::{Accepted, DispatchError, Dispatcher};
pub use queue::{spawn_workers, JobQueue};
pub use request::{ActiveBatches, GenerationRequest, UseCase};
pub use runner::{JobError, JobOutcome, JobRunner};
