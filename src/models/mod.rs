pub mod job;
pub mod stats;

pub use job::{Job, JobStatus};
pub use stats::{unix_timestamp, ProcessSnapshot, ResourceSample, SystemSnapshot, Timestamped};
