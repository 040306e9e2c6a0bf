// src/jobs/mod.rs

pub mod models;
pub mod processor;
pub mod progress;
pub mod service;

// Re-export commonly used items for convenience
pub use models::{Job, JobProgress, JobResults, JobSource, JobStatus, NewJob, SearchType};
pub use processor::{JobProcessor, JobProcessorConfig};
pub use progress::{DynProgressSink, JobProgressSink, NoopProgressSink, ProgressSink};
pub use service::{JobServiceError, SearchJobService};
