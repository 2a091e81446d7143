pub mod api;
pub mod job;
pub mod validation;

pub use api::{BuildAccepted, CleanupResponse, ErrorBody, HealthResponse};
pub use job::{AppConfig, JobId, JobStatus, JobView};
pub use validation::ValidationError;
