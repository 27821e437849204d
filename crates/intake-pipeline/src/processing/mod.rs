//! Background job lifecycle and progress tracking

mod job_manager;

pub use job_manager::{
    JobControl, JobHandle, JobManager, JobSnapshot, JobState, JobStore, Progress,
};
