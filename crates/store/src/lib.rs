//! Control-store layer: windowing, task assignment, and the job state
//! machine, expressed as conditional SQL over a shared PostgreSQL store.
//!
//! Every multi-step decision (task cut, object assignment, job claim) runs
//! inside one transaction so that concurrent dispatchers and workers racing
//! against the same store resolve through transactional isolation, not
//! in-process locks.

pub mod buffer;
pub mod db;
pub mod error;
pub mod job;
pub mod tables;
pub mod task;

pub use buffer::ObjectBuffer;
pub use db::init_pg_pool;
pub use error::StoreError;
pub use job::{ClaimedJob, JobRegistry, JobStatus};
pub use tables::{TargetTable, TargetTableRegistry};
pub use task::TaskStore;
