pub mod job_monitor;
pub mod job_registry;
