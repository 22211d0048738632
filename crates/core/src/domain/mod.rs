pub mod error;
pub mod job;
pub mod machine;
pub mod report;
pub mod settings;
pub mod wire;
