pub mod error;
pub mod log_buffer;
pub mod project;
pub mod registry;
pub mod run;
pub mod types;
pub mod workflow;
