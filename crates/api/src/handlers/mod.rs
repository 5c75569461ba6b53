pub mod projects;
pub mod runs;
pub mod status;
pub mod workflows;
