pub mod container;
pub mod host;
pub mod teardown;
pub mod tunnel;
pub mod workflow;
