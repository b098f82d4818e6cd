pub mod client;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod shutdown;
pub mod task;
pub mod worker;
