pub mod agent;
pub mod config;
pub mod error;
pub mod platform;
pub mod retry;
pub mod review;
pub mod shutdown;
pub mod workflow;
pub mod workspace;
