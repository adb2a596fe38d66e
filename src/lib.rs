pub mod catalog;
pub mod config;
pub mod dates;
pub mod executor;
pub mod humanize;
pub mod listing;
pub mod plan;
pub mod pool;
pub mod session;
pub mod task;
