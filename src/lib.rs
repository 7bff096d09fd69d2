pub mod checkpoint;
pub mod collector;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod latency;
pub mod signal;
pub mod transform;
pub mod types;
