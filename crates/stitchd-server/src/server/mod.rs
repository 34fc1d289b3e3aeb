pub mod config;
pub mod listener;
pub mod pool;
pub mod service;
pub mod telemetry;
