pub mod config;
pub mod error;
pub mod signing;
pub mod telemetry;
