pub mod config;
pub mod error;
pub mod events;
pub mod forms;
pub mod search;
pub mod telemetry;
