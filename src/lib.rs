pub mod autosave;
pub mod board;
pub mod config;
pub mod errors;
pub mod ordering;
pub mod store;
pub mod telemetry;
