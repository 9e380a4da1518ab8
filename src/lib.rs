pub mod api;
pub mod config;
pub mod control;
pub mod db;
pub mod edge;
pub mod shutdown;
pub mod store;
pub mod telemetry;
