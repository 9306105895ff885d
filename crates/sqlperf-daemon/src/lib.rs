//! HTTP daemon for the SQL performance dashboard.

pub mod server;
mod sql;
pub mod telemetry;
