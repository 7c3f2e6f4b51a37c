pub mod config;
pub mod pki;
pub mod server;
pub mod setup;
pub mod telemetry;
