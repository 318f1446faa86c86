pub mod auth;
pub mod config;
pub mod peer;
pub mod protocol;
pub mod session;
pub mod signaling;
pub mod telemetry;
pub mod terminal;
pub mod transport;
