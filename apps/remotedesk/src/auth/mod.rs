//! Device authorization against the application API. The approved app token is
//! only handed back to the caller, never stored.

pub mod config;
pub mod error;
pub mod gate;

pub use config::AuthConfig;
pub use error::AuthError;
pub use gate::{DeviceApproval, DeviceAuthClient, DevicePoll, DeviceStartResponse};
