use crate::auth::AuthError;
use crate::session::SessionError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("{0}")]
    Session(#[from] SessionError),
    #[error("auth error: {0}")]
    Auth(#[from] AuthError),
    #[error("logging initialization failed: {0}")]
    Logging(String),
    #[error("peer connection not established within {0}s")]
    ConnectTimeout(u64),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}
