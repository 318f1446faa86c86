use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("config error: {0}")]
    Config(String),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{context} failed: {message}")]
    Gateway {
        context: &'static str,
        message: String,
    },
    #[error("authorization request was denied")]
    AuthorizationDenied,
    #[error("device code expired before the login completed")]
    Expired,
}
