use url::Url;

use crate::auth::error::AuthError;

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub api_base: Url,
}

impl AuthConfig {
    pub fn new(api_base: &str) -> Result<Self, AuthError> {
        let api_base = Url::parse(api_base.trim())
            .map_err(|err| AuthError::Config(format!("invalid api base '{api_base}': {err}")))?;
        if !matches!(api_base.scheme(), "http" | "https") {
            return Err(AuthError::Config(format!(
                "api base must be http or https, got {}",
                api_base.scheme()
            )));
        }
        Ok(Self { api_base })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_http_bases() {
        let config = AuthConfig::new("https://ruoshui.fun.vercel.app").unwrap();
        assert_eq!(config.api_base.host_str(), Some("ruoshui.fun.vercel.app"));
    }

    #[test]
    fn rejects_other_schemes() {
        assert!(matches!(
            AuthConfig::new("wss://relay.example.com"),
            Err(AuthError::Config(_))
        ));
        assert!(AuthConfig::new("not a url").is_err());
    }
}
