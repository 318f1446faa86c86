use std::env;

use crate::peer::IceServerConfig;
use crate::peer::agent::DEFAULT_STUN_SERVER;
use crate::telemetry::is_truthy;

pub const DEFAULT_API_BASE: &str = "https://ruoshui.fun.vercel.app";

/// Application configuration read from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Base URL of the application API used for device authorization.
    pub api_base: String,
    pub ice_servers: Vec<IceServerConfig>,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        let api_base = non_empty("REMOTEDESK_API_BASE")
            .map(|value| value.trim().trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string());

        let disable_stun = non_empty("REMOTEDESK_WEBRTC_DISABLE_STUN").is_some_and(|value| is_truthy(&value));
        let urls: Vec<String> = match non_empty("REMOTEDESK_ICE_SERVERS") {
            Some(list) => split_urls(&list),
            None if disable_stun => Vec::new(),
            None => vec![DEFAULT_STUN_SERVER.to_string()],
        };
        let username = non_empty("REMOTEDESK_ICE_USERNAME");
        let credential = non_empty("REMOTEDESK_ICE_CREDENTIAL");

        Self {
            api_base,
            ice_servers: build_ice_servers(urls, username, credential),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            ice_servers: vec![IceServerConfig::default_stun()],
        }
    }
}

fn split_urls(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|url| !url.is_empty())
        .map(str::to_string)
        .collect()
}

/// One server entry per URL; TURN URLs get the shared credentials.
pub fn build_ice_servers(
    urls: Vec<String>,
    username: Option<String>,
    credential: Option<String>,
) -> Vec<IceServerConfig> {
    urls.into_iter()
        .map(|url| {
            let is_turn = url.starts_with("turn:") || url.starts_with("turns:");
            let server = IceServerConfig::new(vec![url]);
            match (&username, &credential) {
                (Some(username), Some(credential)) if is_turn => {
                    server.with_credentials(username.clone(), credential.clone())
                }
                _ => server,
            }
        })
        .collect()
}
