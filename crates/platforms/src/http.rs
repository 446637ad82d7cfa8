use reqwest::Client;
use rustls::{ClientConfig, crypto::aws_lc_rs};
use rustls_platform_verifier::BuilderVerifierExt;
use std::sync::Arc;
use std::time::Duration;

use crate::danmaku::{DanmakuError, Result};

pub const DEFAULT_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36";

/// Mobile Safari UA, for endpoints that only serve the H5 share pages.
pub const MOBILE_UA: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 16_6 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/16.6 Mobile/15E148 Safari/604.1";

/// Build the shared HTTP client used for room lookups, catalogs and avatars.
pub fn default_client() -> Result<Client> {
    let provider = Arc::new(aws_lc_rs::default_provider());
    let tls_config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| DanmakuError::connection(format!("TLS protocol versions: {e}")))?
        .with_platform_verifier()
        .map_err(|e| DanmakuError::connection(format!("TLS verifier: {e}")))?
        .with_no_client_auth();

    Ok(Client::builder()
        .use_preconfigured_tls(tls_config)
        .user_agent(DEFAULT_UA)
        .timeout(Duration::from_secs(15))
        .build()?)
}

/// Find a cookie set by the response.
pub fn set_cookie_value(headers: &reqwest::header::HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(reqwest::header::SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .filter_map(|cookie| cookie.split(';').next()?.split_once('='))
        .find(|(key, value)| key.trim() == name && !value.trim().is_empty())
        .map(|(_, value)| value.trim().to_string())
}
