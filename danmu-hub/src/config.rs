//! Command line and environment configuration.
//!
//! Every option can also be set through the environment; `.env` is loaded
//! before parsing.

use clap::Parser;
use danmu_platforms::danmaku::WebSocketProviderConfig;
use std::path::PathBuf;
use std::time::Duration;

use crate::api::ServerConfig;
use crate::listener::ListenerManagerConfig;
use crate::logging::{DEFAULT_LOG_FILTER, LogFormat};
use crate::proxy::ImageProxyConfig;

#[derive(Debug, Clone, Parser)]
#[command(name = "danmu-hub", version, about = "Live chat aggregator for Chinese streaming platforms")]
pub struct Config {
    /// Real-time WebSocket endpoint host
    #[arg(long, env = "WS_HOST", default_value = "127.0.0.1")]
    pub ws_host: String,

    #[arg(long, env = "WS_PORT", default_value_t = 7777)]
    pub ws_port: u16,

    /// Control API host
    #[arg(long, env = "API_HOST", default_value = "127.0.0.1")]
    pub api_host: String,

    #[arg(long, env = "API_PORT", default_value_t = 8080)]
    pub api_port: u16,

    /// Serve the image proxy and rewrite image URLs through it
    #[arg(long, env = "USE_PROXY")]
    pub use_proxy: bool,

    #[arg(long, env = "PROXY_HOST", default_value = "127.0.0.1")]
    pub proxy_host: String,

    #[arg(long, env = "PROXY_PORT", default_value_t = 8888)]
    pub proxy_port: u16,

    /// Use https in rewritten image URLs
    #[arg(long, env = "PROXY_HTTPS")]
    pub proxy_https: bool,

    /// CORS allow-list, `*` allows any origin
    #[arg(long, env = "ALLOWED_ORIGINS", value_delimiter = ',', default_value = "*")]
    pub allowed_origins: Vec<String>,

    /// Bearer token required on /api/v1
    #[arg(long, env = "AUTH_TOKEN")]
    pub auth_token: Option<String>,

    /// Log filter directive, overridden by RUST_LOG
    #[arg(long, env = "LOG_FILTER", default_value = DEFAULT_LOG_FILTER)]
    pub log_filter: String,

    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,

    /// Also write daily rolling log files here
    #[arg(long, env = "LOG_DIR")]
    pub log_dir: Option<PathBuf>,

    /// Huya relay helper command, with `{room}` and `{port}` placeholders
    #[arg(long, env = "HUYA_HELPER")]
    pub huya_helper: Option<String>,

    /// How long a start request waits for the first connection. Connects
    /// still retrying when it elapses are reported as timeouts.
    #[arg(long, default_value_t = 10)]
    pub start_timeout_secs: u64,

    #[arg(long, default_value_t = 5)]
    pub stop_timeout_secs: u64,

    /// Connection attempts before a listener gives up
    #[arg(long, default_value_t = 5)]
    pub reconnect_attempts: u32,

    #[arg(long, default_value_t = 5000)]
    pub reconnect_delay_ms: u64,
}

impl Config {
    pub fn api_server(&self) -> ServerConfig {
        ServerConfig::new(self.api_host.as_str(), self.api_port)
    }

    pub fn ws_server(&self) -> ServerConfig {
        ServerConfig::new(self.ws_host.as_str(), self.ws_port)
    }

    pub fn proxy_server(&self) -> ServerConfig {
        ServerConfig::new(self.proxy_host.as_str(), self.proxy_port)
    }

    pub fn image_proxy(&self) -> ImageProxyConfig {
        ImageProxyConfig {
            enabled: self.use_proxy,
            host: self.proxy_host.clone(),
            port: self.proxy_port,
            https: self.proxy_https,
        }
    }

    pub fn websocket(&self) -> WebSocketProviderConfig {
        WebSocketProviderConfig {
            max_reconnect_attempts: self.reconnect_attempts.max(1),
            base_reconnect_delay_ms: self.reconnect_delay_ms,
            max_reconnect_delay_ms: self.reconnect_delay_ms,
        }
    }

    /// Total back-off the initial connect may sleep through before giving up.
    pub fn initial_retry_window(&self) -> Duration {
        let websocket = self.websocket();
        (1..websocket.max_reconnect_attempts)
            .map(|attempt| websocket.backoff(attempt))
            .sum()
    }

    pub fn listener_manager(&self) -> ListenerManagerConfig {
        ListenerManagerConfig {
            start_timeout: Duration::from_secs(self.start_timeout_secs),
            stop_timeout: Duration::from_secs(self.stop_timeout_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Env fallbacks are not cleared here, so only assert on options whose
    // variables a test runner would not normally set.
    #[test]
    fn test_defaults() {
        let config = Config::try_parse_from(["danmu-hub"]).unwrap();
        assert_eq!(config.start_timeout_secs, 10);
        assert_eq!(config.stop_timeout_secs, 5);
        assert_eq!(config.websocket(), WebSocketProviderConfig::default());
        assert_eq!(
            config.listener_manager().start_timeout,
            Duration::from_secs(10)
        );
    }

    #[test]
    fn test_explicit_options() {
        let config = Config::try_parse_from([
            "danmu-hub",
            "--api-host",
            "0.0.0.0",
            "--api-port",
            "9000",
            "--use-proxy",
            "--proxy-https",
            "--proxy-port",
            "9443",
            "--allowed-origins",
            "https://a.example,https://b.example",
            "--log-format",
            "json",
            "--reconnect-attempts",
            "0",
        ])
        .unwrap();
        assert_eq!(config.api_server(), ServerConfig::new("0.0.0.0", 9000));
        assert_eq!(config.allowed_origins, ["https://a.example", "https://b.example"]);
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.websocket().max_reconnect_attempts, 1);

        let proxy = config.image_proxy();
        assert!(proxy.enabled);
        assert!(proxy.https);
        assert_eq!(proxy.port, 9443);
    }

    #[test]
    fn test_initial_retry_window() {
        let config = Config::try_parse_from(["danmu-hub"]).unwrap();
        // Four sleeps of 5 s between five attempts, longer than the 10 s start timeout.
        assert_eq!(config.initial_retry_window(), Duration::from_secs(20));
        assert!(config.initial_retry_window() > config.listener_manager().start_timeout);

        let config = Config::try_parse_from([
            "danmu-hub",
            "--reconnect-attempts",
            "2",
            "--reconnect-delay-ms",
            "1000",
        ])
        .unwrap();
        assert_eq!(config.initial_retry_window(), Duration::from_secs(1));
        assert_eq!(
            Config::try_parse_from(["danmu-hub", "--reconnect-attempts", "1"])
                .unwrap()
                .initial_retry_window(),
            Duration::ZERO
        );
    }

    #[test]
    fn test_rejects_unknown_log_format() {
        assert!(Config::try_parse_from(["danmu-hub", "--log-format", "xml"]).is_err());
    }
}
