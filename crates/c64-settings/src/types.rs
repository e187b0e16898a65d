//! Settings types with compiled defaults.

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

/// Top-level gateway settings.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GatewaySettings {
    pub server: ServerSettings,
    pub feed: FeedSettings,
    pub logging: LoggingSettings,
}

/// Terminal listener and admin API settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ServerSettings {
    /// Address both listeners bind to.
    pub bind_host: String,
    /// Raw TCP port terminals connect to.
    pub tcp_port: u16,
    /// HTTP port of the admin/status API.
    pub api_port: u16,
    /// Source IPs allowed to open a terminal session.
    pub allowed_ips: Vec<String>,
    /// Deployed revision reported by the status API.
    pub app_version: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_host: "0.0.0.0".into(),
            tcp_port: 10000,
            api_port: 9000,
            allowed_ips: vec!["127.0.0.1".into()],
            app_version: "0000".into(),
        }
    }
}

/// Upstream Pusher feed settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FeedSettings {
    pub pusher_key: String,
    pub pusher_cluster: String,
    pub pusher_channel: String,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            pusher_key: "1abcdc382aa1ff65c7be".into(),
            pusher_cluster: "us3".into(),
            pusher_channel: "sschat_c2a6e2feefc3c81a79a80b557bddb84f".into(),
        }
    }
}

/// Log output and shipping settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LoggingSettings {
    /// Default level filter, overridden by `RUST_LOG`.
    pub level: String,
    /// Deployment environment; log shipping only runs in `production`.
    pub environment: String,
    pub loki: LokiSettings,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".into(),
            environment: "development".into(),
            loki: LokiSettings::default(),
        }
    }
}

/// Grafana Loki push endpoint. The token is only ever read from the
/// environment.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LokiSettings {
    pub url: Option<String>,
    pub user: Option<String>,
    #[serde(skip)]
    pub token: Option<SecretString>,
    pub job: String,
}

impl Default for LokiSettings {
    fn default() -> Self {
        Self {
            url: None,
            user: None,
            token: None,
            job: "c64-terminal-server".into(),
        }
    }
}

impl LokiSettings {
    /// Shipping needs an endpoint, credentials, and a production deployment.
    pub fn is_enabled(&self, environment: &str) -> bool {
        self.url.as_deref().is_some_and(|u| !u.is_empty())
            && self.user.as_deref().is_some_and(|u| !u.is_empty())
            && self.token.is_some()
            && environment == "production"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_defaults() {
        let s = ServerSettings::default();
        assert_eq!(s.bind_host, "0.0.0.0");
        assert_eq!(s.tcp_port, 10000);
        assert_eq!(s.api_port, 9000);
        assert_eq!(s.allowed_ips, vec!["127.0.0.1".to_string()]);
        assert_eq!(s.app_version, "0000");
    }

    #[test]
    fn feed_defaults() {
        let f = FeedSettings::default();
        assert_eq!(f.pusher_cluster, "us3");
        assert!(f.pusher_channel.starts_with("sschat_"));
    }

    #[test]
    fn partial_json_fills_defaults() {
        let s: GatewaySettings =
            serde_json::from_str(r#"{"server":{"tcpPort":6400}}"#).unwrap();
        assert_eq!(s.server.tcp_port, 6400);
        assert_eq!(s.server.api_port, 9000);
        assert_eq!(s.feed.pusher_cluster, "us3");
    }

    #[test]
    fn token_never_serialized() {
        let mut s = GatewaySettings::default();
        s.logging.loki.token = Some(SecretString::from("hunter2"));
        let json = serde_json::to_string(&s).unwrap();
        assert!(!json.contains("hunter2"));
        assert!(!format!("{s:?}").contains("hunter2"));
    }

    #[test]
    fn loki_requires_credentials_and_production() {
        let mut loki = LokiSettings {
            url: Some("https://logs.example.com".into()),
            user: Some("1234".into()),
            token: Some(SecretString::from("t")),
            ..Default::default()
        };
        assert!(loki.is_enabled("production"));
        assert!(!loki.is_enabled("development"));

        loki.token = None;
        assert!(!loki.is_enabled("production"));
    }
}
