use tracing::warn;

use crate::auth::{Credentials, DEFAULT_HOST};
use crate::http::DEFAULT_TIMEOUT_SECS;

/// 環境変数から読むクライアント設定
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub host: String,
    pub timeout_secs: u64,
    pub credentials: Option<Credentials>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            credentials: None,
        }
    }
}

impl Config {
    /// `.env` があれば読み込んだうえで環境変数から設定を作る
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// 認証情報の優先順位: トークン > API キー > ユーザー > クライアント
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let host = get("ARCGIS_HOST").unwrap_or_else(|| DEFAULT_HOST.to_string());

        let timeout_secs = match get("ARCGIS_TIMEOUT_SECS") {
            Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
                warn!(value = %raw, "invalid ARCGIS_TIMEOUT_SECS, using default");
                DEFAULT_TIMEOUT_SECS
            }),
            None => DEFAULT_TIMEOUT_SECS,
        };

        let credentials = if let Some(token) = get("ARCGIS_TOKEN") {
            Some(Credentials::Token(token))
        } else if let Some(key) = get("ARCGIS_API_KEY") {
            Some(Credentials::ApiKey(key))
        } else if let (Some(username), Some(password)) =
            (get("ARCGIS_USER"), get("ARCGIS_PASSWORD"))
        {
            Some(Credentials::User { username, password })
        } else if let (Some(client_id), Some(client_secret)) =
            (get("ARCGIS_CLIENT"), get("ARCGIS_SECRET"))
        {
            Some(Credentials::Client {
                client_id,
                client_secret,
            })
        } else {
            None
        };

        Self {
            host,
            timeout_secs,
            credentials,
        }
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Config {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let cfg = config(&[]);
        assert_eq!(cfg, Config::default());
        assert!(cfg.credentials.is_none());
    }

    #[test]
    fn test_api_key_wins_over_user() {
        let cfg = config(&[
            ("ARCGIS_API_KEY", "AAPK"),
            ("ARCGIS_USER", "jdoe"),
            ("ARCGIS_PASSWORD", "pw"),
        ]);
        assert_eq!(cfg.credentials, Some(Credentials::ApiKey("AAPK".into())));
    }

    #[test]
    fn test_user_needs_password() {
        let cfg = config(&[("ARCGIS_USER", "jdoe")]);
        assert!(cfg.credentials.is_none());

        let cfg = config(&[("ARCGIS_CLIENT", "id"), ("ARCGIS_SECRET", "s")]);
        assert!(matches!(cfg.credentials, Some(Credentials::Client { .. })));
    }

    #[test]
    fn test_host_and_timeout() {
        let cfg = config(&[
            ("ARCGIS_HOST", "https://gis.example.org/portal"),
            ("ARCGIS_TIMEOUT_SECS", "90"),
        ]);
        assert_eq!(cfg.host, "https://gis.example.org/portal");
        assert_eq!(cfg.timeout_secs, 90);

        let cfg = config(&[("ARCGIS_TIMEOUT_SECS", "soon"), ("ARCGIS_TOKEN", " ")]);
        assert_eq!(cfg.timeout_secs, DEFAULT_TIMEOUT_SECS);
        assert!(cfg.credentials.is_none());
    }
}
