//! Connection and DAO configuration.

use serde::Deserialize;

/// Connection configuration for database backends.
#[derive(Debug, Clone)]
pub enum ConnectionConfig {
    /// Connect using a database URL string.
    Url(String),
    /// Connect using a URL with an explicit pool size.
    Options { url: String, max_connections: u32 },
}

impl ConnectionConfig {
    pub fn url(&self) -> &str {
        match self {
            ConnectionConfig::Url(url) => url,
            ConnectionConfig::Options { url, .. } => url,
        }
    }

    /// Requested pool size, if any.
    pub fn max_connections(&self) -> Option<u32> {
        match self {
            ConnectionConfig::Url(_) => None,
            ConnectionConfig::Options {
                max_connections, ..
            } => Some(*max_connections),
        }
    }
}

impl From<&str> for ConnectionConfig {
    fn from(url: &str) -> Self {
        ConnectionConfig::Url(url.to_string())
    }
}

impl From<String> for ConnectionConfig {
    fn from(url: String) -> Self {
        ConnectionConfig::Url(url)
    }
}

impl From<&String> for ConnectionConfig {
    fn from(url: &String) -> Self {
        ConnectionConfig::Url(url.clone())
    }
}

/// Settings for [`crate::AppDao`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DaoConfig {
    /// When `true`, ids are assigned by the database on insert.
    /// When `false`, ids come from the DAO's id generator.
    pub generated_keys: bool,
}

impl Default for DaoConfig {
    fn default() -> Self {
        Self {
            generated_keys: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dao_config_defaults_to_generated_keys() {
        let config: DaoConfig = serde_json::from_str("{}").unwrap();
        assert!(config.generated_keys);

        let config: DaoConfig = serde_json::from_str(r#"{"generatedKeys": false}"#).unwrap();
        assert!(!config.generated_keys);
    }

    #[test]
    fn connection_config_exposes_url_and_pool_size() {
        let config = ConnectionConfig::from("postgres://localhost/app");
        assert_eq!(config.url(), "postgres://localhost/app");
        assert_eq!(config.max_connections(), None);

        let config = ConnectionConfig::Options {
            url: "postgres://db/app".to_string(),
            max_connections: 4,
        };
        assert_eq!(config.max_connections(), Some(4));
    }
}
