use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub gateway: GatewayConfig,
    pub server: ServerConfig,
    pub cache: CacheConfig,
    pub realtime: RealtimeConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GatewayBackend {
    Memory,
    Sqlite,
}

impl FromStr for GatewayBackend {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "memory" | "mock" => Ok(GatewayBackend::Memory),
            "sqlite" => Ok(GatewayBackend::Sqlite),
            other => Err(anyhow::anyhow!("Unknown gateway backend '{}' (expected memory or sqlite)", other)),
        }
    }
}

impl fmt::Display for GatewayBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GatewayBackend::Memory => write!(f, "memory"),
            GatewayBackend::Sqlite => write!(f, "sqlite"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub backend: GatewayBackend,
    pub database_url: String,
    pub public_base_url: String,
    pub bucket: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeConfig {
    pub invalidate_on_change: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            gateway: GatewayConfig {
                backend: GatewayBackend::Memory,
                database_url: "sqlite:data/community_feed.db".to_string(),
                public_base_url: "http://localhost:3000/storage".to_string(),
                bucket: "media".to_string(),
            },
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 3000,
            },
            cache: CacheConfig { capacity: 1000 },
            realtime: RealtimeConfig {
                invalidate_on_change: false,
            },
        }
    }
}

impl Config {
    /// Read configuration from the environment. Unset or unparsable numbers
    /// fall back to defaults; an unknown gateway backend is an error.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            gateway: GatewayConfig {
                backend: match lookup("GATEWAY_BACKEND") {
                    Some(value) => value.parse()?,
                    None => defaults.gateway.backend,
                },
                database_url: lookup("DATABASE_URL").unwrap_or(defaults.gateway.database_url),
                public_base_url: lookup("STORAGE_PUBLIC_BASE_URL").unwrap_or(defaults.gateway.public_base_url),
                bucket: lookup("STORAGE_BUCKET").unwrap_or(defaults.gateway.bucket),
            },
            server: ServerConfig {
                host: lookup("SERVER_HOST").unwrap_or(defaults.server.host),
                port: lookup("SERVER_PORT")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(defaults.server.port),
            },
            cache: CacheConfig {
                capacity: lookup("CACHE_CAPACITY")
                    .and_then(|v| v.parse().ok())
                    .filter(|&capacity: &usize| capacity > 0)
                    .unwrap_or(defaults.cache.capacity),
            },
            realtime: RealtimeConfig {
                invalidate_on_change: lookup("REALTIME_INVALIDATION")
                    .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
                    .unwrap_or(defaults.realtime.invalidate_on_change),
            },
        })
    }

    pub fn server_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.gateway.backend, GatewayBackend::Memory);
        assert_eq!(config.gateway.bucket, "media");
        assert_eq!(config.cache.capacity, 1000);
        assert!(!config.realtime.invalidate_on_change);
        assert_eq!(config.server_address(), "0.0.0.0:3000");
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("GATEWAY_BACKEND", "SQLite"),
            ("DATABASE_URL", "sqlite::memory:"),
            ("SERVER_PORT", "8081"),
            ("CACHE_CAPACITY", "0"),
            ("REALTIME_INVALIDATION", "true"),
        ]))
        .unwrap();
        assert_eq!(config.gateway.backend, GatewayBackend::Sqlite);
        assert_eq!(config.gateway.database_url, "sqlite::memory:");
        assert_eq!(config.server.port, 8081);
        assert_eq!(config.cache.capacity, 1000);
        assert!(config.realtime.invalidate_on_change);
    }

    #[test]
    fn test_unknown_backend_is_rejected() {
        assert!(Config::from_lookup(lookup(&[("GATEWAY_BACKEND", "postgres")])).is_err());
    }
}
