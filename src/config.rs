//! Configuration for the proxy
//!
//! The surrounding loader (file, env, flags) deserializes these structs
//! from whatever format it likes; the core treats them as fixed after
//! [`ProxyConfig::validate`] passes.

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// How each backend is keyed onto the consistent-hash ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HashKey {
    /// Decimal string of the backend's zero-based index in its circle.
    #[default]
    Idx,
    /// `"|"` + decimal index. Extended index: avoids virtual-node hash
    /// collisions between small stringified integers. Recommended.
    Exi,
    /// The backend's configured name.
    Name,
    /// The backend's URL. Legacy.
    Url,
}

/// One downstream backend.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BackendConfig {
    /// Unique backend name; also names the spill files.
    pub name: String,

    /// Base URL of the backend's HTTP API, e.g. `http://127.0.0.1:8086`.
    pub url: String,

    /// Accept writes but never serve queries through this backend.
    #[serde(default)]
    pub write_only: bool,
}

/// One replica group of backends sharing a hash ring.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CircleConfig {
    /// Circle name, for operators.
    pub name: String,

    /// Backends in ring order (index order matters for `idx`/`exi` keys).
    pub backends: Vec<BackendConfig>,
}

/// Proxy-wide options.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProxyConfig {
    /// Replica groups.
    pub circles: Vec<CircleConfig>,

    /// Directory for spill files.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Ring key mode.
    #[serde(default)]
    pub hash_key: HashKey,

    /// Batch size threshold per (db, rp) that forces a flush.
    #[serde(default = "default_flush_size")]
    pub flush_size: u32,

    /// Seconds of inactivity before a non-full batch is flushed.
    #[serde(default = "default_flush_time")]
    pub flush_time: u64,

    /// Seconds between rewrite sweeps, and the back-off after a
    /// transient failure during replay.
    #[serde(default = "default_rewrite_interval")]
    pub rewrite_interval: u64,

    /// Capacity of each engine's flush task pool.
    #[serde(default = "default_conn_pool_size")]
    pub conn_pool_size: usize,

    /// Per-request timeout for backend writes, in seconds.
    #[serde(default = "default_write_timeout")]
    pub write_timeout: u64,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_flush_size() -> u32 {
    10_000
}

fn default_flush_time() -> u64 {
    1
}

fn default_rewrite_interval() -> u64 {
    10
}

fn default_conn_pool_size() -> usize {
    20
}

fn default_write_timeout() -> u64 {
    10
}

impl ProxyConfig {
    /// Check the invariants the rest of the crate relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.circles.is_empty() {
            return Err(ConfigError::EmptyCircles);
        }
        let mut seen = HashSet::new();
        for circle in &self.circles {
            if circle.backends.is_empty() {
                return Err(ConfigError::EmptyBackends {
                    circle: circle.name.clone(),
                });
            }
            for backend in &circle.backends {
                if backend.name.is_empty() {
                    return Err(ConfigError::EmptyBackendName {
                        circle: circle.name.clone(),
                    });
                }
                if !seen.insert(backend.name.clone()) {
                    return Err(ConfigError::DuplicatedBackendName {
                        name: backend.name.clone(),
                    });
                }
            }
        }
        if self.flush_size == 0 {
            return Err(ConfigError::NonPositive {
                field: "flush_size",
            });
        }
        if self.flush_time == 0 {
            return Err(ConfigError::NonPositive {
                field: "flush_time",
            });
        }
        if self.rewrite_interval == 0 {
            return Err(ConfigError::NonPositive {
                field: "rewrite_interval",
            });
        }
        if self.conn_pool_size == 0 {
            return Err(ConfigError::NonPositive {
                field: "conn_pool_size",
            });
        }
        if self.write_timeout == 0 {
            return Err(ConfigError::NonPositive {
                field: "write_timeout",
            });
        }
        Ok(())
    }

    /// Flush inactivity window as a [`Duration`].
    pub fn flush_time(&self) -> Duration {
        Duration::from_secs(self.flush_time)
    }

    /// Rewrite sweep interval as a [`Duration`].
    pub fn rewrite_interval(&self) -> Duration {
        Duration::from_secs(self.rewrite_interval)
    }

    /// Backend write timeout as a [`Duration`].
    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(name: &str) -> BackendConfig {
        BackendConfig {
            name: name.to_string(),
            url: format!("http://127.0.0.1:8086/{name}"),
            write_only: false,
        }
    }

    fn config_with(backends: Vec<BackendConfig>) -> ProxyConfig {
        ProxyConfig {
            circles: vec![CircleConfig {
                name: "c0".to_string(),
                backends,
            }],
            data_dir: default_data_dir(),
            hash_key: HashKey::default(),
            flush_size: default_flush_size(),
            flush_time: default_flush_time(),
            rewrite_interval: default_rewrite_interval(),
            conn_pool_size: default_conn_pool_size(),
            write_timeout: default_write_timeout(),
        }
    }

    #[test]
    fn test_defaults() {
        let cfg = config_with(vec![backend("b0")]);
        assert_eq!(cfg.flush_size, 10_000);
        assert_eq!(cfg.flush_time(), Duration::from_secs(1));
        assert_eq!(cfg.rewrite_interval(), Duration::from_secs(10));
        assert_eq!(cfg.conn_pool_size, 20);
        assert_eq!(cfg.write_timeout(), Duration::from_secs(10));
        assert_eq!(cfg.hash_key, HashKey::Idx);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_empty_circles_rejected() {
        let mut cfg = config_with(vec![backend("b0")]);
        cfg.circles.clear();
        assert_eq!(cfg.validate(), Err(ConfigError::EmptyCircles));
    }

    #[test]
    fn test_empty_backends_rejected() {
        let cfg = config_with(vec![]);
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::EmptyBackends { .. })
        ));
    }

    #[test]
    fn test_duplicate_backend_name_rejected() {
        let cfg = config_with(vec![backend("b0"), backend("b0")]);
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::DuplicatedBackendName {
                name: "b0".to_string()
            })
        );
    }

    #[test]
    fn test_empty_backend_name_rejected() {
        let cfg = config_with(vec![backend("")]);
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::EmptyBackendName { .. })
        ));
    }

    #[test]
    fn test_zero_flush_size_rejected() {
        let mut cfg = config_with(vec![backend("b0")]);
        cfg.flush_size = 0;
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::NonPositive {
                field: "flush_size"
            })
        );
    }
}
