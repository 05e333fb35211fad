//! Circle: one replica group of backends behind a hash ring
//!
//! A circle owns one engine per configured backend and routes every
//! (db, measurement) key to exactly one of them. Ring and engine set
//! are fixed at construction; lookups go through a lazily-populated
//! concurrent cache that is never invalidated within a process
//! lifetime.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use super::ring::HashRing;
use crate::config::{BackendConfig, CircleConfig, HashKey, ProxyConfig};
use crate::engine::BackendEngine;
use crate::error::{ConfigError, Error};

/// Virtual nodes per backend on the ring.
const VIRTUAL_NODES: usize = 256;

/// One replica group of backends.
pub struct Circle {
    id: usize,
    name: String,
    backends: Vec<Arc<BackendEngine>>,
    ring: HashRing,
    cache: DashMap<String, Arc<BackendEngine>>,
}

impl Circle {
    /// Build the circle's engines and ring from config.
    pub fn new(cfg: &CircleConfig, pxcfg: &ProxyConfig, id: usize) -> Result<Self, Error> {
        if cfg.backends.is_empty() {
            return Err(ConfigError::EmptyBackends {
                circle: cfg.name.clone(),
            }
            .into());
        }

        let mut ring = HashRing::with_replicas(VIRTUAL_NODES);
        let mut backends = Vec::with_capacity(cfg.backends.len());
        for (idx, bkcfg) in cfg.backends.iter().enumerate() {
            let engine = Arc::new(BackendEngine::new(bkcfg, pxcfg)?);
            ring.add(&ring_key(pxcfg.hash_key, bkcfg, idx), idx);
            backends.push(engine);
        }

        debug!(
            circle = %cfg.name,
            backends = backends.len(),
            hash_key = ?pxcfg.hash_key,
            "circle constructed"
        );

        Ok(Self {
            id,
            name: cfg.name.clone(),
            backends,
            ring,
            cache: DashMap::new(),
        })
    }

    /// The engine owning `key`. Stable for the process lifetime.
    pub fn select(&self, key: &str) -> Arc<BackendEngine> {
        if let Some(engine) = self.cache.get(key) {
            return Arc::clone(&engine);
        }
        // Ring slots are indices into `backends` by construction, and
        // the constructor rejects an empty backend list.
        let slot = self.ring.node_for(key).unwrap_or(0);
        let engine = Arc::clone(&self.backends[slot]);
        self.cache.insert(key.to_string(), Arc::clone(&engine));
        engine
    }

    /// Zero-based position of this circle in the proxy config.
    pub fn id(&self) -> usize {
        self.id
    }

    /// Circle name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// All engines, in config order.
    pub fn backends(&self) -> &[Arc<BackendEngine>] {
        &self.backends
    }

    /// Whether every backend in the circle is active.
    pub fn is_active(&self) -> bool {
        self.backends.iter().all(|engine| engine.is_active())
    }

    /// Flip liveness on every backend in the circle.
    ///
    /// Probers working per backend should go through
    /// [`backends`](Self::backends) and call
    /// [`BackendEngine::set_active`] on the one they probed.
    pub fn set_active(&self, active: bool) {
        for engine in &self.backends {
            engine.set_active(active);
        }
    }

    /// Whether any backend in the circle is write-only.
    pub fn is_write_only(&self) -> bool {
        self.backends.iter().any(|engine| engine.is_write_only())
    }

    /// Shut down every engine in the circle.
    pub async fn close(&self) {
        for engine in &self.backends {
            engine.close().await;
        }
    }
}

impl std::fmt::Debug for Circle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Circle")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("backends", &self.backends.len())
            .finish()
    }
}

/// Build every circle in the config, validating it first.
pub fn build_circles(pxcfg: &ProxyConfig) -> Result<Vec<Circle>, Error> {
    pxcfg.validate()?;
    pxcfg
        .circles
        .iter()
        .enumerate()
        .map(|(id, cfg)| Circle::new(cfg, pxcfg, id))
        .collect()
}

/// Routing key for a point: the database plus the measurement.
pub fn routing_key(db: &str, measurement: &str) -> String {
    format!("{db},{measurement}")
}

fn ring_key(mode: HashKey, cfg: &BackendConfig, idx: usize) -> String {
    match mode {
        HashKey::Name => cfg.name.clone(),
        HashKey::Url => cfg.url.clone(),
        HashKey::Exi => format!("|{idx}"),
        HashKey::Idx => idx.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use tempfile::tempdir;

    fn circle_config(n: usize) -> CircleConfig {
        CircleConfig {
            name: "c0".to_string(),
            backends: (0..n)
                .map(|i| BackendConfig {
                    name: format!("b{i}"),
                    url: format!("http://127.0.0.1:{}", 8086 + i),
                    write_only: false,
                })
                .collect(),
        }
    }

    fn proxy_config(data_dir: &Path, n: usize, hash_key: HashKey) -> ProxyConfig {
        ProxyConfig {
            circles: vec![circle_config(n)],
            data_dir: data_dir.to_path_buf(),
            hash_key,
            flush_size: 10_000,
            flush_time: 1,
            rewrite_interval: 10,
            conn_pool_size: 4,
            write_timeout: 10,
        }
    }

    #[tokio::test]
    async fn test_selection_stable_across_calls_and_rebuilds() {
        let dir_a = tempdir().unwrap();
        let dir_b = tempdir().unwrap();
        let cfg_a = proxy_config(dir_a.path(), 5, HashKey::Exi);
        let cfg_b = proxy_config(dir_b.path(), 5, HashKey::Exi);

        let circle_a = Circle::new(&cfg_a.circles[0], &cfg_a, 0).unwrap();
        let circle_b = Circle::new(&cfg_b.circles[0], &cfg_b, 0).unwrap();

        for i in 0..1000 {
            let key = routing_key("db0", &format!("meas_{i}"));
            let first = circle_a.select(&key).name().to_string();
            // Same circle, repeated calls.
            assert_eq!(circle_a.select(&key).name(), first);
            // Fresh circle, same config.
            assert_eq!(circle_b.select(&key).name(), first);
        }

        circle_a.close().await;
        circle_b.close().await;
    }

    #[tokio::test]
    async fn test_all_backends_reachable() {
        let dir = tempdir().unwrap();
        let cfg = proxy_config(dir.path(), 5, HashKey::Exi);
        let circle = Circle::new(&cfg.circles[0], &cfg, 0).unwrap();

        let mut seen = std::collections::HashSet::new();
        for i in 0..2000 {
            seen.insert(circle.select(&format!("db,m{i}")).name().to_string());
        }
        assert_eq!(seen.len(), 5);
        circle.close().await;
    }

    #[tokio::test]
    async fn test_cache_populates_lazily() {
        let dir = tempdir().unwrap();
        let cfg = proxy_config(dir.path(), 3, HashKey::Idx);
        let circle = Circle::new(&cfg.circles[0], &cfg, 0).unwrap();

        assert_eq!(circle.cache.len(), 0);
        let first = circle.select("db0,cpu");
        assert_eq!(circle.cache.len(), 1);
        let second = circle.select("db0,cpu");
        assert_eq!(circle.cache.len(), 1);
        assert!(Arc::ptr_eq(&first, &second));
        circle.close().await;
    }

    #[tokio::test]
    async fn test_hash_key_modes_differ_only_in_ring_keys() {
        let dir = tempdir().unwrap();
        for mode in [HashKey::Idx, HashKey::Exi, HashKey::Name, HashKey::Url] {
            let sub = dir.path().join(format!("{mode:?}"));
            let cfg = proxy_config(&sub, 3, mode);
            let circle = Circle::new(&cfg.circles[0], &cfg, 0).unwrap();
            // Every mode yields a working, fully populated circle.
            assert_eq!(circle.backends().len(), 3);
            let _ = circle.select("db0,disk");
            circle.close().await;
        }
    }

    #[tokio::test]
    async fn test_roll_ups() {
        let dir = tempdir().unwrap();
        let mut cfg = proxy_config(dir.path(), 2, HashKey::Idx);
        cfg.circles[0].backends[1].write_only = true;
        let circle = Circle::new(&cfg.circles[0], &cfg, 0).unwrap();

        assert!(circle.is_active());
        assert!(circle.is_write_only());
        assert_eq!(circle.id(), 0);
        assert_eq!(circle.name(), "c0");

        // The prober hook reaches every engine in the circle.
        circle.set_active(false);
        assert!(!circle.is_active());
        circle.backends()[0].set_active(true);
        assert!(!circle.is_active());
        circle.set_active(true);
        assert!(circle.is_active());

        circle.close().await;
    }

    #[tokio::test]
    async fn test_build_circles_validates() {
        let dir = tempdir().unwrap();
        let mut cfg = proxy_config(dir.path(), 2, HashKey::Idx);
        let circles = build_circles(&cfg).unwrap();
        assert_eq!(circles.len(), 1);
        for circle in &circles {
            circle.close().await;
        }

        cfg.circles.clear();
        assert!(build_circles(&cfg).is_err());
    }

    #[test]
    fn test_routing_key_format() {
        assert_eq!(routing_key("db0", "cpu"), "db0,cpu");
    }
}
