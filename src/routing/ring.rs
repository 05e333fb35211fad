//! Consistent-hash ring with virtual nodes
//!
//! Each backend is registered under a ring string and expanded into a
//! fixed number of virtual nodes for even key distribution. A key maps
//! to the first virtual node clockwise from its hash, wrapping around
//! at the end of the ring. The ring is built once and never mutated.

use std::collections::BTreeMap;

/// Ring of virtual nodes, each pointing at a backend slot.
#[derive(Debug)]
pub struct HashRing {
    ring: BTreeMap<u64, usize>,
    replicas: usize,
}

impl HashRing {
    /// Create an empty ring with `replicas` virtual nodes per backend.
    pub fn with_replicas(replicas: usize) -> Self {
        Self {
            ring: BTreeMap::new(),
            replicas: replicas.max(1),
        }
    }

    /// Register `slot` under `node_key`.
    ///
    /// The virtual-node string is the replica index concatenated in
    /// front of the node key. Stringified small integers as node keys
    /// can therefore collide ("1" + "11" vs "11" + "1"); the `exi` ring
    /// key mode exists to rule that out.
    pub fn add(&mut self, node_key: &str, slot: usize) {
        for replica in 0..self.replicas {
            let hash = hash_str(&format!("{replica}{node_key}"));
            self.ring.insert(hash, slot);
        }
    }

    /// Slot owning `key`, or `None` on an empty ring.
    pub fn node_for(&self, key: &str) -> Option<usize> {
        let hash = hash_str(key);
        self.ring
            .range(hash..)
            .next()
            .or_else(|| self.ring.iter().next())
            .map(|(_, &slot)| slot)
    }

    /// Number of virtual nodes currently on the ring.
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    /// Whether the ring has no nodes.
    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }
}

fn hash_str(s: &str) -> u64 {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let mut hasher = DefaultHasher::new();
    s.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn ring_of(keys: &[&str], replicas: usize) -> HashRing {
        let mut ring = HashRing::with_replicas(replicas);
        for (slot, key) in keys.iter().enumerate() {
            ring.add(key, slot);
        }
        ring
    }

    #[test]
    fn test_empty_ring_has_no_owner() {
        let ring = HashRing::with_replicas(256);
        assert!(ring.is_empty());
        assert_eq!(ring.node_for("anything"), None);
    }

    #[test]
    fn test_same_key_same_slot() {
        let ring = ring_of(&["|0", "|1", "|2"], 256);
        let slot = ring.node_for("cpu,host=server01").unwrap();
        for _ in 0..100 {
            assert_eq!(ring.node_for("cpu,host=server01").unwrap(), slot);
        }
    }

    #[test]
    fn test_identical_rings_agree() {
        let a = ring_of(&["|0", "|1", "|2", "|3", "|4"], 256);
        let b = ring_of(&["|0", "|1", "|2", "|3", "|4"], 256);
        for i in 0..1000 {
            let key = format!("series_{i}");
            assert_eq!(a.node_for(&key), b.node_for(&key));
        }
    }

    #[test]
    fn test_distribution_covers_all_slots() {
        let ring = ring_of(&["|0", "|1", "|2", "|3"], 256);
        let mut counts: HashMap<usize, usize> = HashMap::new();
        for i in 0..10_000 {
            let slot = ring.node_for(&format!("key_{i}")).unwrap();
            *counts.entry(slot).or_insert(0) += 1;
        }
        assert_eq!(counts.len(), 4);

        let mean = 10_000.0 / 4.0;
        for &count in counts.values() {
            let deviation = (count as f64 - mean).abs() / mean;
            assert!(deviation < 0.5, "slot load {count} too far from {mean}");
        }
    }

    #[test]
    fn test_extended_index_placements_all_distinct() {
        let backends = 1_000;
        let mut ring = HashRing::with_replicas(256);
        for idx in 0..backends {
            ring.add(&format!("|{idx}"), idx);
        }
        assert_eq!(ring.len(), backends * 256);
    }

    #[test]
    fn test_plain_index_placements_collide_past_ten() {
        // "1" + "11" and "11" + "1" both become the virtual-node string
        // "111"; with enough backends, plain decimal indexes lose
        // virtual nodes this way while the "|"-prefixed form does not.
        let backends = 12;
        let mut idx_ring = HashRing::with_replicas(256);
        let mut exi_ring = HashRing::with_replicas(256);
        for idx in 0..backends {
            idx_ring.add(&idx.to_string(), idx);
            exi_ring.add(&format!("|{idx}"), idx);
        }
        assert!(idx_ring.len() < backends * 256);
        assert_eq!(exi_ring.len(), backends * 256);
    }

    #[test]
    #[ignore = "full-scale sweep, run on demand"]
    fn test_extended_index_distinct_at_hundred_thousand_backends() {
        let backends = 100_000;
        let mut ring = HashRing::with_replicas(256);
        for idx in 0..backends {
            ring.add(&format!("|{idx}"), idx);
        }
        assert_eq!(ring.len(), backends * 256);
    }

    #[test]
    fn test_wrap_around() {
        // A single node owns every key, including keys whose hash falls
        // past the last virtual node.
        let ring = ring_of(&["only"], 4);
        for i in 0..1000 {
            assert_eq!(ring.node_for(&format!("k{i}")), Some(0));
        }
    }
}
