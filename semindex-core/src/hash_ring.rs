//! Consistent-hash shard router: maps a relative file path to one of N shards.

use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// A ring of virtual-node tokens used to assign keys to shards with low
/// variance. Built once per snapshot; `(shard_count, virtual_nodes)` is part
/// of the snapshot meta because changing either invalidates prior assignment.
#[derive(Debug, Clone)]
pub struct HashRing {
    shard_count: usize,
    virtual_nodes: usize,
    // token -> shard index, sorted by token for binary search
    ring: BTreeMap<u64, usize>,
}

impl HashRing {
    /// Build a ring for `shard_count` shards with `virtual_nodes` tokens each.
    pub fn new(shard_count: usize, virtual_nodes: usize) -> Self {
        let mut ring = BTreeMap::new();
        for shard in 0..shard_count {
            for vnode in 0..virtual_nodes {
                let token = hash_token(&format!("shard-{shard}-vnode-{vnode}"));
                ring.insert(token, shard);
            }
        }
        Self {
            shard_count,
            virtual_nodes,
            ring,
        }
    }

    pub fn shard_count(&self) -> usize {
        self.shard_count
    }

    pub fn virtual_nodes(&self) -> usize {
        self.virtual_nodes
    }

    /// Determine the shard for `key`, walking clockwise from `hash(key)` to
    /// the nearest token, wrapping around to the first token if past the end.
    pub fn shard_of(&self, key: &str) -> usize {
        if self.ring.is_empty() {
            return 0;
        }
        let h = hash_token(key);
        match self.ring.range(h..).next() {
            Some((_, &shard)) => shard,
            None => *self.ring.values().next().expect("ring is non-empty"),
        }
    }
}

/// Top 8 bytes of SHA-256 as a big-endian u64, per §4.1 ("SHA-256 high-order bits").
fn hash_token(input: &str) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    let digest = hasher.finalize();
    u64::from_be_bytes(digest[0..8].try_into().expect("sha256 digest is 32 bytes"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn shard_of_is_deterministic() {
        let ring = HashRing::new(8, 150);
        let a = ring.shard_of("src/main.rs");
        let b = ring.shard_of("src/main.rs");
        assert_eq!(a, b);
    }

    #[test]
    fn shard_of_is_in_range() {
        let ring = HashRing::new(8, 150);
        for i in 0..500 {
            let shard = ring.shard_of(&format!("src/file_{i}.rs"));
            assert!(shard < 8);
        }
    }

    #[test]
    fn identical_params_yield_identical_assignment_across_instances() {
        let ring_a = HashRing::new(16, 150);
        let ring_b = HashRing::new(16, 150);
        for i in 0..200 {
            let key = format!("pkg/module_{i}/lib.rs");
            assert_eq!(ring_a.shard_of(&key), ring_b.shard_of(&key));
        }
    }

    #[test]
    fn virtual_nodes_bound_variance() {
        let ring = HashRing::new(8, 150);
        let mut counts: HashMap<usize, usize> = HashMap::new();
        for i in 0..8000 {
            let shard = ring.shard_of(&format!("some/deeply/nested/path/file_{i}.ts"));
            *counts.entry(shard).or_insert(0) += 1;
        }
        let expected = 8000 / 8;
        for shard in 0..8 {
            let count = *counts.get(&shard).unwrap_or(&0);
            // Loose bound: no shard should be off by more than 50% given 150
            // virtual nodes per shard over 8000 keys.
            assert!(
                count > expected / 2 && count < expected * 3 / 2,
                "shard {shard} got {count}, expected near {expected}"
            );
        }
    }

    #[test]
    fn changing_shard_count_changes_assignment_for_some_keys() {
        let ring_a = HashRing::new(4, 150);
        let ring_b = HashRing::new(8, 150);
        let keys: Vec<String> = (0..100).map(|i| format!("file_{i}.rs")).collect();
        let differs = keys
            .iter()
            .any(|k| ring_a.shard_of(k) != ring_b.shard_of(k) % 4);
        assert!(differs, "expected at least one reassignment across ring sizes");
    }
}
