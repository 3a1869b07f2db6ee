//! Merkle tree over a sorted (key, hex-hash) map. Used both for per-shard
//! roots (over path -> content_hash) and for the meta root (over shard-name
//! -> shard_merkle_root).

use sha2::{Digest, Sha256};

/// Build the Merkle root of `leaves`, an iterator of `(key, value)` pairs
/// where `value` is typically a hex-encoded hash. Leaves are hashed as
/// `hash(key || ":" || value)`, then combined pairwise bottom-up; an odd
/// node at any level is duplicated. Empty input yields an empty-string root.
pub fn merkle_root<'a, I>(leaves: I) -> String
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut sorted: Vec<(&str, &str)> = leaves.into_iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(b.0));

    if sorted.is_empty() {
        return String::new();
    }

    let mut level: Vec<String> = sorted
        .iter()
        .map(|(key, value)| leaf_hash(key, value))
        .collect();

    while level.len() > 1 {
        if level.len() % 2 == 1 {
            let last = level.last().expect("non-empty").clone();
            level.push(last);
        }
        level = level
            .chunks(2)
            .map(|pair| combine_hash(&pair[0], &pair[1]))
            .collect();
    }

    level.into_iter().next().expect("non-empty after loop")
}

/// A Merkle tree built from a sorted (key, value) map, exposing only its
/// root — the tree itself is never serialized; the root is re-derivable from
/// the leaves at any time.
pub struct MerkleTree {
    root: String,
}

impl MerkleTree {
    pub fn build<'a, I>(leaves: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        Self {
            root: merkle_root(leaves),
        }
    }

    /// The root hex hash, or the empty string for an empty input map.
    pub fn root(&self) -> &str {
        &self.root
    }
}

fn leaf_hash(key: &str, value: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    hasher.update(b":");
    hasher.update(value.as_bytes());
    hex::encode(hasher.finalize())
}

fn combine_hash(left: &str, right: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(left.as_bytes());
    hasher.update(right.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn empty_input_yields_empty_root() {
        let tree = MerkleTree::build(std::iter::empty());
        assert_eq!(tree.root(), "");
    }

    #[test]
    fn single_leaf_root_is_leaf_hash() {
        let tree = MerkleTree::build([("a.rs", "deadbeef")]);
        assert_eq!(tree.root(), leaf_hash("a.rs", "deadbeef"));
    }

    #[test]
    fn root_depends_only_on_sorted_pairs_not_input_order() {
        let forward = MerkleTree::build([("a.rs", "1"), ("b.rs", "2"), ("c.rs", "3")]);
        let shuffled = MerkleTree::build([("c.rs", "3"), ("a.rs", "1"), ("b.rs", "2")]);
        assert_eq!(forward.root(), shuffled.root());
    }

    #[test]
    fn odd_leaf_count_duplicates_last_node() {
        let three = MerkleTree::build([("a.rs", "1"), ("b.rs", "2"), ("c.rs", "3")]);

        // Manually replicate the duplicate-last-node rule for 3 leaves.
        let h_a = leaf_hash("a.rs", "1");
        let h_b = leaf_hash("b.rs", "2");
        let h_c = leaf_hash("c.rs", "3");
        let left = combine_hash(&h_a, &h_b);
        let right = combine_hash(&h_c, &h_c);
        let expected = combine_hash(&left, &right);

        assert_eq!(three.root(), expected);
    }

    #[test]
    fn changing_any_value_changes_the_root() {
        let base = MerkleTree::build([("a.rs", "1"), ("b.rs", "2")]);
        let changed = MerkleTree::build([("a.rs", "1"), ("b.rs", "999")]);
        assert_ne!(base.root(), changed.root());
    }

    #[test]
    fn root_over_btreemap_matches_root_over_vec() {
        let mut map = BTreeMap::new();
        map.insert("a.rs".to_string(), "1".to_string());
        map.insert("b.rs".to_string(), "2".to_string());

        let from_map = merkle_root(map.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        let from_vec = merkle_root([("a.rs", "1"), ("b.rs", "2")]);
        assert_eq!(from_map, from_vec);
    }
}
