//! Merkle tree root computation over serialized transactions.

use sha2::{Digest, Sha256};

/// Computes the Merkle root of a sequence of serialized items.
///
/// Leaves are the SHA-256 hashes of each item. Parents hash the
/// concatenation of their children and a level with an odd number of
/// nodes pairs the last node with itself. A one-leaf tree has the leaf
/// as root.
pub fn merkle_root(items: &[Vec<u8>]) -> Vec<u8> {
    if items.is_empty() {
        return Vec::new();
    }

    let mut level: Vec<Vec<u8>> = items
        .iter()
        .map(|item| Sha256::digest(item).to_vec())
        .collect();

    while level.len() > 1 {
        let mut next = Vec::with_capacity(level.len().div_ceil(2));
        for pair in level.chunks(2) {
            let left = &pair[0];
            let right = if pair.len() == 2 { &pair[1] } else { &pair[0] };
            let mut hasher = Sha256::new();
            hasher.update(left);
            hasher.update(right);
            next.push(hasher.finalize().to_vec());
        }
        level = next;
    }

    level.remove(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn items(names: &[&str]) -> Vec<Vec<u8>> {
        names.iter().map(|n| n.as_bytes().to_vec()).collect()
    }

    #[test]
    fn single_leaf_is_root() {
        let root = merkle_root(&items(&["node1"]));
        assert_eq!(root, Sha256::digest(b"node1").to_vec());
    }

    #[test]
    fn odd_count_duplicates_last() {
        let root = merkle_root(&items(&["node1", "node2", "node3"]));
        assert_eq!(
            hex::encode(root),
            "4e3e44e55926330ab6c31892f980f8bfd1a6e910ff1ebc3f778211377f35227e"
        );
    }

    #[test]
    fn five_leaves_match_manual_tree() {
        let data = items(&["node1", "node2", "node3", "node4", "node5"]);

        let leaf: Vec<Vec<u8>> = data.iter().map(|d| Sha256::digest(d).to_vec()).collect();
        let join = |a: &[u8], b: &[u8]| {
            let mut h = Sha256::new();
            h.update(a);
            h.update(b);
            h.finalize().to_vec()
        };

        let n21 = join(&leaf[0], &leaf[1]);
        let n22 = join(&leaf[2], &leaf[3]);
        let n23 = join(&leaf[4], &leaf[4]);
        let n31 = join(&n21, &n22);
        let n32 = join(&n23, &n23);
        let expected = join(&n31, &n32);

        assert_eq!(merkle_root(&data), expected);
    }
}
