//! A byte-keyed trie of pruned paths, used by iterative/exponential
//! deepening (§4.8) to remember which subtrees an earlier bounded pass
//! already pruned, so a later, deeper pass doesn't re-descend into them.
//!
//! A `HashSet<String>` would do the same job; the trie is kept because
//! lookups during deepening are always prefix checks ("is this path, or
//! any ancestor of it, already pruned"), which a trie answers by walking
//! down once instead of testing every stored string.

use std::collections::HashMap;

#[derive(Default)]
struct Node {
    children: HashMap<u8, Node>,
    pruned: bool,
}

/// Tracks which paths were pruned in a previous deepening pass.
#[derive(Default)]
pub struct PrunedPaths {
    root: Node,
}

impl PrunedPaths {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `path` as pruned.
    pub fn insert(&mut self, path: &str) {
        let mut node = &mut self.root;
        for byte in path.bytes() {
            node = node.children.entry(byte).or_default();
        }
        node.pruned = true;
    }

    /// True if `path` was pruned, or any ancestor directory of `path` was.
    ///
    /// A pruned node only covers `path` if the matched prefix ends at a path
    /// component boundary (the full path, or the next byte is `/`); matching
    /// a raw byte prefix would make pruning `a/b` also cover `a/bb`.
    #[must_use]
    pub fn covers(&self, path: &str) -> bool {
        let bytes = path.as_bytes();
        let mut node = &self.root;
        if node.pruned {
            return true;
        }
        for (i, &byte) in bytes.iter().enumerate() {
            match node.children.get(&byte) {
                Some(next) => {
                    node = next;
                    if node.pruned && (i + 1 == bytes.len() || bytes[i + 1] == b'/') {
                        return true;
                    }
                }
                None => return false,
            }
        }
        false
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.root.children.is_empty() && !self.root.pruned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_path_is_covered() {
        let mut t = PrunedPaths::new();
        t.insert("a/b");
        assert!(t.covers("a/b"));
        assert!(!t.covers("a/c"));
    }

    #[test]
    fn descendant_of_a_pruned_path_is_covered() {
        let mut t = PrunedPaths::new();
        t.insert("a/b");
        assert!(t.covers("a/b/c/d"));
    }

    #[test]
    fn unrelated_prefix_is_not_covered() {
        let mut t = PrunedPaths::new();
        t.insert("a/bb");
        assert!(!t.covers("a/b"));
    }

    #[test]
    fn sibling_sharing_a_byte_prefix_is_not_covered() {
        let mut t = PrunedPaths::new();
        t.insert("a/b");
        assert!(!t.covers("a/bb"));
        assert!(t.covers("a/b/c"));
    }
}
