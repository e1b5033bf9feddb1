//! Incremental path reconstruction (§4.5).
//!
//! Rebuilding a full path from scratch on every visit means re-walking the
//! parent chain back to a root each time. Instead, a single reusable buffer
//! tracks which record it currently represents (`previous`); each call only
//! pops components back to the common ancestor of `previous` and the target,
//! then pushes the new suffix forward.

use crate::record::{RecordArena, RecordId};

/// A path buffer that remembers what it last represented, so repeated calls
/// only do the work of the path's changed suffix.
#[derive(Default)]
pub struct PathBuilder {
    buf: String,
    /// Chain of ids, root-to-leaf, that `buf` currently spells out.
    chain: Vec<RecordId>,
}

impl PathBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            buf: String::new(),
            chain: Vec::new(),
        }
    }

    /// Rebuild `self.buf` to represent `id`, reusing whatever prefix is
    /// already shared with the path this buffer last represented.
    pub fn build(&mut self, arena: &RecordArena, id: RecordId) -> &str {
        let mut target_chain = Vec::new();
        let mut cursor = Some(id);
        while let Some(cur) = cursor {
            target_chain.push(cur);
            cursor = arena.get(cur).parent;
        }
        target_chain.reverse();

        let common = self
            .chain
            .iter()
            .zip(target_chain.iter())
            .take_while(|(a, b)| a == b)
            .count();

        // Truncate buf back to the end of the shared prefix.
        if common == 0 {
            self.buf.clear();
        } else {
            let keep = arena.get(target_chain[common - 1]).child_nameoff() - 1;
            self.buf.truncate(keep.min(self.buf.len()));
        }

        for node in &target_chain[common..] {
            let record = arena.get(*node);
            if !self.buf.is_empty() && !self.buf.ends_with('/') {
                self.buf.push('/');
            }
            self.buf.push_str(&record.name);
        }

        self.chain = target_chain;
        &self.buf
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filetype::FileType;
    use crate::record::{FileRecord, StatCache};

    fn push_child(arena: &mut RecordArena, parent: Option<RecordId>, name: &str) -> RecordId {
        let depth = parent.map_or(0, |p| arena.get(p).depth + 1);
        let root = parent.map_or_else(|| RecordId::DANGLING, |p| arena.get(p).root);
        let nameoff = parent.map_or(0, |p| arena.get(p).child_nameoff());
        let id = arena.insert(FileRecord {
            parent,
            root,
            queue_link: None,
            ready_link: None,
            lru_prev: None,
            lru_next: None,
            depth,
            refcount: 1,
            pincount: 0,
            in_lru: false,
            fd: None,
            ioqueued: false,
            dir: None,
            file_type: FileType::Directory,
            dev: None,
            ino: None,
            stat: StatCache::new(),
            name: name.into(),
            nameoff,
            namelen: name.len(),
        });
        if parent.is_none() {
            arena.get_mut(id).root = id;
        }
        id
    }

    #[test]
    fn rebuilds_full_path_for_a_nested_record() {
        let mut arena = RecordArena::new();
        let root = push_child(&mut arena, None, "a");
        let mid = push_child(&mut arena, Some(root), "b");
        let leaf = push_child(&mut arena, Some(mid), "c");

        let mut builder = PathBuilder::new();
        assert_eq!(builder.build(&arena, leaf), "a/b/c");
    }

    #[test]
    fn reuses_shared_prefix_between_calls() {
        let mut arena = RecordArena::new();
        let root = push_child(&mut arena, None, "a");
        let mid = push_child(&mut arena, Some(root), "b");
        let leaf1 = push_child(&mut arena, Some(mid), "c");
        let leaf2 = push_child(&mut arena, Some(mid), "d");

        let mut builder = PathBuilder::new();
        assert_eq!(builder.build(&arena, leaf1), "a/b/c");
        assert_eq!(builder.build(&arena, leaf2), "a/b/d");
    }
}
