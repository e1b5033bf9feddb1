//! Per-entry visit logic (§4.5/§4.6): resolving an entry's type, checking it
//! against the correctness invariants (cycle detection, mount boundaries),
//! and handing it to the caller's callback.

use crate::filetype::FileType;
use crate::mount::MountTable;
use crate::record::{FileRecord, RecordArena, RecordId, StatBuf, StatCache, StatFlavor};
use crate::types::{Action, Visit, WalkFlags};
use std::os::unix::io::RawFd;

/// What the caller's callback sees for one entry.
#[derive(Debug)]
pub struct Entry<'a> {
    pub path: &'a str,
    /// The root path this entry was discovered under (one of the paths the
    /// walk was started with), so a caller juggling several roots can tell
    /// which one produced this entry.
    pub root: &'a str,
    pub file_type: FileType,
    pub depth: u32,
    pub visit: Visit,
    /// Byte offset of this entry's basename within `path`.
    pub nameoff: usize,
    /// An already-open directory descriptor this entry can be reached from
    /// with `at_path` relative to it (`openat`-style), when the parent's
    /// handle happens to still be open. `None` means `at_path` is only
    /// usable as `AT_FDCWD`-relative (i.e. it equals `path`).
    pub at_fd: Option<RawFd>,
    pub at_path: &'a str,
    /// Set when resolving this entry's type or stat failed and
    /// `WalkFlags::RECOVER` let the walk continue anyway.
    pub error: Option<i32>,
    stat_cache: StatCache,
}

impl<'a> Entry<'a> {
    /// This entry's basename, i.e. `path` with every ancestor component
    /// stripped.
    #[must_use]
    pub fn name(&self) -> &'a str {
        &self.path[self.nameoff..]
    }

    /// Stat this entry, following symlinks if `follow` is set. Returns a
    /// cached result from the walk's own readdir/stat pass when one is
    /// available (the same sharing rule as [`crate::record::StatCache`]);
    /// otherwise makes a fresh `fstatat` call relative to `at_fd`/`at_path`
    /// so the caller never has to re-walk from the root to inspect an
    /// entry it was just handed.
    pub fn stat(&self, follow: bool) -> Result<StatBuf, i32> {
        let flavor = if follow {
            StatFlavor::Follow
        } else {
            StatFlavor::NoFollow
        };
        if let Some(cached) = self.stat_cache.cached(flavor, follow) {
            return cached;
        }
        crate::io_queue::stat_at(self.at_fd.unwrap_or(libc::AT_FDCWD), self.at_path, follow)
    }
}

/// Find an already-open descriptor `record` can be reached relative to, and
/// the path to use with it: the parent's `fd`/`DIR*` when it's still open
/// (paired with just this entry's basename), or `None` paired with the full
/// built path otherwise.
fn resolve_at<'a>(arena: &RecordArena, record: &'a FileRecord, path: &'a str) -> (Option<RawFd>, &'a str) {
    let parent_fd = record.parent.and_then(|p| {
        let pr = arena.get(p);
        pr.fd.or_else(|| pr.dir.as_ref().map(crate::record::DirHandle::fd))
    });
    match parent_fd {
        Some(fd) => (Some(fd), record.name.as_ref()),
        None => (None, path),
    }
}

/// Why a directory was not descended into, for diagnostics/logging only;
/// the caller only ever sees `Action::Prune` regardless of cause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Cycle,
    MountBoundary,
}

/// Walk a record's ancestor chain looking for one with the same
/// `(dev, ino)`, per the cycle-detection invariant (§3 invariant 7):
/// a directory cannot be its own descendant.
pub fn detect_cycle(arena: &RecordArena, id: RecordId) -> bool {
    let record = arena.get(id);
    let Some((dev, ino)) = record.dev.zip(record.ino) else {
        return false;
    };
    let mut cursor = record.parent;
    while let Some(ancestor) = cursor {
        let a = arena.get(ancestor);
        if a.dev == Some(dev) && a.ino == Some(ino) {
            return true;
        }
        cursor = a.parent;
    }
    false
}

/// True if `id`'s directory should not be descended into because it's on a
/// different device than its parent and mount-aware pruning is enabled.
///
/// When the caller supplied a [`MountTable`], a device change is only a
/// boundary if the table agrees the new device is actually a distinct
/// mount; without one, any device change is treated as a mount.
pub fn is_mount_boundary(
    arena: &RecordArena,
    id: RecordId,
    flags: WalkFlags,
    mount: Option<&dyn MountTable>,
) -> bool {
    if !flags.intersects(WalkFlags::SKIP_MOUNTS | WalkFlags::PRUNE_MOUNTS) {
        return false;
    }
    let record = arena.get(id);
    let Some(parent) = record.parent else {
        return false;
    };
    match (record.dev, arena.get(parent).dev) {
        (Some(dev), Some(parent_dev)) if dev != parent_dev => {
            mount.is_none_or(|m| m.is_mount_point(dev))
        }
        _ => false,
    }
}

/// Resolve the symlink-follow policy for one record, per §4.6: roots follow
/// under `FOLLOW_ROOTS`, everything else follows under `FOLLOW_ALL`.
#[must_use]
pub const fn should_follow(depth: u32, flags: WalkFlags) -> bool {
    if depth == 0 {
        flags.contains(WalkFlags::FOLLOW_ROOTS) || flags.contains(WalkFlags::FOLLOW_ALL)
    } else {
        flags.contains(WalkFlags::FOLLOW_ALL)
    }
}

/// Resolve an entry's `FileType`, using a cached readdir `d_type` hint when
/// it's trustworthy and `STAT` wasn't forced, otherwise falling back to
/// `stat`/`lstat`.
pub fn resolve_type(
    hint: FileType,
    flags: WalkFlags,
    cached: Option<Result<StatBuf, i32>>,
) -> (FileType, Option<i32>) {
    if hint != FileType::Unknown && !flags.contains(WalkFlags::STAT) {
        return (hint, None);
    }
    match cached {
        Some(Ok(buf)) => (FileType::from_mode(buf.mode), None),
        Some(Err(e)) => (FileType::Error, Some(e)),
        None => (hint, None),
    }
}

/// Build the [`Entry`] a callback sees and invoke it, translating the
/// caller's decision plus the correctness checks into one [`Action`].
pub fn call_back(
    arena: &RecordArena,
    id: RecordId,
    path: &str,
    visit: Visit,
    flags: WalkFlags,
    mount: Option<&dyn MountTable>,
    callback: &mut dyn FnMut(&Entry) -> Action,
) -> Action {
    let record = arena.get(id);

    if record.file_type.is_dir() && visit == Visit::Pre {
        if flags.contains(WalkFlags::DETECT_CYCLES) && detect_cycle(arena, id) {
            return Action::Prune;
        }
        if is_mount_boundary(arena, id, flags, mount) {
            if flags.contains(WalkFlags::SKIP_MOUNTS) {
                return Action::Prune;
            }
            if flags.contains(WalkFlags::PRUNE_MOUNTS) {
                // Deliver the mount root itself, but never its children.
                let (at_fd, at_path) = resolve_at(arena, record, path);
                let entry = Entry {
                    path,
                    root: arena.get(record.root).name.as_ref(),
                    file_type: record.file_type,
                    depth: record.depth,
                    visit,
                    nameoff: record.nameoff,
                    at_fd,
                    at_path,
                    error: None,
                    stat_cache: record.stat,
                };
                return if callback(&entry) == Action::Stop {
                    Action::Stop
                } else {
                    Action::Prune
                };
            }
        }
    }

    let error = match record.stat.cached(StatFlavor::NoFollow, false) {
        Some(Err(e)) if record.file_type == FileType::Error => Some(e),
        _ => None,
    };

    let (at_fd, at_path) = resolve_at(arena, record, path);
    let entry = Entry {
        path,
        root: arena.get(record.root).name.as_ref(),
        file_type: record.file_type,
        depth: record.depth,
        visit,
        nameoff: record.nameoff,
        at_fd,
        at_path,
        error,
        stat_cache: record.stat,
    };

    let action = callback(&entry);

    // A non-directory has nothing to descend into: `Continue` is equivalent
    // to `Prune` for it, per §3 invariant 4.
    if !record.file_type.is_dir() && action == Action::Continue {
        Action::Prune
    } else {
        action
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dir_record(
        arena: &mut RecordArena,
        parent: Option<RecordId>,
        dev: u64,
        ino: u64,
    ) -> RecordId {
        let depth = parent.map_or(0, |p| arena.get(p).depth + 1);
        let root = parent.map_or_else(|| RecordId::DANGLING, |p| arena.get(p).root);
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
            dev: Some(dev),
            ino: Some(ino),
            stat: StatCache::new(),
            name: "d".into(),
            nameoff: 0,
            namelen: 1,
        });
        if parent.is_none() {
            arena.get_mut(id).root = id;
        }
        id
    }

    #[test]
    fn detects_a_directory_that_is_its_own_ancestor() {
        let mut arena = RecordArena::new();
        let root = dir_record(&mut arena, None, 1, 100);
        let child = dir_record(&mut arena, Some(root), 1, 200);
        // Simulate a symlink loop: child's (dev, ino) matches root's.
        arena.get_mut(child).dev = Some(1);
        arena.get_mut(child).ino = Some(100);
        assert!(detect_cycle(&arena, child));
    }

    #[test]
    fn distinct_ancestors_are_not_a_cycle() {
        let mut arena = RecordArena::new();
        let root = dir_record(&mut arena, None, 1, 100);
        let child = dir_record(&mut arena, Some(root), 1, 200);
        assert!(!detect_cycle(&arena, child));
    }

    #[test]
    fn device_change_from_parent_is_a_mount_boundary() {
        let mut arena = RecordArena::new();
        let root = dir_record(&mut arena, None, 1, 100);
        let child = dir_record(&mut arena, Some(root), 2, 200);
        assert!(is_mount_boundary(
            &arena,
            child,
            WalkFlags::SKIP_MOUNTS,
            None
        ));
        assert!(!is_mount_boundary(
            &arena,
            root,
            WalkFlags::SKIP_MOUNTS,
            None
        ));
    }

    #[test]
    fn non_directory_continue_is_downgraded_to_prune() {
        let mut arena = RecordArena::new();
        let file = arena.insert(FileRecord {
            parent: None,
            root: RecordId::DANGLING,
            queue_link: None,
            ready_link: None,
            lru_prev: None,
            lru_next: None,
            depth: 0,
            refcount: 1,
            pincount: 0,
            in_lru: false,
            fd: None,
            ioqueued: false,
            dir: None,
            file_type: FileType::RegularFile,
            dev: None,
            ino: None,
            stat: StatCache::new(),
            name: "f".into(),
            nameoff: 0,
            namelen: 1,
        });
        let mut cb = |_: &Entry| Action::Continue;
        let action = call_back(
            &arena,
            file,
            "f",
            Visit::Pre,
            WalkFlags::empty(),
            None,
            &mut cb,
        );
        assert_eq!(action, Action::Prune);
    }
}
