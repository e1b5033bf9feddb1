//! The descriptor-budgeted LRU cache of open directory handles (§4.3).
//!
//! Every open `fd`/`DIR*` a walk holds counts against `capacity`. When a new
//! directory needs to be opened and the budget is full, the least-recently
//! used unpinned, unreferenced record is evicted first. A sub-budget,
//! `dir_limit`, caps how many of those open descriptors may be `DIR*`
//! streams rather than plain `fd`s, since a `DIR*` costs extra buffer space
//! beyond the descriptor itself.

use crate::error::{Result, WalkError};
use crate::io_queue::{IoJob, IoQueue};
use crate::record::{RecordArena, RecordId};
use std::os::unix::io::RawFd;

/// Doubly-linked LRU list of open records, threaded through
/// `lru_prev`/`lru_next`. The `target` cursor is where new roots (depth 0)
/// are inserted, keeping command-line roots ahead of their descendants in
/// eviction order.
pub struct Cache {
    capacity: usize,
    dir_limit: usize,
    open_dirs: usize,
    open_files: usize,
    head: Option<RecordId>,
    tail: Option<RecordId>,
    target: Option<RecordId>,
}

impl Cache {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let dir_limit = capacity.saturating_sub(1).min(1024);
        Self {
            capacity,
            dir_limit,
            open_dirs: 0,
            open_files: 0,
            head: None,
            tail: None,
            target: None,
        }
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub const fn open_count(&self) -> usize {
        self.open_dirs + self.open_files
    }

    /// Insert a freshly opened record at the front of its eligible span,
    /// keeping depth-0 roots ahead of the cursor (`bftw_lru_add`).
    pub fn lru_add(&mut self, arena: &mut RecordArena, id: RecordId) {
        let next = self.target.or(self.head);
        self.splice_before(arena, id, next);
        if arena.get(id).depth == 0 {
            self.target = Some(id);
        }
        arena.get_mut(id).in_lru = true;
    }

    pub fn lru_remove(&mut self, arena: &mut RecordArena, id: RecordId) {
        let (prev, next) = {
            let r = arena.get(id);
            (r.lru_prev, r.lru_next)
        };
        match prev {
            Some(p) => arena.get_mut(p).lru_next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => arena.get_mut(n).lru_prev = prev,
            None => self.tail = prev,
        }
        if self.target == Some(id) {
            self.target = next;
        }
        let r = arena.get_mut(id);
        r.lru_prev = None;
        r.lru_next = None;
        r.in_lru = false;
    }

    /// Pin `id` so it cannot be evicted while a background job holds a raw
    /// reference to its descriptor (§4.1's "pin" contract). The first pin
    /// removes it from the LRU list entirely; nested pins are just counted.
    pub fn pin(&mut self, arena: &mut RecordArena, id: RecordId) {
        let was_unpinned = arena.get(id).pincount == 0;
        arena.get_mut(id).pincount += 1;
        if was_unpinned && arena.get(id).in_lru {
            self.lru_remove(arena, id);
        }
    }

    /// Undo one `pin`. Once the last pin is released, a record with an open
    /// handle rejoins the LRU list so it becomes evictable again.
    pub fn unpin(&mut self, arena: &mut RecordArena, id: RecordId) {
        let r = arena.get_mut(id);
        debug_assert!(r.pincount > 0, "unbalanced unpin");
        r.pincount -= 1;
        let r = arena.get(id);
        if r.pincount == 0 && !r.in_lru && (r.fd.is_some() || r.dir.is_some()) {
            self.lru_add(arena, id);
        }
    }

    fn splice_before(&mut self, arena: &mut RecordArena, id: RecordId, before: Option<RecordId>) {
        match before {
            Some(b) => {
                let prev = arena.get(b).lru_prev;
                arena.get_mut(id).lru_prev = prev;
                arena.get_mut(id).lru_next = Some(b);
                arena.get_mut(b).lru_prev = Some(id);
                match prev {
                    Some(p) => arena.get_mut(p).lru_next = Some(id),
                    None => self.head = Some(id),
                }
            }
            None => {
                arena.get_mut(id).lru_prev = self.tail;
                arena.get_mut(id).lru_next = None;
                if let Some(t) = self.tail {
                    arena.get_mut(t).lru_next = Some(id);
                }
                self.tail = Some(id);
                if self.head.is_none() {
                    self.head = Some(id);
                }
            }
        }
    }

    /// Record that `id`'s descriptor or `DIR*` is now open, charging it
    /// against the relevant budget.
    pub fn charge(&mut self, is_dir: bool) {
        if is_dir {
            self.open_dirs += 1;
        } else {
            self.open_files += 1;
        }
    }

    pub fn uncharge(&mut self, is_dir: bool) {
        if is_dir {
            self.open_dirs -= 1;
        } else {
            self.open_files -= 1;
        }
    }

    #[must_use]
    pub const fn dir_budget_exhausted(&self) -> bool {
        self.open_dirs >= self.dir_limit
    }

    #[must_use]
    pub const fn budget_exhausted(&self) -> bool {
        self.open_count() >= self.capacity
    }

    /// Evict the least-recently-used record with no pins, closing whatever
    /// it has open. Returns `false` if nothing is evictable.
    ///
    /// Closing is dispatched to `io` rather than done synchronously, so
    /// eviction never blocks the main thread on the very descriptor
    /// pressure that triggered it; the handle's budget is credited back
    /// only once the close completion is applied.
    pub fn evict_one(&mut self, arena: &mut RecordArena, io: &mut IoQueue) -> bool {
        let mut cursor = self.tail;
        while let Some(id) = cursor {
            let r = arena.get(id);
            cursor = r.lru_prev;
            if r.pincount == 0 && (r.fd.is_some() || r.dir.is_some()) {
                self.close_handles(io, arena, id);
                self.lru_remove(arena, id);
                return true;
            }
        }
        false
    }

    /// Submit an async close for whatever descriptor/stream `id` holds
    /// open, without removing it from the LRU list or freeing the record
    /// itself. Budget is uncharged when the close completion is applied
    /// (`strategy::apply_completion`), not here.
    pub fn close_handles(&mut self, io: &mut IoQueue, arena: &mut RecordArena, id: RecordId) {
        let r = arena.get_mut(id);
        if let Some(dir) = r.dir.take() {
            let dirp = dir.into_raw();
            io.submit(IoJob::CloseDir {
                id,
                dirp: dirp.as_ptr() as usize,
            });
        } else if let Some(fd) = r.fd.take() {
            io.submit(IoJob::Close { id, fd });
        }
    }

    /// Get a plain, cached descriptor for `id`, opening and charging it
    /// against the file budget only if nothing is already open for it.
    /// Capacity must already have been reserved by the caller
    /// (`strategy::reserve_capacity`) -- this only opens and charges.
    pub fn open_fd(&mut self, arena: &mut RecordArena, id: RecordId) -> Result<RawFd> {
        if let Some(fd) = arena.get(id).fd {
            return Ok(fd);
        }
        if let Some(dir) = &arena.get(id).dir {
            return Ok(dir.fd());
        }
        let fd = self.open_relative(arena, id, true)?;
        arena.get_mut(id).fd = Some(fd);
        self.charge(false);
        self.lru_add(arena, id);
        Ok(fd)
    }

    /// Open `id`'s directory relative to its nearest open ancestor,
    /// decomposing into per-component `openat` calls on `ENAMETOOLONG`
    /// (the source engine's `bftw_file_open` fallback for paths the kernel
    /// won't accept in one shot).
    pub fn open_relative(
        &mut self,
        arena: &mut RecordArena,
        id: RecordId,
        want_dir: bool,
    ) -> Result<RawFd> {
        // Walk to the nearest ancestor (inclusive) with a live fd.
        let mut chain = Vec::new();
        let mut cursor = Some(id);
        let base_fd = loop {
            let Some(cur) = cursor else {
                break libc::AT_FDCWD;
            };
            if let Some(fd) = arena.get(cur).fd {
                break fd;
            }
            if let Some(dir) = &arena.get(cur).dir {
                break dir.fd();
            }
            chain.push(cur);
            cursor = arena.get(cur).parent;
        };
        chain.reverse();

        let mut fd = base_fd;
        let mut opened_intermediate: Vec<RawFd> = Vec::new();
        for (i, &node) in chain.iter().enumerate() {
            let is_last = i + 1 == chain.len();
            let name = arena.get(node).name.clone();
            let flags = if is_last && !want_dir {
                libc::O_RDONLY | libc::O_CLOEXEC | libc::O_NOFOLLOW
            } else {
                libc::O_RDONLY | libc::O_CLOEXEC | libc::O_DIRECTORY
            };
            // SAFETY: name is a NUL-terminated-on-the-fly component, fd is a
            // valid directory descriptor (or AT_FDCWD).
            let opened = unsafe {
                let cname = std::ffi::CString::new(name.as_bytes())
                    .map_err(|_| WalkError::ResourceExhausted("path contains NUL byte"))?;
                libc::openat(fd, cname.as_ptr(), flags)
            };
            if opened < 0 {
                for f in opened_intermediate.into_iter().rev() {
                    // SAFETY: f was opened by this function and not yet owned.
                    unsafe {
                        libc::close(f);
                    }
                }
                return Err(crate::error::WalkError::Io(std::io::Error::last_os_error()));
            }
            if fd != base_fd {
                opened_intermediate.push(fd);
            }
            fd = opened;
        }

        for f in opened_intermediate {
            // SAFETY: intermediate descriptors are no longer needed once the
            // final one is open.
            unsafe {
                libc::close(f);
            }
        }

        Ok(fd)
    }

    /// Dissociate a record's `DIR*` from its descriptor, per `bftw_unwrapdir`:
    ///
    /// - pinned (a background job holds its fd): leave the stream untouched.
    /// - not pinned, no live children (`refcount <= 1`, i.e. only its own
    ///   reference remains): the stream is no longer needed at all, close it.
    /// - not pinned, has live children: duplicate the fd so the caller keeps
    ///   an owned descriptor and close the now-redundant stream.
    pub fn unwrap_dir(
        &mut self,
        arena: &mut RecordArena,
        io: &mut IoQueue,
        id: RecordId,
    ) -> Result<Option<RawFd>> {
        let r = arena.get(id);
        let Some(dir) = &r.dir else { return Ok(None) };

        if r.pincount > 0 {
            return Ok(None);
        }

        if r.refcount <= 1 {
            self.close_handles(io, arena, id);
            return Ok(None);
        }

        let dirfd = dir.fd();
        // SAFETY: dirfd is valid for the lifetime of the DIR* we're about to drop.
        let dup = unsafe { libc::fcntl(dirfd, libc::F_DUPFD_CLOEXEC, 0) };
        if dup < 0 {
            return Err(WalkError::Io(std::io::Error::last_os_error()));
        }
        self.close_handles(io, arena, id);
        arena.get_mut(id).fd = Some(dup);
        self.charge(false);
        Ok(Some(dup))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dir_limit_is_capped_at_1024_and_below_capacity() {
        assert_eq!(Cache::new(10).dir_limit, 9);
        assert_eq!(Cache::new(4096).dir_limit, 1024);
        assert_eq!(Cache::new(2).dir_limit, 1);
    }

    #[test]
    fn budget_exhausted_tracks_total_open_count() {
        let mut c = Cache::new(2);
        assert!(!c.budget_exhausted());
        c.charge(false);
        assert!(!c.budget_exhausted());
        c.charge(true);
        assert!(c.budget_exhausted());
    }
}
