//! The file record arena.
//!
//! Every entry discovered during a walk gets one [`FileRecord`], owned by a
//! [`RecordArena`] and addressed by a [`RecordId`] handle rather than a raw
//! pointer. This is the Rust rendering of the source engine's intrusive,
//! refcounted, parent-linked `bftw_file` nodes: the three link fields each
//! record participates in (queue chain, ready chain, LRU chain) become
//! plain `Option<RecordId>` fields, and the arena itself is single-threaded:
//! only the main thread that owns a walk ever touches it.

use crate::filetype::FileType;
use std::os::unix::io::RawFd;

/// A handle to a [`FileRecord`] in a [`RecordArena`].
///
/// Carries a generation counter so a stale handle (one whose slot has been
/// freed and reused) can never silently alias the wrong record; using one
/// after its record is freed is a programming error and will panic in
/// debug builds via [`RecordArena::get`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordId {
    index: u32,
    generation: u32,
}

impl RecordId {
    /// A placeholder used only in the instant between allocating a record
    /// and learning its own id (self-referential `root` field on a fresh
    /// root record); always overwritten before the record is read.
    pub(crate) const DANGLING: Self = Self {
        index: u32::MAX,
        generation: u32::MAX,
    };
}

/// The follow/no-follow `stat()` result for one record, with the same
/// sharing rule as the source engine: an no-follow stat on something that
/// turns out not to be a symlink also answers a pending follow-stat query,
/// and a `TRYFOLLOW` stat that hits `ENOENT` falls back to an implied
/// no-follow result.
#[derive(Debug, Clone, Copy)]
pub struct StatBuf {
    pub dev: u64,
    pub ino: u64,
    pub mode: u32,
    pub size: i64,
    pub mtime: i64,
}

#[derive(Debug, Clone, Copy, Default)]
enum StatSlot {
    #[default]
    Empty,
    Ok(StatBuf),
    Err(i32),
}

/// Which flavor of stat is being asked for or recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatFlavor {
    Follow,
    NoFollow,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct StatCache {
    follow: StatSlot,
    nofollow: StatSlot,
}

impl StatCache {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            follow: StatSlot::Empty,
            nofollow: StatSlot::Empty,
        }
    }

    /// Record the outcome of a stat call, sharing it with the other flavor
    /// when the result proves they'd have agreed.
    pub fn cache(&mut self, flavor: StatFlavor, try_follow: bool, result: Result<StatBuf, i32>) {
        match flavor {
            StatFlavor::NoFollow => {
                self.nofollow = to_slot(result);
                if let Ok(buf) = result {
                    if FileType::from_mode(buf.mode) != FileType::Symlink {
                        // non-link: follow and no-follow agree
                        self.follow = StatSlot::Ok(buf);
                    }
                }
            }
            StatFlavor::Follow if try_follow => match result {
                Err(_) => self.follow = to_slot(result),
                Ok(buf) if FileType::from_mode(buf.mode) == FileType::Symlink => {
                    self.nofollow = StatSlot::Ok(buf);
                    self.follow = StatSlot::Err(libc::ENOENT);
                }
                Ok(buf) => self.follow = StatSlot::Ok(buf),
            },
            StatFlavor::Follow => self.follow = to_slot(result),
        }
    }

    /// Return a cached result without making a syscall, or `None` if
    /// nothing is cached yet for this flavor.
    #[must_use]
    pub fn cached(&self, flavor: StatFlavor, try_follow: bool) -> Option<Result<StatBuf, i32>> {
        match flavor {
            StatFlavor::NoFollow => from_slot(self.nofollow),
            StatFlavor::Follow => {
                let direct = from_slot(self.follow);
                if try_follow {
                    match direct {
                        Some(Err(e)) if e == libc::ENOENT => from_slot(self.nofollow).or(direct),
                        other => other,
                    }
                } else {
                    direct
                }
            }
        }
    }

    /// Fill any still-empty slots in `self` from an already-populated cache
    /// (used when a directory's own stat is known from its parent's readdir
    /// pass, per `bftw_stat_fill`).
    pub fn fill_from(&mut self, other: &Self) {
        if matches!(self.follow, StatSlot::Empty) {
            self.follow = other.follow;
        }
        if matches!(self.nofollow, StatSlot::Empty) {
            self.nofollow = other.nofollow;
        }
    }
}

fn to_slot(result: Result<StatBuf, i32>) -> StatSlot {
    match result {
        Ok(buf) => StatSlot::Ok(buf),
        Err(e) => StatSlot::Err(e),
    }
}

fn from_slot(slot: StatSlot) -> Option<Result<StatBuf, i32>> {
    match slot {
        StatSlot::Empty => None,
        StatSlot::Ok(buf) => Some(Ok(buf)),
        StatSlot::Err(e) => Some(Err(e)),
    }
}

/// An owned, open directory stream (wraps `libc::opendir`'s `DIR *`).
///
/// This is the record's "owned open directory handle" from the data model;
/// closing it releases both the stream and its underlying descriptor.
#[derive(Debug)]
pub struct DirHandle(std::ptr::NonNull<libc::DIR>);

// SAFETY: the handle is only ever touched from the single main thread that
// owns the `RecordArena`; it is never shared across threads.
unsafe impl Send for DirHandle {}

impl DirHandle {
    /// # Safety
    /// `ptr` must be a valid, live `DIR *` returned by `opendir`/`fdopendir`.
    #[must_use]
    pub const unsafe fn from_raw(ptr: std::ptr::NonNull<libc::DIR>) -> Self {
        Self(ptr)
    }

    #[must_use]
    pub fn as_ptr(&self) -> *mut libc::DIR {
        self.0.as_ptr()
    }

    #[must_use]
    pub fn fd(&self) -> RawFd {
        // SAFETY: self.0 is a live DIR* for the lifetime of this handle.
        unsafe { libc::dirfd(self.0.as_ptr()) }
    }

    /// Hand the raw `DIR *` out without running `Drop`, so an async close
    /// job can take ownership of the close instead of this handle's own
    /// destructor doing it synchronously.
    #[must_use]
    pub fn into_raw(self) -> std::ptr::NonNull<libc::DIR> {
        let ptr = self.0;
        std::mem::forget(self);
        ptr
    }
}

impl Drop for DirHandle {
    fn drop(&mut self) {
        // SAFETY: self.0 is a live DIR* owned uniquely by this handle.
        unsafe {
            libc::closedir(self.0.as_ptr());
        }
    }
}

/// One discovered filesystem entry.
///
/// Link fields (`queue_link`, `ready_link`, `lru_prev`/`lru_next`) are
/// intentionally plain and public-to-crate: the queue and cache modules
/// splice records into their respective lists directly, the same way the
/// source's `bftw_queue`/`bftw_cache` code reaches into `bftw_file` fields.
#[derive(Debug)]
pub struct FileRecord {
    pub parent: Option<RecordId>,
    pub root: RecordId,

    pub(crate) queue_link: Option<RecordId>,
    pub(crate) ready_link: Option<RecordId>,
    pub(crate) lru_prev: Option<RecordId>,
    pub(crate) lru_next: Option<RecordId>,

    pub depth: u32,
    pub refcount: u32,
    pub pincount: u32,

    /// Whether this record currently sits in `Cache`'s LRU list. Needed
    /// because `lru_remove` must never run against a record that was never
    /// added (it would null out the list's head/tail instead of being a
    /// no-op); pinned records and records with no open handle are never
    /// in the list.
    pub(crate) in_lru: bool,

    pub fd: Option<RawFd>,
    pub ioqueued: bool,
    pub dir: Option<DirHandle>,

    pub file_type: FileType,
    pub dev: Option<u64>,
    pub ino: Option<u64>,

    pub stat: StatCache,

    pub name: Box<str>,
    pub nameoff: usize,
    pub namelen: usize,
}

impl FileRecord {
    /// Offset a name must start at for a child of this record, per invariant 5:
    /// parent's `nameoff + namelen`, plus one unless the parent's name already
    /// ends with `/`.
    #[must_use]
    pub fn child_nameoff(&self) -> usize {
        let end = self.nameoff + self.namelen;
        if self.name.ends_with('/') {
            end
        } else {
            end + 1
        }
    }
}

struct Slot {
    generation: u32,
    record: Option<FileRecord>,
}

/// Single-owner slab of [`FileRecord`]s, main-thread only.
#[derive(Default)]
pub struct RecordArena {
    slots: Vec<Slot>,
    free: Vec<u32>,
}

impl RecordArena {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
        }
    }

    /// Insert a new record, returning its handle. `refcount` starts at 1.
    pub fn insert(&mut self, record: FileRecord) -> RecordId {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.record = Some(record);
            RecordId {
                index,
                generation: slot.generation,
            }
        } else {
            let index = u32::try_from(self.slots.len()).expect("record arena overflow");
            self.slots.push(Slot {
                generation: 0,
                record: Some(record),
            });
            RecordId {
                index,
                generation: 0,
            }
        }
    }

    #[must_use]
    pub fn get(&self, id: RecordId) -> &FileRecord {
        let slot = &self.slots[id.index as usize];
        debug_assert_eq!(slot.generation, id.generation, "use of freed RecordId");
        slot.record.as_ref().expect("use of freed RecordId")
    }

    #[must_use]
    pub fn get_mut(&mut self, id: RecordId) -> &mut FileRecord {
        let slot = &mut self.slots[id.index as usize];
        debug_assert_eq!(slot.generation, id.generation, "use of freed RecordId");
        slot.record.as_mut().expect("use of freed RecordId")
    }

    /// Free a record's slot, bumping its generation so old handles can
    /// never alias the reused slot. Returns the record so the caller can
    /// finish tearing it down (closing descriptors, decrementing a parent).
    pub fn remove(&mut self, id: RecordId) -> FileRecord {
        let slot = &mut self.slots[id.index as usize];
        debug_assert_eq!(slot.generation, id.generation, "double free of RecordId");
        let record = slot.record.take().expect("double free of RecordId");
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        record
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
