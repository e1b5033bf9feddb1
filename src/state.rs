//! The walker's public entry point: [`WalkerBuilder`] configures a walk,
//! [`Walker`] runs it. Everything the strategy drivers need is bundled into
//! [`WalkContext`] so `strategy.rs` can stay a free function module instead
//! of a second copy of this state.

use crate::cache::Cache;
use crate::error::{ConfigError, Result};
use crate::filetype::FileType;
use crate::io_queue::IoQueue;
use crate::mount::MountTable;
use crate::path::PathBuilder;
use crate::queue::{Queue, QueueFlags};
use crate::record::RecordArena;
use crate::strategy;
use crate::trie::PrunedPaths;
use crate::types::{Action, Strategy, WalkFlags};
use crate::visit::Entry;
use std::path::PathBuf;

const DEFAULT_NOPENFD: usize = 32;
const DEFAULT_NTHREADS: usize = 4;

/// Everything a single walk pass threads through. Kept together so
/// `strategy::run_single_pass`/`run_ids` can take one `&mut` parameter
/// instead of a handful of loosely related ones.
pub(crate) struct WalkContext {
    pub(crate) arena: RecordArena,
    pub(crate) cache: Cache,
    pub(crate) io: IoQueue,
    pub(crate) dir_queue: Queue,
    pub(crate) file_queue: Queue,
    pub(crate) path_builder: PathBuilder,
    pub(crate) flags: WalkFlags,
    pub(crate) mount: Option<Box<dyn MountTable>>,
    pub(crate) pruned: PrunedPaths,
}

/// Configures and launches a traversal.
pub struct WalkerBuilder {
    paths: Vec<PathBuf>,
    nopenfd: usize,
    nthreads: usize,
    flags: WalkFlags,
    strategy: Strategy,
    mount: Option<Box<dyn MountTable>>,
}

impl Default for WalkerBuilder {
    fn default() -> Self {
        Self {
            paths: Vec::new(),
            nopenfd: DEFAULT_NOPENFD,
            nthreads: DEFAULT_NTHREADS,
            flags: WalkFlags::DETECT_CYCLES,
            strategy: Strategy::Bfs,
            mount: None,
        }
    }
}

impl WalkerBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn path(mut self, path: impl Into<PathBuf>) -> Self {
        self.paths.push(path.into());
        self
    }

    #[must_use]
    pub fn paths(mut self, paths: impl IntoIterator<Item = impl Into<PathBuf>>) -> Self {
        self.paths.extend(paths.into_iter().map(Into::into));
        self
    }

    /// Maximum number of file descriptors (including open `DIR*` streams)
    /// the walk may hold at once. Must be at least 2.
    #[must_use]
    pub const fn nopenfd(mut self, n: usize) -> Self {
        self.nopenfd = n;
        self
    }

    #[must_use]
    pub const fn nthreads(mut self, n: usize) -> Self {
        self.nthreads = n;
        self
    }

    #[must_use]
    pub const fn flags(mut self, flags: WalkFlags) -> Self {
        self.flags = flags;
        self
    }

    #[must_use]
    pub const fn strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    #[must_use]
    pub fn mount_table(mut self, table: impl MountTable + 'static) -> Self {
        self.mount = Some(Box::new(table));
        self
    }

    /// Run the walk, invoking `callback` once per visited entry (twice, for
    /// directories, when `WalkFlags::POST_ORDER` is set).
    pub fn run(self, mut callback: impl FnMut(&Entry) -> Action) -> Result<()> {
        if self.nopenfd < 2 {
            return Err(ConfigError::TooFewDescriptors {
                requested: self.nopenfd,
            }
            .into());
        }
        if self.paths.is_empty() {
            return Err(ConfigError::NoPaths.into());
        }

        let queue_flags = queue_flags_for(self.strategy, self.flags, self.nthreads);
        let mut ctx = WalkContext {
            arena: RecordArena::new(),
            cache: Cache::new(self.nopenfd),
            io: IoQueue::new(self.nthreads),
            // Only directory opens are ever dispatched to the worker pool,
            // so only the directory queue needs the balance heuristic; but
            // every directory's open can complete out of order, so it
            // always needs strict delivery order to keep descent
            // depth-monotonic. The file queue only needs the same guarantee
            // when it's buffered (i.e. when completions could otherwise
            // reorder it).
            dir_queue: Queue::new(queue_flags | QueueFlags::BALANCE | QueueFlags::ORDER),
            file_queue: Queue::new(if queue_flags.contains(QueueFlags::BUFFER) {
                queue_flags | QueueFlags::ORDER
            } else {
                queue_flags
            }),
            path_builder: PathBuilder::new(),
            flags: self.flags,
            mount: self.mount,
            pruned: PrunedPaths::new(),
        };

        match self.strategy {
            Strategy::Bfs | Strategy::Dfs => {
                strategy::run_single_pass(&mut ctx, &self.paths, None, None, &mut callback)?;
            }
            Strategy::Ids => strategy::run_ids(&mut ctx, &self.paths, false, &mut callback)?,
            Strategy::Eds => strategy::run_ids(&mut ctx, &self.paths, true, &mut callback)?,
        }

        Ok(())
    }
}

/// Whether entries must be buffered before reaching `waiting`, per bfs's
/// `bftw_must_buffer` table: sorting needs every sibling collected first,
/// single-threaded DFS needs strict stack order preserved across what would
/// otherwise be interleaved pushes, and a stat-hungry walk run with worker
/// threads needs buffering so out-of-order completions don't reorder
/// siblings the caller asked to see sorted by arrival.
fn queue_flags_for(strategy: Strategy, flags: WalkFlags, nthreads: usize) -> QueueFlags {
    let mut qf = QueueFlags::empty();
    let dfs = matches!(strategy, Strategy::Dfs);
    if dfs {
        qf |= QueueFlags::LIFO;
    }
    let must_buffer = flags.contains(WalkFlags::SORT)
        || flags.contains(WalkFlags::BUFFER)
        || dfs
        || (nthreads > 1 && flags.contains(WalkFlags::STAT));
    if must_buffer {
        qf |= QueueFlags::BUFFER;
    }
    qf
}

pub(crate) fn root_file_type(path: &std::path::Path, follow: bool) -> (FileType, Option<i32>) {
    let Ok(cpath) = std::ffi::CString::new(path.as_os_str().as_encoded_bytes()) else {
        return (FileType::Error, Some(libc::EINVAL));
    };
    let mut st: libc::stat = unsafe { std::mem::zeroed() };
    // SAFETY: cpath is NUL-terminated, st is a freshly zeroed out-param.
    let rc = unsafe {
        if follow {
            libc::stat(cpath.as_ptr(), &mut st)
        } else {
            libc::lstat(cpath.as_ptr(), &mut st)
        }
    };
    if rc < 0 {
        (
            FileType::Error,
            std::io::Error::last_os_error().raw_os_error(),
        )
    } else {
        (FileType::from_mode(st.st_mode), None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_too_few_descriptors() {
        let result = WalkerBuilder::new().path(".").nopenfd(1).run(|_| Action::Continue);
        assert!(matches!(
            result,
            Err(crate::error::WalkError::Config(ConfigError::TooFewDescriptors { requested: 1 }))
        ));
    }

    #[test]
    fn rejects_no_paths() {
        let result = WalkerBuilder::new().run(|_| Action::Continue);
        assert!(matches!(
            result,
            Err(crate::error::WalkError::Config(ConfigError::NoPaths))
        ));
    }
}
