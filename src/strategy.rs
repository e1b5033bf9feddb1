//! Drives a walk over a [`WalkContext`]: opens directories, reads their
//! entries, and calls back into the caller, in either a single unbounded
//! pass (BFS/DFS, §4.1) or a series of depth-banded passes (IDS/EDS, §4.8).

use crate::error::{Result, WalkError};
use crate::filetype::FileType;
use crate::io_queue::{IoCompletion, IoJob, IoResult};
use crate::queue::Queue;
use crate::record::{DirHandle, FileRecord, RecordArena, RecordId, StatCache, StatFlavor};
use crate::state::{root_file_type, WalkContext};
use crate::types::{Action, Visit, WalkFlags};
use crate::visit::{call_back, should_follow, Entry};
use std::ffi::CStr;
use std::os::unix::io::RawFd;
use std::path::PathBuf;

struct PassOutcome {
    stopped: bool,
    /// True if any entry was cut off by `max_depth` (i.e. there is more
    /// tree below this pass's bound).
    cut_off: bool,
}

pub(crate) fn run_single_pass(
    ctx: &mut WalkContext,
    roots: &[PathBuf],
    min_depth: Option<u32>,
    max_depth: Option<u32>,
    callback: &mut dyn FnMut(&Entry) -> Action,
) -> Result<()> {
    run_pass(
        ctx,
        roots,
        min_depth.unwrap_or(0),
        max_depth.unwrap_or(u32::MAX),
        callback,
    )?;
    Ok(())
}

pub(crate) fn run_ids(
    ctx: &mut WalkContext,
    roots: &[PathBuf],
    exponential: bool,
    callback: &mut dyn FnMut(&Entry) -> Action,
) -> Result<()> {
    let mut min_depth = 0u32;
    let mut max_depth = 1u32;
    loop {
        let outcome = run_pass(ctx, roots, min_depth, max_depth, callback)?;
        if outcome.stopped || !outcome.cut_off {
            return Ok(());
        }
        min_depth = max_depth;
        max_depth = if exponential {
            max_depth.saturating_mul(2)
        } else {
            max_depth + 1
        };
        ctx.arena = RecordArena::new();
        ctx.dir_queue = Queue::new(ctx.dir_queue.flags());
        ctx.file_queue = Queue::new(ctx.file_queue.flags());
        ctx.path_builder = crate::path::PathBuilder::new();
    }
}

fn run_pass(
    ctx: &mut WalkContext,
    roots: &[PathBuf],
    min_depth: u32,
    max_depth: u32,
    callback: &mut dyn FnMut(&Entry) -> Action,
) -> Result<PassOutcome> {
    let mut cut_off = false;

    for root_path in roots {
        let follow = should_follow(0, ctx.flags);
        let (file_type, err) = root_file_type(root_path, follow);
        let name: Box<str> = root_path.to_string_lossy().into_owned().into_boxed_str();
        let namelen = name.len();
        let id = ctx.arena.insert(FileRecord {
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
            file_type,
            dev: None,
            ino: None,
            stat: StatCache::new(),
            name,
            nameoff: 0,
            namelen,
        });
        ctx.arena.get_mut(id).root = id;
        if let (Some(e), true) = (err, ctx.flags.contains(WalkFlags::RECOVER)) {
            ctx.arena.get_mut(id).file_type = FileType::Error;
            let _ = e;
        }

        if visit_and_maybe_descend(ctx, id, min_depth, max_depth, &mut cut_off, callback)? {
            return Ok(PassOutcome {
                stopped: true,
                cut_off,
            });
        }
    }

    loop {
        ctx.dir_queue.flush(&mut ctx.arena);
        ctx.file_queue.flush(&mut ctx.arena);

        if drain_ready(ctx, min_depth, max_depth, &mut cut_off, callback)? {
            return Ok(PassOutcome {
                stopped: true,
                cut_off,
            });
        }

        // Apply whatever async opens/closes have completed since the last
        // spin. This only updates bookkeeping (stores the opened handle,
        // unpins the parent, uncharges budgets) -- actually reading a
        // directory's entries happens in `drain_ready` below, in queue
        // order, so out-of-order completions never reorder BFS delivery.
        while let Some(completion) = ctx.io.try_pop() {
            apply_completion(ctx, completion)?;
        }

        if drain_ready(ctx, min_depth, max_depth, &mut cut_off, callback)? {
            return Ok(PassOutcome {
                stopped: true,
                cut_off,
            });
        }

        let Some(dir_id) = ctx.dir_queue.waiting_peek() else {
            // Nothing waiting to dispatch; if something is already in
            // flight, block for it rather than spinning or giving up.
            if ctx.io.outstanding() > 0 {
                if let Some(completion) = ctx.io.pop_blocking() {
                    apply_completion(ctx, completion)?;
                    continue;
                }
            }
            break;
        };

        let want_async = ctx.dir_queue.balanced() && !ctx.cache.dir_budget_exhausted();
        if want_async && dispatch_async_open(ctx, dir_id)? {
            continue;
        }

        // Synchronous fallback: either the balance heuristic says the main
        // thread should service this one itself, or the dir budget is full
        // and the worker pool can't be trusted to make progress alone.
        ctx.dir_queue.detach(&mut ctx.arena, dir_id, false);
        match open_dir_sync(ctx, dir_id) {
            Ok(fd) => {
                store_opened_dir(ctx, dir_id, fd)?;
                ctx.dir_queue.attach(&mut ctx.arena, dir_id, false);
            }
            Err(e) if ctx.flags.contains(WalkFlags::RECOVER) => {
                ctx.dir_queue.attach(&mut ctx.arena, dir_id, false);
                tracing::warn!(error = %e, "failed to open directory");
            }
            Err(e) => return Err(e),
        }
    }

    Ok(PassOutcome {
        stopped: false,
        cut_off,
    })
}

/// Make room for one more open handle of the given kind. Drains whatever
/// I/O completions are already sitting in the channel first -- applying a
/// completion may release a handle on its own -- before falling back to LRU
/// eviction, per §4.1's "Reservation" rule that a reserve must drain the
/// queue before it's allowed to evict.
fn reserve_capacity(ctx: &mut WalkContext, is_dir: bool) -> Result<()> {
    while ctx.cache.budget_exhausted() || (is_dir && ctx.cache.dir_budget_exhausted()) {
        if let Some(completion) = ctx.io.try_pop() {
            apply_completion(ctx, completion)?;
            continue;
        }
        if !ctx.cache.evict_one(&mut ctx.arena, &mut ctx.io) {
            return Err(WalkError::ResourceExhausted(
                "descriptor cache exhausted and nothing evictable",
            ));
        }
    }
    Ok(())
}

fn open_dir_sync(ctx: &mut WalkContext, dir_id: RecordId) -> Result<RawFd> {
    reserve_capacity(ctx, true)?;
    let fd = ctx.cache.open_relative(&mut ctx.arena, dir_id, true)?;
    ctx.cache.charge(true);
    Ok(fd)
}

/// Try to submit `dir_id`'s open as an async job. Returns `false` (falling
/// through to the synchronous path) if its parent isn't already open, since
/// only the single relative `openat` is dispatched to a worker, never the
/// ancestor-chain walk that finds it.
fn dispatch_async_open(ctx: &mut WalkContext, dir_id: RecordId) -> Result<bool> {
    let Some(parent_id) = ctx.arena.get(dir_id).parent else {
        return Ok(false);
    };
    let parent_fd = match ctx.arena.get(parent_id).fd {
        Some(fd) => fd,
        None => match &ctx.arena.get(parent_id).dir {
            Some(dir) => dir.fd(),
            None => return Ok(false),
        },
    };

    // Pin the parent before reserving capacity below: reserving can evict
    // and close a cached handle, and without this pin it could close the
    // very descriptor `parent_fd` that the worker thread is about to use,
    // racing the fd closed out from under it.
    ctx.cache.pin(&mut ctx.arena, parent_id);
    if let Err(e) = reserve_capacity(ctx, true) {
        ctx.cache.unpin(&mut ctx.arena, parent_id);
        return Err(e);
    }
    ctx.cache.charge(true);
    ctx.dir_queue.detach(&mut ctx.arena, dir_id, true);

    let name = ctx.arena.get(dir_id).name.clone();
    ctx.io.submit(IoJob::OpenDir {
        id: dir_id,
        parent_fd,
        name,
    });
    Ok(true)
}

/// Apply one I/O completion's bookkeeping: store an opened handle, unpin
/// its parent, uncharge a closed handle's budget. Never reads a directory's
/// entries itself -- that happens in `drain_ready`, once the completed
/// record reaches the front of the queue in delivery order.
fn apply_completion(ctx: &mut WalkContext, completion: IoCompletion) -> Result<()> {
    let IoCompletion { id, result } = completion;
    match result {
        IoResult::OpenDir(opened) => {
            if let Some(parent_id) = ctx.arena.get(id).parent {
                ctx.cache.unpin(&mut ctx.arena, parent_id);
            }
            match opened {
                Ok(fd) => {
                    store_opened_dir(ctx, id, fd)?;
                    ctx.dir_queue.attach(&mut ctx.arena, id, true);
                }
                Err(errno) => {
                    ctx.cache.uncharge(true);
                    ctx.dir_queue.attach(&mut ctx.arena, id, true);
                    if ctx.flags.contains(WalkFlags::RECOVER) {
                        tracing::warn!(errno, "async directory open failed");
                    } else {
                        return Err(WalkError::Io(std::io::Error::from_raw_os_error(errno)));
                    }
                }
            }
        }
        IoResult::Close => ctx.cache.uncharge(false),
        IoResult::CloseDir => ctx.cache.uncharge(true),
        // No code path submits `IoJob::Stat` (see `stat_child`); stat stays
        // synchronous for now.
        IoResult::Stat(_) => {}
    }
    Ok(())
}

/// Drain directories whose open has completed, in strict queue order: a
/// directory is only serviced once it is no longer waiting to be dispatched
/// and its open is no longer in flight, so an out-of-order completion from
/// the worker pool can never be read before an earlier sibling still
/// pending. Returns `true` if the walk should stop.
fn drain_ready(
    ctx: &mut WalkContext,
    min_depth: u32,
    max_depth: u32,
    cut_off: &mut bool,
    callback: &mut dyn FnMut(&Entry) -> Action,
) -> Result<bool> {
    loop {
        // `finish_dir` below can push newly discovered subdirectories onto
        // `dir_queue`'s buffer; flush before every `pop` so its
        // buffer-must-be-empty invariant holds regardless of how many times
        // this loop has already serviced an entry this call.
        ctx.dir_queue.flush(&mut ctx.arena);

        let Some(candidate) = ctx.dir_queue.ready_peek() else {
            return Ok(false);
        };
        if Some(candidate) == ctx.dir_queue.waiting_head() {
            // Not dispatched yet.
            return Ok(false);
        }
        if ctx.arena.get(candidate).ioqueued {
            // Dispatched, but its open hasn't completed yet.
            return Ok(false);
        }
        let id = ctx
            .dir_queue
            .pop(&mut ctx.arena)
            .expect("candidate was just peeked from ready");
        if finish_dir(ctx, id, min_depth, max_depth, cut_off, callback)? {
            return Ok(true);
        }
    }
}

/// Call back for `id` if it's in band, then decide whether to queue it for
/// descent. Returns `true` if the walk should stop.
fn visit_and_maybe_descend(
    ctx: &mut WalkContext,
    id: RecordId,
    min_depth: u32,
    max_depth: u32,
    cut_off: &mut bool,
    callback: &mut dyn FnMut(&Entry) -> Action,
) -> Result<bool> {
    let depth = ctx.arena.get(id).depth;
    let path = ctx.path_builder.build(&ctx.arena, id).to_string();

    if depth >= max_depth {
        *cut_off = true;
        return release(ctx, id, callback);
    }

    if ctx.pruned.covers(&path) {
        return release(ctx, id, callback);
    }

    let action = if depth < min_depth {
        // Below this pass's band: never shown to the real callback, but
        // directories still need opening to reach what's below them.
        Action::Continue
    } else {
        call_back(
            &ctx.arena,
            id,
            &path,
            Visit::Pre,
            ctx.flags,
            ctx.mount.as_deref(),
            callback,
        )
    };

    match action {
        Action::Stop => Ok(true),
        Action::Prune => {
            if ctx.arena.get(id).file_type.is_dir() {
                ctx.pruned.insert(&path);
            }
            release(ctx, id, callback)
        }
        Action::Continue => {
            if ctx.arena.get(id).file_type.is_dir() {
                ctx.dir_queue.push(&mut ctx.arena, id);
                Ok(false)
            } else {
                release(ctx, id, callback)
            }
        }
    }
}

/// Drop one reference to `id`, per §4.6: when a record's refcount reaches
/// zero it has no more live children and nothing left referencing it, so
/// its deferred post-order callback fires (directories only), its handles
/// close, it leaves the LRU list, and its arena slot is freed -- which in
/// turn drops the one reference its parent held for it, cascading upward.
/// Returns `true` if the walk should stop.
fn release(
    ctx: &mut WalkContext,
    id: RecordId,
    callback: &mut dyn FnMut(&Entry) -> Action,
) -> Result<bool> {
    let mut current = Some(id);
    while let Some(cur) = current {
        let refcount = {
            let r = ctx.arena.get_mut(cur);
            r.refcount -= 1;
            r.refcount
        };
        if refcount > 0 {
            break;
        }

        let mut stop = false;
        if ctx.arena.get(cur).file_type.is_dir() && ctx.flags.contains(WalkFlags::POST_ORDER) {
            let path = ctx.path_builder.build(&ctx.arena, cur).to_string();
            if call_back(
                &ctx.arena,
                cur,
                &path,
                Visit::Post,
                ctx.flags,
                ctx.mount.as_deref(),
                callback,
            ) == Action::Stop
            {
                stop = true;
            }
        }

        if ctx.arena.get(cur).fd.is_some() || ctx.arena.get(cur).dir.is_some() {
            ctx.cache.close_handles(&mut ctx.io, &mut ctx.arena, cur);
        }
        if ctx.arena.get(cur).in_lru {
            ctx.cache.lru_remove(&mut ctx.arena, cur);
        }

        let freed = ctx.arena.remove(cur);
        current = freed.parent;

        if stop {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Stash a freshly opened directory's handle on its record. Pure
/// bookkeeping: no entries are read here, so this is safe to call from
/// completion-application regardless of where `id` sits in the queue.
fn store_opened_dir(ctx: &mut WalkContext, dir_id: RecordId, fd: RawFd) -> Result<()> {
    // SAFETY: fd is a freshly opened, owned directory descriptor.
    let dirp = unsafe { libc::fdopendir(fd) };
    if dirp.is_null() {
        // SAFETY: fdopendir failed; fd is still ours to close.
        unsafe {
            libc::close(fd);
        }
        ctx.cache.uncharge(true);
        return Err(WalkError::Io(std::io::Error::last_os_error()));
    }
    // SAFETY: dirp is non-null, just returned by fdopendir above.
    let dirp_handle = unsafe { DirHandle::from_raw(std::ptr::NonNull::new_unchecked(dirp)) };
    ctx.arena.get_mut(dir_id).dir = Some(dirp_handle);
    ctx.cache.lru_add(&mut ctx.arena, dir_id);
    Ok(())
}

/// Read an already-opened directory's entries, stat and visit each child,
/// and release `dir_id`'s own reference once they're all queued or
/// released in turn. If the open failed earlier (a recovered error), there
/// is nothing to read and this just releases `dir_id` immediately.
fn finish_dir(
    ctx: &mut WalkContext,
    dir_id: RecordId,
    min_depth: u32,
    max_depth: u32,
    cut_off: &mut bool,
    callback: &mut dyn FnMut(&Entry) -> Action,
) -> Result<bool> {
    let Some(dirp) = ctx.arena.get(dir_id).dir.as_ref().map(DirHandle::as_ptr) else {
        return release(ctx, dir_id, callback);
    };

    let base_nameoff = ctx.arena.get(dir_id).child_nameoff();
    let base_depth = ctx.arena.get(dir_id).depth + 1;
    let whiteouts = ctx.flags.contains(WalkFlags::WHITEOUTS);

    let mut children = Vec::new();
    loop {
        // SAFETY: dirp is a live DIR* owned by dir_id's record for as long
        // as we hold `ctx`, and nothing else reads from it concurrently.
        let entry = unsafe { libc::readdir(dirp) };
        if entry.is_null() {
            break;
        }
        // SAFETY: entry is valid until the next readdir/closedir call.
        let name = unsafe { CStr::from_ptr((*entry).d_name.as_ptr()) }
            .to_string_lossy()
            .into_owned();
        if name == "." || name == ".." {
            continue;
        }
        // SAFETY: entry is valid for the duration of this read.
        let d_type = unsafe { (*entry).d_type };
        let file_type = FileType::from_dtype(d_type);
        if file_type == FileType::Whiteout && !whiteouts {
            continue;
        }

        ctx.arena.get_mut(dir_id).refcount += 1;
        let child_id = ctx.arena.insert(FileRecord {
            parent: Some(dir_id),
            root: ctx.arena.get(dir_id).root,
            queue_link: None,
            ready_link: None,
            lru_prev: None,
            lru_next: None,
            depth: base_depth,
            refcount: 1,
            pincount: 0,
            in_lru: false,
            fd: None,
            ioqueued: false,
            dir: None,
            file_type,
            dev: None,
            ino: None,
            stat: StatCache::new(),
            namelen: name.len(),
            name: name.into_boxed_str(),
            nameoff: base_nameoff,
        });
        children.push(child_id);
    }

    // Children are all read; keep a plain descriptor cached for them to
    // resolve paths against instead of holding the heavier DIR* stream open.
    ctx.cache.unwrap_dir(&mut ctx.arena, &mut ctx.io, dir_id)?;

    if ctx.flags.contains(WalkFlags::SORT) {
        children.sort_by(|&a, &b| ctx.arena.get(a).name.cmp(&ctx.arena.get(b).name));
    }

    for child_id in children {
        let child_type = ctx.arena.get(child_id).file_type;
        // Directories always need a real `(dev, ino)` pair when cycle
        // detection or mount-boundary pruning is on, regardless of `STAT`:
        // those checks compare actual identity, not just the `d_type` hint.
        let needs_identity = child_type.is_dir()
            && ctx
                .flags
                .intersects(WalkFlags::DETECT_CYCLES | WalkFlags::SKIP_MOUNTS | WalkFlags::PRUNE_MOUNTS);
        if ctx.flags.contains(WalkFlags::STAT) || child_type == FileType::Unknown || needs_identity {
            stat_child(ctx, child_id);
        }
        if visit_and_maybe_descend(ctx, child_id, min_depth, max_depth, cut_off, callback)? {
            return Ok(true);
        }
    }

    release(ctx, dir_id, callback)
}

fn stat_child(ctx: &mut WalkContext, child_id: RecordId) {
    let parent_id = ctx
        .arena
        .get(child_id)
        .parent
        .expect("readdir children always have a parent");
    let name = ctx.arena.get(child_id).name.clone();
    let depth = ctx.arena.get(child_id).depth;
    let follow = should_follow(depth, ctx.flags);
    let was_whiteout = ctx.arena.get(child_id).file_type == FileType::Whiteout;

    if reserve_capacity(ctx, false).is_err() {
        return;
    }
    let Ok(parent_fd) = ctx.cache.open_fd(&mut ctx.arena, parent_id) else {
        return;
    };

    let Ok(cname) = std::ffi::CString::new(name.as_bytes()) else {
        return;
    };
    let mut st: libc::stat = unsafe { std::mem::zeroed() };
    let flags = if follow { 0 } else { libc::AT_SYMLINK_NOFOLLOW };
    // SAFETY: cname is NUL-terminated, parent_fd is a valid directory descriptor.
    let rc = unsafe { libc::fstatat(parent_fd, cname.as_ptr(), &mut st, flags) };

    let flavor = if follow {
        StatFlavor::Follow
    } else {
        StatFlavor::NoFollow
    };

    if rc < 0 {
        let errno = std::io::Error::last_os_error()
            .raw_os_error()
            .unwrap_or(libc::EIO);
        // A whiteout marker usually no longer exists by the time it's
        // stat'd -- that's the entire point of a whiteout -- so ENOENT
        // confirms the type hint instead of signaling a real failure.
        if was_whiteout && errno == libc::ENOENT {
            let buf = crate::record::StatBuf {
                dev: 0,
                ino: 0,
                mode: 0,
                size: 0,
                mtime: 0,
            };
            let record = ctx.arena.get_mut(child_id);
            record.stat.cache(flavor, false, Ok(buf));
            record.file_type = FileType::Whiteout;
            return;
        }
        let record = ctx.arena.get_mut(child_id);
        record.stat.cache(flavor, false, Err(errno));
        record.file_type = FileType::Error;
    } else {
        let buf = crate::record::StatBuf {
            dev: u64::from(st.st_dev),
            ino: st.st_ino,
            mode: st.st_mode,
            size: st.st_size,
            mtime: st.st_mtime,
        };
        let record = ctx.arena.get_mut(child_id);
        record.stat.cache(flavor, false, Ok(buf));
        record.file_type = FileType::from_mode(buf.mode);
        record.dev = Some(buf.dev);
        record.ino = Some(buf.ino);
    }
}
