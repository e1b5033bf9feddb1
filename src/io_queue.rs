//! The asynchronous I/O worker pool (§4.4).
//!
//! Worker threads never touch the [`crate::record::RecordArena`] — it's
//! main-thread only. They take plain syscall arguments tagged with a
//! [`RecordId`], perform the blocking call, and hand the outcome back over a
//! completion channel for the main thread to apply.

use crate::record::{RecordId, StatBuf};
use crossbeam_channel::{unbounded, Receiver, Sender};
use crossbeam_deque::{Injector, Steal};
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

#[derive(Debug)]
pub enum IoJob {
    OpenDir {
        id: RecordId,
        parent_fd: RawFd,
        name: Box<str>,
    },
    Stat {
        id: RecordId,
        dir_fd: RawFd,
        name: Box<str>,
        follow: bool,
    },
    Close {
        id: RecordId,
        fd: RawFd,
    },
    CloseDir {
        id: RecordId,
        /// Raw `DIR *`, handed over by [`crate::record::DirHandle::into_raw`]
        /// so this job can own the close instead of `DirHandle`'s own `Drop`
        /// doing it synchronously on the main thread.
        dirp: usize,
    },
}

#[derive(Debug)]
pub enum IoResult {
    OpenDir(Result<RawFd, i32>),
    Stat(Result<StatBuf, i32>),
    Close,
    CloseDir,
}

#[derive(Debug)]
pub struct IoCompletion {
    pub id: RecordId,
    pub result: IoResult,
}

/// A pool of blocking-syscall workers fed from a shared injector queue.
pub struct IoQueue {
    injector: Arc<Injector<IoJob>>,
    completions_tx: Sender<IoCompletion>,
    completions_rx: Receiver<IoCompletion>,
    shutdown: Arc<AtomicBool>,
    workers: Vec<JoinHandle<()>>,
    outstanding: usize,
}

impl IoQueue {
    #[must_use]
    pub fn new(nthreads: usize) -> Self {
        let injector = Arc::new(Injector::new());
        let (tx, rx) = unbounded();
        let shutdown = Arc::new(AtomicBool::new(false));
        let mut workers = Vec::with_capacity(nthreads.max(1));
        for _ in 0..nthreads.max(1) {
            let injector = Arc::clone(&injector);
            let tx = tx.clone();
            let shutdown = Arc::clone(&shutdown);
            workers.push(std::thread::spawn(move || worker_loop(&injector, &tx, &shutdown)));
        }
        Self {
            injector,
            completions_tx: tx,
            completions_rx: rx,
            shutdown,
            workers,
            outstanding: 0,
        }
    }

    #[must_use]
    pub const fn outstanding(&self) -> usize {
        self.outstanding
    }

    pub fn submit(&mut self, job: IoJob) {
        self.outstanding += 1;
        self.injector.push(job);
    }

    /// Non-blocking: return a completed job if one is ready.
    pub fn try_pop(&mut self) -> Option<IoCompletion> {
        let completion = self.completions_rx.try_recv().ok()?;
        self.outstanding -= 1;
        Some(completion)
    }

    /// Block until a job completes. Returns `None` if nothing is outstanding.
    pub fn pop_blocking(&mut self) -> Option<IoCompletion> {
        if self.outstanding == 0 {
            return None;
        }
        let completion = self.completions_rx.recv().ok()?;
        self.outstanding -= 1;
        Some(completion)
    }
}

impl Drop for IoQueue {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

fn worker_loop(injector: &Injector<IoJob>, tx: &Sender<IoCompletion>, shutdown: &AtomicBool) {
    loop {
        match injector.steal() {
            Steal::Success(job) => {
                if tx.send(perform(job)).is_err() {
                    return;
                }
            }
            Steal::Retry => continue,
            Steal::Empty => {
                if shutdown.load(Ordering::Relaxed) {
                    return;
                }
                std::thread::sleep(Duration::from_micros(200));
            }
        }
    }
}

fn perform(job: IoJob) -> IoCompletion {
    match job {
        IoJob::OpenDir {
            id,
            parent_fd,
            name,
        } => IoCompletion {
            id,
            result: IoResult::OpenDir(open_dir_at(parent_fd, &name)),
        },
        IoJob::Stat {
            id,
            dir_fd,
            name,
            follow,
        } => IoCompletion {
            id,
            result: IoResult::Stat(stat_at(dir_fd, &name, follow)),
        },
        IoJob::Close { id, fd } => {
            // SAFETY: fd is a descriptor the submitter is transferring ownership of.
            unsafe {
                libc::close(fd);
            }
            IoCompletion {
                id,
                result: IoResult::Close,
            }
        }
        IoJob::CloseDir { id, dirp } => {
            // SAFETY: dirp is a live DIR* the submitter is transferring
            // ownership of via DirHandle::into_raw.
            unsafe {
                libc::closedir(dirp as *mut libc::DIR);
            }
            IoCompletion {
                id,
                result: IoResult::CloseDir,
            }
        }
    }
}

fn last_errno() -> i32 {
    std::io::Error::last_os_error()
        .raw_os_error()
        .unwrap_or(libc::EIO)
}

fn open_dir_at(parent_fd: RawFd, name: &str) -> Result<RawFd, i32> {
    let Ok(cname) = std::ffi::CString::new(name.as_bytes()) else {
        return Err(libc::EINVAL);
    };
    // SAFETY: cname is NUL-terminated, parent_fd is a valid directory descriptor
    // (or AT_FDCWD) owned by the caller for the duration of this call.
    let fd = unsafe {
        libc::openat(
            parent_fd,
            cname.as_ptr(),
            libc::O_RDONLY | libc::O_CLOEXEC | libc::O_DIRECTORY,
        )
    };
    if fd < 0 {
        Err(last_errno())
    } else {
        Ok(fd)
    }
}

pub(crate) fn stat_at(dir_fd: RawFd, name: &str, follow: bool) -> Result<StatBuf, i32> {
    let Ok(cname) = std::ffi::CString::new(name.as_bytes()) else {
        return Err(libc::EINVAL);
    };
    let mut st: libc::stat = unsafe { std::mem::zeroed() };
    let flags = if follow { 0 } else { libc::AT_SYMLINK_NOFOLLOW };
    // SAFETY: cname is NUL-terminated, dir_fd is a valid directory descriptor,
    // st is a freshly zeroed out-param.
    let rc = unsafe { libc::fstatat(dir_fd, cname.as_ptr(), &mut st, flags) };
    if rc < 0 {
        Err(last_errno())
    } else {
        Ok(StatBuf {
            dev: u64::from(st.st_dev),
            ino: st.st_ino,
            mode: st.st_mode,
            size: st.st_size,
            mtime: st.st_mtime,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_and_stat_a_real_directory() {
        let mut q = IoQueue::new(2);
        let id = RecordId::DANGLING;
        q.submit(IoJob::Stat {
            id,
            dir_fd: libc::AT_FDCWD,
            name: ".".into(),
            follow: true,
        });
        let completion = q.pop_blocking().expect("a completion");
        match completion.result {
            IoResult::Stat(Ok(buf)) => assert!(buf.mode != 0),
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
