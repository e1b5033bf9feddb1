#![allow(clippy::inline_always)]
use libc::{
    mode_t, DT_BLK, DT_CHR, DT_DIR, DT_FIFO, DT_LNK, DT_REG, DT_SOCK, S_IFBLK, S_IFCHR, S_IFDIR,
    S_IFIFO, S_IFLNK, S_IFMT, S_IFREG, S_IFSOCK,
};

/// The type of a file record, as known (or not yet known) to the engine.
///
/// `Unknown` means readdir didn't tell us (e.g. `DT_UNKNOWN`, or a
/// filesystem that never fills `d_type`); a later `stat()` resolves it.
/// `Error` is a pseudo-type: it means resolving the type itself failed, and
/// the record's error field holds why.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FileType {
    Unknown,
    RegularFile,
    Directory,
    Symlink,
    BlockDevice,
    CharDevice,
    Fifo,
    Socket,
    /// Union-filesystem whiteout marker (BSD `S_IFWHT`); matched against
    /// `ENOENT` during stat when the `d_type` hint already said whiteout.
    Whiteout,
    Error,
}

impl FileType {
    #[must_use]
    #[inline(always)]
    /// Converts a `d_type` byte from `readdir`/`getdents` to a [`FileType`].
    pub const fn from_dtype(d_type: u8) -> Self {
        match d_type {
            DT_DIR => Self::Directory,
            DT_REG => Self::RegularFile,
            DT_BLK => Self::BlockDevice,
            DT_CHR => Self::CharDevice,
            DT_FIFO => Self::Fifo,
            DT_LNK => Self::Symlink,
            DT_SOCK => Self::Socket,
            #[cfg(any(
                target_os = "macos",
                target_os = "ios",
                target_os = "freebsd",
                target_os = "dragonfly",
                target_os = "openbsd",
                target_os = "netbsd"
            ))]
            libc::DT_WHT => Self::Whiteout,
            _ => Self::Unknown,
        }
    }

    #[must_use]
    #[inline(always)]
    /// Converts a `st_mode` value (from `stat`/`lstat`) to a [`FileType`].
    pub const fn from_mode(mode: mode_t) -> Self {
        match mode & S_IFMT {
            S_IFREG => Self::RegularFile,
            S_IFDIR => Self::Directory,
            S_IFBLK => Self::BlockDevice,
            S_IFCHR => Self::CharDevice,
            S_IFIFO => Self::Fifo,
            S_IFLNK => Self::Symlink,
            S_IFSOCK => Self::Socket,
            #[cfg(any(
                target_os = "macos",
                target_os = "ios",
                target_os = "freebsd",
                target_os = "dragonfly",
                target_os = "openbsd",
                target_os = "netbsd"
            ))]
            libc::S_IFWHT => Self::Whiteout,
            _ => Self::Unknown,
        }
    }

    #[must_use]
    #[inline(always)]
    pub const fn is_dir(self) -> bool {
        matches!(self, Self::Directory)
    }

    #[must_use]
    #[inline(always)]
    pub const fn is_symlink(self) -> bool {
        matches!(self, Self::Symlink)
    }
}

impl std::fmt::Display for FileType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unknown => write!(f, "unknown"),
            Self::RegularFile => write!(f, "regular file"),
            Self::Directory => write!(f, "directory"),
            Self::Symlink => write!(f, "symlink"),
            Self::BlockDevice => write!(f, "block device"),
            Self::CharDevice => write!(f, "char device"),
            Self::Fifo => write!(f, "fifo"),
            Self::Socket => write!(f, "socket"),
            Self::Whiteout => write!(f, "whiteout"),
            Self::Error => write!(f, "error"),
        }
    }
}
