use bitflags::bitflags;

bitflags! {
    /// Bitmask flags accepted by [`crate::WalkerBuilder`], mirroring the
    /// source engine's `bftw_flags`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct WalkFlags: u32 {
        /// Always `stat()` every entry, even when the type is already known.
        const STAT          = 1 << 0;
        /// Deliver per-entry errors to the callback instead of aborting.
        const RECOVER       = 1 << 1;
        /// Also invoke the callback with `Visit::Post` after a directory's children.
        const POST_ORDER    = 1 << 2;
        /// Sort sibling entries before visiting them.
        const SORT          = 1 << 3;
        /// Force buffering of every file before it is visited.
        const BUFFER        = 1 << 4;
        /// Follow symlinks named directly on the command line (depth 0).
        const FOLLOW_ROOTS  = 1 << 5;
        /// Follow symlinks encountered anywhere during the walk.
        const FOLLOW_ALL    = 1 << 6;
        /// Detect directory cycles via (device, inode) ancestor comparison.
        const DETECT_CYCLES = 1 << 7;
        /// Don't descend into directories on a different device than their parent.
        const SKIP_MOUNTS   = 1 << 8;
        /// Descend into a mount point once, but not past it.
        const PRUNE_MOUNTS  = 1 << 9;
        /// Recognize union-filesystem whiteout markers.
        const WHITEOUTS     = 1 << 10;
    }
}

/// Search strategy driving the traversal order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Strict breadth-first: entries at depth *n* are all delivered before
    /// any entry at depth *n*+1.
    Bfs,
    /// Depth-first via LIFO buffering: a directory's descendants are
    /// delivered before its siblings.
    Dfs,
    /// Iterative deepening: repeated bounded-depth BFS/DFS passes, widening
    /// the depth bound by one each round.
    Ids,
    /// Exponential deepening: like `Ids`, but the bound doubles each round.
    Eds,
}

/// Which half of a directory's visit this callback invocation represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visit {
    /// On first encountering the entry, before any children are visited.
    Pre,
    /// After all of a directory's children have been visited (only when
    /// [`WalkFlags::POST_ORDER`] is set).
    Post,
}

/// The caller's decision after being shown an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Default action: descend into directories, otherwise just continue.
    Continue,
    /// Do not descend into this directory (no-op for non-directories).
    Prune,
    /// Abort the entire traversal immediately.
    Stop,
}
