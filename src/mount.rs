//! The mount-point collaborator used by `SKIP_MOUNTS`/`PRUNE_MOUNTS` (§4.7).
//!
//! Parsing `/proc/mounts` or `getmntinfo()` into a searchable table is a
//! self-contained concern the engine doesn't own; callers that want
//! mount-aware pruning provide one. The engine only needs to ask "is this
//! device a mount point" and compare `(dev)` pairs across a directory and
//! its parent, which it already has from `stat()`.

/// Something that can answer whether a given device number is a distinct
/// filesystem mount, for `PRUNE_MOUNTS`/`SKIP_MOUNTS` bookkeeping.
pub trait MountTable: Send + Sync {
    /// True if `dev` names a filesystem that is itself mounted (as opposed
    /// to being the same filesystem as whatever is above it).
    fn is_mount_point(&self, dev: u64) -> bool;
}

/// A `MountTable` that treats every device change as a mount boundary. This
/// is what `DETECT_CYCLES`-only walks (with no real mount table supplied)
/// fall back to: any `dev` change between a directory and its parent is
/// enough to decide `SKIP_MOUNTS`/`PRUNE_MOUNTS` without consulting
/// `/proc/mounts`.
#[derive(Debug, Default, Clone, Copy)]
pub struct DeviceChangeTable;

impl MountTable for DeviceChangeTable {
    fn is_mount_point(&self, _dev: u64) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_change_table_always_reports_a_mount() {
        let t = DeviceChangeTable;
        assert!(t.is_mount_point(0));
        assert!(t.is_mount_point(42));
    }
}
