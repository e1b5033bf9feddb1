//! A descriptor-budgeted, async-assisted recursive directory traversal
//! engine: the open-directory LRU cache, I/O worker pool, and multi-stage
//! reordering queue that sit behind a `find`-like tool, exposed as a
//! library with no CLI or filter-expression layer of its own.
//!
//! ```no_run
//! use bftrek::{Action, WalkerBuilder};
//!
//! WalkerBuilder::new()
//!     .path(".")
//!     .run(|entry| {
//!         println!("{}", entry.path);
//!         Action::Continue
//!     })
//!     .unwrap();
//! ```

#[cfg(all(
    any(target_os = "linux", target_os = "macos", target_os = "android"),
    feature = "mimalloc"
))]
#[global_allocator]
static ALLOC: mimalloc::MiMalloc = mimalloc::MiMalloc;

mod cache;
mod error;
mod filetype;
mod io_queue;
mod mount;
mod path;
mod queue;
mod record;
mod state;
mod strategy;
mod trie;
mod types;
mod visit;

pub use error::{ConfigError, Result, WalkError};
pub use filetype::FileType;
pub use mount::{DeviceChangeTable, MountTable};
pub use record::StatBuf;
pub use state::WalkerBuilder;
pub use types::{Action, Strategy, Visit, WalkFlags};
pub use visit::Entry;
