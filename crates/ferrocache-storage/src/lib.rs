//! Content-addressed filesystem abstraction for ferrocache.
//!
//! [`StorageDriver`] is the single seam the rest of the workspace is
//! written against: blob/manifest stores, the TTL scheduler, and the
//! LRU controller all read and write through it, never the concrete
//! backend directly.

pub mod driver;
pub mod error;
pub mod fs;
pub mod memory;

pub use driver::{ContentReader, FileInfo, FileWriter, StorageDriver, WalkAction};
pub use error::StorageError;
pub use fs::FsDriver;
pub use memory::MemoryDriver;
