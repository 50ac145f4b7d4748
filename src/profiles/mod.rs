//! Monitored profiles and the user directory

pub mod directory;
pub mod store;

pub use directory::{CachedDirectory, Directory, DirectoryError, MemoryDirectory};
pub use store::ProfileStore;
