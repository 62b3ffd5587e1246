//! Local filesystem layer for devpush
//!
//! Provides the content-addressed [`FileIndexer`], gitignore-style
//! [`IgnoreRules`], and the atomic, lock-protected I/O that persisted push
//! state relies on.

pub mod checksum;
pub mod config;
pub mod constants;
pub mod error;
pub mod ignore;
pub mod index;
pub mod io;
pub mod path;

pub use config::ConfigStore;
pub use constants::WorkspacePath;
pub use error::{Error, Result};
pub use ignore::IgnoreRules;
pub use index::{FileEntry, FileIndex, FileIndexer, IndexOutcome, IndexWarning};
pub use io::RobustnessConfig;
pub use path::NormalizedPath;
