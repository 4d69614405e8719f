//! Configuration, application paths and conversation window storage.

pub mod config;
pub mod paths;
pub mod store;

pub use config::Config;
pub use paths::AppPaths;
pub use store::{FileWindowStore, MemoryWindowStore, WindowStore};
