//! Configuration for SamehadaDB.
//!
//! Carries the fixed-page constants the whole crate is built around, plus
//! a [`DatabaseConfig`] that gathers the handful of knobs the storage core
//! actually needs at startup (buffer pool size, deadlock strategy, log
//! flush policy).

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::lock::DeadlockStrategy;

/// Size of a page in bytes (4KB).
///
/// This value is chosen to match:
/// - OS page size on most systems (4096 bytes)
/// - Common database page sizes (PostgreSQL uses 8KB, but 4KB is also standard)
/// - BusTub's page size
///
/// # Memory Layout
/// With 4KB pages and 32-bit PageIds:
/// - Max pages: 2^32 = 4,294,967,296 pages
/// - Max database size: 4,294,967,296 × 4KB = 16TB
///
/// # Alignment
/// Pages are aligned to 4096 bytes for efficient Direct I/O (O_DIRECT).
pub const PAGE_SIZE: usize = 4096;

/// Maximum number of pages with u32 PageId.
pub const MAX_PAGES: u64 = (u32::MAX as u64) + 1;

/// Maximum theoretical database size in bytes.
pub const MAX_DB_SIZE_BYTES: u64 = MAX_PAGES * PAGE_SIZE as u64;

/// Default number of frames in the buffer pool.
pub const DEFAULT_BUFFER_POOL_SIZE: usize = 256;

/// Default group-commit flush interval for the log manager.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_millis(20);

/// Default interval between deadlock-detector sweeps, when the detection
/// strategy is in use.
pub const DEFAULT_DEADLOCK_DETECTION_INTERVAL: Duration = Duration::from_millis(50);

/// Runtime configuration for opening or creating a database.
///
/// A database is addressed by a base path; two files are created next to
/// it, `<name>.db` and `<name>.log`.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    base_path: PathBuf,
    buffer_pool_size: usize,
    deadlock_strategy: DeadlockStrategy,
    flush_interval: Duration,
    deadlock_detection_interval: Duration,
    enable_on_mem_storage: bool,
}

impl DatabaseConfig {
    /// Start a builder addressed at `base_path` (without extension);
    /// `<base_path>.db` and `<base_path>.log` are the files that will be
    /// created or opened.
    pub fn new(base_path: impl AsRef<Path>) -> Self {
        Self {
            base_path: base_path.as_ref().to_path_buf(),
            buffer_pool_size: DEFAULT_BUFFER_POOL_SIZE,
            deadlock_strategy: DeadlockStrategy::WoundWait,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            deadlock_detection_interval: DEFAULT_DEADLOCK_DETECTION_INTERVAL,
            enable_on_mem_storage: false,
        }
    }

    pub fn with_buffer_pool_size(mut self, size: usize) -> Self {
        self.buffer_pool_size = size;
        self
    }

    pub fn with_deadlock_strategy(mut self, strategy: DeadlockStrategy) -> Self {
        self.deadlock_strategy = strategy;
        self
    }

    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    pub fn with_deadlock_detection_interval(mut self, interval: Duration) -> Self {
        self.deadlock_detection_interval = interval;
        self
    }

    /// Switch to an in-memory disk implementation (for tests).
    pub fn with_in_memory_storage(mut self, enabled: bool) -> Self {
        self.enable_on_mem_storage = enabled;
        self
    }

    pub fn data_file_path(&self) -> PathBuf {
        self.base_path.with_extension("db")
    }

    pub fn log_file_path(&self) -> PathBuf {
        self.base_path.with_extension("log")
    }

    pub fn buffer_pool_size(&self) -> usize {
        self.buffer_pool_size
    }

    pub fn deadlock_strategy(&self) -> DeadlockStrategy {
        self.deadlock_strategy
    }

    pub fn flush_interval(&self) -> Duration {
        self.flush_interval
    }

    pub fn deadlock_detection_interval(&self) -> Duration {
        self.deadlock_detection_interval
    }

    pub fn is_in_memory(&self) -> bool {
        self.enable_on_mem_storage
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_size_is_power_of_two() {
        assert!(PAGE_SIZE.is_power_of_two());
        assert_eq!(PAGE_SIZE, 4096);
    }

    #[test]
    fn test_max_db_size() {
        // 16TB = 16 * 1024^4 bytes
        let expected = 16 * 1024u64 * 1024 * 1024 * 1024;
        assert_eq!(MAX_DB_SIZE_BYTES, expected);
    }

    #[test]
    fn test_database_config_paths() {
        let cfg = DatabaseConfig::new("/tmp/mydb");
        assert_eq!(cfg.data_file_path(), PathBuf::from("/tmp/mydb.db"));
        assert_eq!(cfg.log_file_path(), PathBuf::from("/tmp/mydb.log"));
    }

    #[test]
    fn test_database_config_builder() {
        let cfg = DatabaseConfig::new("/tmp/mydb")
            .with_buffer_pool_size(16)
            .with_deadlock_strategy(DeadlockStrategy::Detection)
            .with_in_memory_storage(true);

        assert_eq!(cfg.buffer_pool_size(), 16);
        assert_eq!(cfg.deadlock_strategy(), DeadlockStrategy::Detection);
        assert!(cfg.is_in_memory());
    }
}