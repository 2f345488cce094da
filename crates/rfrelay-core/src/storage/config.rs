//! Storage configuration.

use std::path::PathBuf;
use std::time::Duration;

/// How and where the reading store keeps its data.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Database directory. Ignored for temporary stores.
    pub path: PathBuf,

    /// sled page cache size in bytes.
    pub cache_bytes: u64,

    /// Background flush period; `None` leaves flushing to explicit calls.
    pub flush_every: Option<Duration>,

    /// zstd-compress pages on disk.
    pub compression: bool,

    /// Throw the database away when the store is dropped.
    pub temporary: bool,
}

impl StorageConfig {
    /// Persistent store under `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cache_bytes: 64 * 1024 * 1024,
            flush_every: Some(Duration::from_millis(500)),
            compression: true,
            temporary: false,
        }
    }

    /// Throwaway store, used by tests.
    pub fn temporary() -> Self {
        Self {
            temporary: true,
            flush_every: None,
            ..Self::new(PathBuf::new())
        }
    }

    pub fn with_cache_bytes(mut self, bytes: u64) -> Self {
        self.cache_bytes = bytes;
        self
    }

    pub fn with_flush_every(mut self, period: Option<Duration>) -> Self {
        self.flush_every = period;
        self
    }

    pub(crate) fn to_sled_config(&self) -> sled::Config {
        let base = sled::Config::new()
            .cache_capacity(self.cache_bytes)
            .use_compression(self.compression)
            .flush_every_ms(self.flush_every.map(|period| period.as_millis() as u64));

        if self.temporary {
            base.temporary(true)
        } else {
            base.path(&self.path)
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::new("./data")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_temporary_config() {
        let config = StorageConfig::temporary();
        assert!(config.temporary);
        assert!(config.flush_every.is_none());

        let db = config.to_sled_config().open().unwrap();
        assert!(!db.was_recovered());
    }

    #[test]
    fn test_builder() {
        let config = StorageConfig::new("/var/lib/rfrelay")
            .with_cache_bytes(1024)
            .with_flush_every(None);

        assert_eq!(config.path, PathBuf::from("/var/lib/rfrelay"));
        assert_eq!(config.cache_bytes, 1024);
        assert!(config.flush_every.is_none());
    }
}
