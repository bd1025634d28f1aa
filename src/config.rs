use std::path::PathBuf;

/// Configuration for a [`Datastore`](crate::Datastore).
#[derive(Debug, Clone)]
pub struct DatastoreConfig {
    /// Root directory for all store files.
    pub folder: PathBuf,

    /// Capacity of the in-memory block value cache (default: 1000).
    pub block_cache_num_elements: usize,

    /// Number of blocks a single pack may hold before the transactional
    /// writer rolls over to a new pack (default: 1,000,000).
    pub pack_max_num_elements: usize,

    /// Capacity of the open pack reader cache and of the loaded index
    /// cache; each holds at most this many entries (default: 10).
    pub max_open_packs: usize,
}

impl DatastoreConfig {
    /// Creates a config rooted at `folder` with default limits.
    pub fn new(folder: impl Into<PathBuf>) -> Self {
        Self {
            folder: folder.into(),
            block_cache_num_elements: 1000,
            pack_max_num_elements: 1_000_000,
            max_open_packs: 10,
        }
    }

    pub fn block_cache_num_elements(mut self, n: usize) -> Self {
        self.block_cache_num_elements = n;
        self
    }

    pub fn pack_max_num_elements(mut self, n: usize) -> Self {
        self.pack_max_num_elements = n;
        self
    }

    pub fn max_open_packs(mut self, n: usize) -> Self {
        self.max_open_packs = n;
        self
    }
}
