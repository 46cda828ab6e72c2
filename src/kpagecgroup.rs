use std::collections::HashMap;
use std::path::Path;

use crate::{error::Result, stats::CgroupId, table::Table};

/// A handle on `/proc/kpagecgroup`, which maps every page frame to the inode number of the memory
/// cgroup it is charged to.
///
/// Lookups are memoized in a small cache that is dropped whenever it fills up.
#[derive(Debug)]
pub struct KPageCgroup {
    table: Table,
    cache: HashMap<u64, CgroupId>,
}

impl KPageCgroup {
    pub const KPAGECGROUP: &'static str = "/proc/kpagecgroup";
    const CACHE_CAPACITY: usize = 4096;

    /// Open the table at `path`; normally [`KPageCgroup::KPAGECGROUP`].
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(KPageCgroup {
            table: Table::open(path)?,
            cache: HashMap::new(),
        })
    }

    /// Returns the identifier of the memory cgroup that the page frame `pfn` is charged to; zero
    /// if none.
    pub fn cgroup(&mut self, pfn: u64) -> Result<CgroupId> {
        if let Some(&id) = self.cache.get(&pfn) {
            return Ok(id);
        }
        let id = self.table.read_entry(pfn)?;
        if self.cache.len() >= Self::CACHE_CAPACITY {
            self.cache.clear();
        }
        self.cache.insert(pfn, id);
        Ok(id)
    }
}
