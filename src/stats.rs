use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use crate::error::CgError;

/// The identifier of a memory cgroup: the inode number of its directory in the cgroup
/// filesystem, as reported by `/proc/kpagecgroup`. Zero stands for "no cgroup".
pub type CgroupId = u64;

/// Per-cgroup charge counters, keyed by cgroup identifier.
pub type Cgroups = HashMap<CgroupId, Cgroup>;

/// A memory cgroup and the number of resident pages found charged to it, within some scope (a
/// single file, or the whole run).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cgroup {
    pub id: CgroupId,
    pub charged: u64,
}

impl Cgroup {
    fn new(id: CgroupId) -> Self {
        Cgroup { id, charged: 0 }
    }
}

fn charge(cgroups: &mut Cgroups, id: CgroupId) {
    cgroups.entry(id).or_insert_with(|| Cgroup::new(id)).charged += 1;
}

/// What was found about a single scanned file.
#[derive(Debug, Clone)]
pub struct FileRecord {
    pub path: PathBuf,
    /// Size in bytes.
    pub size: u64,
    /// Total page count, as computed by the configured [`PageCountPolicy`].
    ///
    /// [`PageCountPolicy`]: crate::PageCountPolicy
    pub pages: u64,
    /// Resident pages attributed to some cgroup.
    pub charged: u64,
    pub cgroups: Cgroups,
}

impl FileRecord {
    pub fn new(path: PathBuf, size: u64, pages: u64) -> Self {
        FileRecord {
            path,
            size,
            pages,
            charged: 0,
            cgroups: Cgroups::new(),
        }
    }
}

/// The accumulated result of a run: global counters, per-file records and the non-fatal errors
/// met along the way.
#[derive(Debug, Default)]
pub struct RunStatistics {
    pub charged: u64,
    pub size: u64,
    pub pages: u64,
    pub cgroups: Cgroups,
    pub files: BTreeMap<PathBuf, FileRecord>,
    pub dirs: u64,
    pub errors: Vec<CgError>,
}

impl RunStatistics {
    pub fn new() -> Self {
        Default::default()
    }

    /// Charge one resident page of `file` to the cgroup `id`, both in the file's scope and in the
    /// run's scope.
    pub fn charge(&mut self, file: &mut FileRecord, id: CgroupId) {
        charge(&mut file.cgroups, id);
        file.charged += 1;
        charge(&mut self.cgroups, id);
        self.charged += 1;
    }

    /// Add a (possibly partially) scanned file to the run totals.
    pub fn insert_file(&mut self, file: FileRecord) {
        self.size += file.size;
        self.pages += file.pages;
        self.files.insert(file.path.clone(), file);
    }

    /// Returns `true` if `path` has been scanned already during this run.
    pub fn contains_file(&self, path: &Path) -> bool {
        self.files.contains_key(path)
    }

    pub fn record_dir(&mut self) {
        self.dirs += 1;
    }

    pub fn record_error(&mut self, err: CgError) {
        log::debug!("{}", err);
        self.errors.push(err);
    }
}
