use std::fs::{File, OpenOptions};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use caps::{CapSet, Capability};
use log::{debug, trace, warn};

use crate::{
    config::ScanConfig,
    error::{CgError, Result},
    kpagecgroup::KPageCgroup,
    mincore::{self, MappedRegion},
    pagemap::{PageMap, PageMapEntry},
    page_size,
    stats::{CgroupId, FileRecord, RunStatistics},
    walk::Walker,
};

/// The two kernel tables a [`Scanner`] consults for every mapped batch of pages.
pub trait PageTables {
    /// The pagemap entries of the `pages` virtual pages of the calling process starting at
    /// `address`.
    fn frames(&mut self, address: u64, pages: usize) -> Result<Vec<PageMapEntry>>;

    /// The cgroup that the (non-zero) page frame `pfn` is charged to.
    fn cgroup(&mut self, pfn: u64) -> Result<CgroupId>;
}

/// `/proc/self/pagemap` and `/proc/kpagecgroup`, opened once for the whole run.
#[derive(Debug)]
pub struct KernelTables {
    pagemap: PageMap,
    kpagecgroup: KPageCgroup,
}

impl KernelTables {
    pub fn open(config: &ScanConfig, page_size: u64) -> Result<Self> {
        Ok(KernelTables {
            pagemap: PageMap::open(&config.pagemap_path, page_size)?,
            kpagecgroup: KPageCgroup::open(&config.kpagecgroup_path)?,
        })
    }
}

impl PageTables for KernelTables {
    fn frames(&mut self, address: u64, pages: usize) -> Result<Vec<PageMapEntry>> {
        self.pagemap.entries(address, pages)
    }

    fn cgroup(&mut self, pfn: u64) -> Result<CgroupId> {
        self.kpagecgroup.cgroup(pfn)
    }
}

/// Scans files for their resident pages and attributes them to memory cgroups.
#[derive(Debug)]
pub struct Scanner<T = KernelTables> {
    tables: T,
    config: ScanConfig,
    page_size: u64,
}

impl Scanner<KernelTables> {
    /// Open the kernel tables named in `config`.
    ///
    /// # Errors
    ///
    /// Failing to open either table is fatal for the run ([`CgError::is_fatal`]).
    pub fn new(config: ScanConfig) -> Result<Self> {
        match has_sys_admin() {
            Ok(true) => {}
            Ok(false) => warn!("CAP_SYS_ADMIN is missing: page frame numbers will read as zero"),
            Err(e) => warn!("could not check for CAP_SYS_ADMIN: {}", e),
        }
        let page_size = page_size()?;
        let tables = KernelTables::open(&config, page_size)?;
        Ok(Self::with_tables(tables, config, page_size))
    }
}

impl<T: PageTables> Scanner<T> {
    pub fn with_tables(tables: T, config: ScanConfig, page_size: u64) -> Self {
        Scanner {
            tables,
            config,
            page_size,
        }
    }

    #[inline(always)]
    pub fn page_size(&self) -> u64 {
        self.page_size
    }

    #[inline(always)]
    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    /// Walk `paths` and scan every regular file found, collecting everything in a fresh
    /// [`RunStatistics`].
    pub fn scan_paths(&mut self, paths: &[PathBuf]) -> RunStatistics {
        let walker = Walker::from_config(&self.config);
        let mut stats = RunStatistics::new();
        walker.walk(paths, &mut stats, &mut |path, stats| self.scan_file(path, stats));
        stats
    }

    /// Scan a single regular file, adding its record to `stats`.
    ///
    /// A file that is already part of `stats` is skipped. On error the record keeps whatever was
    /// counted up to the failure and is still added to `stats`.
    pub fn scan_file(&mut self, path: &Path, stats: &mut RunStatistics) -> Result<()> {
        if stats.contains_file(path) {
            debug!("skipping already scanned file: {}", path.display());
            return Ok(());
        }
        debug!("working with file: {}", path.display());

        let name = path.display().to_string();
        let file = open_noatime(path).map_err(|e| CgError::Open {
            path: name.clone(),
            source: e,
        })?;
        let size = file
            .metadata()
            .map_err(|e| CgError::Stat {
                path: name.clone(),
                source: e,
            })?
            .len();

        let pages = self.config.page_count.pages(size, self.page_size);
        let mut record = FileRecord::new(path.to_path_buf(), size, pages);
        let res = match size {
            0 => Ok(()),
            _ => self.scan_batches(&file, &name, size, &mut record, stats),
        };
        stats.insert_file(record);
        res
    }

    fn scan_batches(
        &mut self,
        file: &File,
        name: &str,
        size: u64,
        record: &mut FileRecord,
        stats: &mut RunStatistics,
    ) -> Result<()> {
        let batch = (self.config.effective_batch_pages() as u64).saturating_mul(self.page_size);
        let mut offset = 0;
        while offset < size {
            let len = (size - offset).min(batch);
            let pages = ((len + self.page_size - 1) / self.page_size) as usize;

            let entries = {
                let region = MappedRegion::map(file, name, offset, pages, self.page_size as usize)?;
                let resident = mincore::touch_resident(&region)?;
                trace!(
                    "{}: {}/{} pages resident at offset {}",
                    name,
                    resident.len(),
                    pages,
                    offset
                );
                self.tables.frames(region.address(), pages)?
            };

            for pfn in entries.iter().filter_map(PageMapEntry::frame) {
                let id = self.tables.cgroup(pfn)?;
                debug!("cgroup memory inode for pfn {:x}: {}", pfn, id);
                stats.charge(record, id);
            }
            offset += len;
        }
        Ok(())
    }
}

/// Open `path` read-only without following symbolic links and without updating its access time.
///
/// `O_NOATIME` is only allowed to the owner of the file (or with `CAP_FOWNER`), so the open is
/// retried without it when refused.
fn open_noatime(path: &Path) -> std::io::Result<File> {
    let open = |flags| {
        OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_NOFOLLOW | flags)
            .open(path)
    };
    match open(libc::O_NOATIME) {
        Err(e) if e.raw_os_error() == Some(libc::EPERM) => {
            trace!("O_NOATIME refused for '{}'", path.display());
            open(0)
        }
        res => res,
    }
}

/// Without `CAP_SYS_ADMIN` the kernel zeroes the frame numbers in `/proc/self/pagemap`, so no
/// page would ever be attributed.
fn has_sys_admin() -> Result<bool> {
    Ok(caps::has_cap(None, CapSet::Effective, Capability::CAP_SYS_ADMIN)?)
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, VecDeque};
    use std::io::Write;

    use super::*;
    use crate::config::PageCountPolicy;

    /// Fake kernel tables: every call to `frames` gets the next batch of raw entries, and frames
    /// are attributed through a fixed map.
    #[derive(Debug, Default)]
    struct FakeTables {
        batches: VecDeque<Vec<u64>>,
        owners: HashMap<u64, CgroupId>,
        calls: Vec<(u64, usize)>,
    }

    impl PageTables for FakeTables {
        fn frames(&mut self, address: u64, pages: usize) -> Result<Vec<PageMapEntry>> {
            self.calls.push((address, pages));
            let batch = self.batches.pop_front().unwrap_or_default();
            assert_eq!(batch.len(), pages, "fake batch of the wrong size");
            Ok(batch.into_iter().map(PageMapEntry::from).collect())
        }

        fn cgroup(&mut self, pfn: u64) -> Result<CgroupId> {
            assert_ne!(pfn, 0, "pfn 0 must never be attributed");
            self.owners.get(&pfn).copied().ok_or(CgError::ShortRead {
                path: "kpagecgroup".into(),
                offset: pfn * 8,
                expected: 8,
                got: 0,
            })
        }
    }

    fn file_of(pages: usize) -> (tempfile::NamedTempFile, u64) {
        let ps = page_size().unwrap();
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(&vec![0x5a; pages * ps as usize]).unwrap();
        f.flush().unwrap();
        (f, ps)
    }

    fn scanner(tables: FakeTables, config: ScanConfig) -> Scanner<FakeTables> {
        Scanner::with_tables(tables, config, page_size().unwrap())
    }

    const PRESENT: u64 = 1 << 63;

    #[test]
    fn test_three_page_file() -> anyhow::Result<()> {
        let (f, ps) = file_of(3);
        let tables = FakeTables {
            batches: vec![vec![PRESENT | 7, 0, PRESENT | 9]].into(),
            owners: vec![(7, 42), (9, 42)].into_iter().collect(),
            ..Default::default()
        };
        let mut s = scanner(tables, ScanConfig::default());
        let mut stats = RunStatistics::new();
        s.scan_file(f.path(), &mut stats)?;

        let rec = &stats.files[f.path()];
        assert_eq!(rec.size, 3 * ps);
        assert_eq!(rec.pages, 4);
        assert_eq!(rec.charged, 2);
        assert_eq!(rec.cgroups.len(), 1);
        assert_eq!(rec.cgroups[&42].charged, 2);
        assert_eq!(stats.cgroups[&42].charged, 2);
        assert_eq!(stats.charged, 2);
        assert_eq!(stats.pages, 4);

        // One batch, mapped at a page boundary.
        assert_eq!(s.tables.calls.len(), 1);
        assert_eq!(s.tables.calls[0].0 % ps, 0);
        assert_eq!(s.tables.calls[0].1, 3);
        Ok(())
    }

    #[test]
    fn test_zero_frames_are_skipped() -> anyhow::Result<()> {
        let (f, _) = file_of(2);
        let tables = FakeTables {
            // A present page whose frame number is hidden, and an unmapped one.
            batches: vec![vec![PRESENT, 0]].into(),
            ..Default::default()
        };
        let mut s = scanner(tables, ScanConfig::default());
        let mut stats = RunStatistics::new();
        s.scan_file(f.path(), &mut stats)?;
        assert_eq!(stats.charged, 0);
        assert!(stats.cgroups.is_empty());
        Ok(())
    }

    #[test]
    fn test_empty_file() -> anyhow::Result<()> {
        let f = tempfile::NamedTempFile::new()?;
        let mut s = scanner(FakeTables::default(), ScanConfig::default());
        let mut stats = RunStatistics::new();
        s.scan_file(f.path(), &mut stats)?;

        let rec = &stats.files[f.path()];
        assert_eq!((rec.size, rec.pages, rec.charged), (0, 1, 0));
        assert!(s.tables.calls.is_empty());
        Ok(())
    }

    #[test]
    fn test_batches() -> anyhow::Result<()> {
        let (f, ps) = file_of(5);
        let tables = FakeTables {
            batches: vec![
                vec![PRESENT | 1, PRESENT | 2],
                vec![0, PRESENT | 3],
                vec![PRESENT | 4],
            ]
            .into(),
            owners: vec![(1, 10), (2, 20), (3, 10), (4, 0)]
                .into_iter()
                .collect(),
            ..Default::default()
        };
        let config = ScanConfig {
            batch_pages: 2,
            page_count: PageCountPolicy::Exact,
            ..Default::default()
        };
        let mut s = scanner(tables, config);
        let mut stats = RunStatistics::new();
        s.scan_file(f.path(), &mut stats)?;

        let sizes: Vec<_> = s.tables.calls.iter().map(|c| c.1).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
        assert!(s.tables.calls.iter().all(|c| c.0 % ps == 0));

        let rec = &stats.files[f.path()];
        assert_eq!(rec.pages, 5);
        assert_eq!(rec.charged, 4);
        assert_eq!(rec.cgroups[&10].charged, 2);
        assert_eq!(rec.cgroups[&20].charged, 1);
        assert_eq!(rec.cgroups[&0].charged, 1);
        Ok(())
    }

    #[test]
    fn test_failure_keeps_partial_counts() {
        let (f, _) = file_of(3);
        let tables = FakeTables {
            batches: vec![vec![PRESENT | 7], vec![PRESENT | 8], vec![PRESENT | 9]].into(),
            // Frame 8 is past the end of the fake kpagecgroup.
            owners: vec![(7, 42), (9, 42)].into_iter().collect(),
            ..Default::default()
        };
        let config = ScanConfig {
            batch_pages: 1,
            ..Default::default()
        };
        let mut s = scanner(tables, config);
        let mut stats = RunStatistics::new();
        let err = s.scan_file(f.path(), &mut stats).unwrap_err();
        assert!(matches!(err, CgError::ShortRead { .. }));

        // The third batch was never mapped.
        assert_eq!(s.tables.calls.len(), 2);
        let rec = &stats.files[f.path()];
        assert_eq!(rec.charged, 1);
        assert_eq!(stats.charged, 1);
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = scanner(FakeTables::default(), ScanConfig::default());
        let mut stats = RunStatistics::new();
        let err = s
            .scan_file(&dir.path().join("missing"), &mut stats)
            .unwrap_err();
        assert!(matches!(err, CgError::Open { .. }));
        assert!(stats.files.is_empty());
    }

    #[test]
    fn test_scan_paths_skips_duplicates() {
        let (f, _) = file_of(1);
        let tables = FakeTables {
            batches: vec![vec![PRESENT | 5]].into(),
            owners: vec![(5, 3)].into_iter().collect(),
            ..Default::default()
        };
        let mut s = scanner(tables, ScanConfig::default());
        let path = f.path().to_path_buf();
        let stats = s.scan_paths(&[path.clone(), path]);
        assert!(stats.errors.is_empty());
        assert_eq!(stats.files.len(), 1);
        assert_eq!(stats.charged, 1);
        assert_eq!(s.tables.calls.len(), 1);
    }

    #[test]
    fn test_dot_components_are_not_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let ps = page_size().unwrap() as usize;
        std::fs::write(dir.path().join("f"), vec![1; ps]).unwrap();
        let tables = FakeTables {
            batches: vec![vec![PRESENT | 5]].into(),
            owners: vec![(5, 3)].into_iter().collect(),
            ..Default::default()
        };
        let mut s = scanner(tables, ScanConfig::default());
        let stats = s.scan_paths(&[dir.path().join(".").join("f"), dir.path().join("f")]);
        assert!(stats.errors.is_empty());
        assert_eq!(stats.files.len(), 1);
        assert!(stats.files.contains_key(&dir.path().join("f")));
        assert_eq!(stats.charged, 1);
        assert_eq!(s.tables.calls.len(), 1);
    }

    #[test]
    fn test_huge_batch_size() -> anyhow::Result<()> {
        let (f, _) = file_of(2);
        let tables = FakeTables {
            batches: vec![vec![PRESENT | 1, PRESENT | 2]].into(),
            owners: vec![(1, 10), (2, 10)].into_iter().collect(),
            ..Default::default()
        };
        let config = ScanConfig {
            batch_pages: usize::MAX,
            ..Default::default()
        };
        let mut s = scanner(tables, config);
        let mut stats = RunStatistics::new();
        s.scan_file(f.path(), &mut stats)?;
        assert_eq!(s.tables.calls.len(), 1);
        assert_eq!(s.tables.calls[0].1, 2);
        assert_eq!(stats.charged, 2);
        Ok(())
    }

    #[test]
    fn test_zero_batch_size() -> anyhow::Result<()> {
        let (f, _) = file_of(2);
        let tables = FakeTables {
            batches: vec![vec![0], vec![0]].into(),
            ..Default::default()
        };
        let config = ScanConfig {
            batch_pages: 0,
            ..Default::default()
        };
        let mut s = scanner(tables, config);
        let mut stats = RunStatistics::new();
        s.scan_file(f.path(), &mut stats)?;
        assert_eq!(s.tables.calls.len(), 2);
        Ok(())
    }

    #[test]
    fn test_capability_check() {
        // Whether the capability is held depends on the test environment; the query must work.
        assert!(has_sys_admin().is_ok());
    }
}
