use std::path::PathBuf;

use crate::{kpagecgroup::KPageCgroup, pagemap::PageMap};

/// How the total page count of a file is derived from its size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageCountPolicy {
    /// `floor(size / page_size) + 1`: always one page more than the full pages of the file, even
    /// for empty files and for sizes that are exact multiples of the page size. This is the count
    /// the tool has always reported.
    Inclusive,
    /// `ceil(size / page_size)`: the number of pages the file actually spans.
    Exact,
}

impl PageCountPolicy {
    /// The total page count of a file of `size` bytes.
    pub fn pages(self, size: u64, page_size: u64) -> u64 {
        match self {
            PageCountPolicy::Inclusive => size / page_size + 1,
            PageCountPolicy::Exact => (size + page_size - 1) / page_size,
        }
    }
}

impl Default for PageCountPolicy {
    fn default() -> Self {
        PageCountPolicy::Inclusive
    }
}

/// The effective parameters of a run.
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Maximum directory depth to descend into; directories deeper than that are reported.
    pub max_depth: usize,
    /// Follow symbolic links instead of reporting them.
    pub follow_symlinks: bool,
    /// Mount point of the memory cgroup hierarchy, walked to resolve cgroup paths.
    pub cgroup_mount: PathBuf,
    /// Number of pages mapped at once; bounds the address space used per file.
    pub batch_pages: usize,
    pub page_count: PageCountPolicy,
    pub pagemap_path: PathBuf,
    pub kpagecgroup_path: PathBuf,
}

impl ScanConfig {
    pub const DEFAULT_MAX_DEPTH: usize = 12;
    pub const DEFAULT_CGROUP_MOUNT: &'static str = "/sys/fs/cgroup/memory/";
    pub const DEFAULT_BATCH_PAGES: usize = 64 << 10;
    /// Upper bound for [`ScanConfig::batch_pages`]; larger values are clamped to it.
    pub const MAX_BATCH_PAGES: usize = 1 << 20;

    /// The number of pages actually mapped at once: `batch_pages` clamped to
    /// `1..=MAX_BATCH_PAGES`.
    pub fn effective_batch_pages(&self) -> usize {
        self.batch_pages.clamp(1, Self::MAX_BATCH_PAGES)
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        ScanConfig {
            max_depth: Self::DEFAULT_MAX_DEPTH,
            follow_symlinks: false,
            cgroup_mount: Self::DEFAULT_CGROUP_MOUNT.into(),
            batch_pages: Self::DEFAULT_BATCH_PAGES,
            page_count: PageCountPolicy::default(),
            pagemap_path: PageMap::SELF_PAGEMAP.into(),
            kpagecgroup_path: KPageCgroup::KPAGECGROUP.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inclusive_page_count() {
        let p = PageCountPolicy::Inclusive;
        assert_eq!(p.pages(0, 4096), 1);
        assert_eq!(p.pages(1, 4096), 1);
        assert_eq!(p.pages(4095, 4096), 1);
        // Exact multiples still get the extra page.
        assert_eq!(p.pages(4096, 4096), 2);
        assert_eq!(p.pages(3 * 4096, 4096), 4);
        assert_eq!(p.pages(3 * 4096 + 1, 4096), 4);
    }

    #[test]
    fn test_exact_page_count() {
        let p = PageCountPolicy::Exact;
        assert_eq!(p.pages(0, 4096), 0);
        assert_eq!(p.pages(1, 4096), 1);
        assert_eq!(p.pages(4096, 4096), 1);
        assert_eq!(p.pages(3 * 4096 + 1, 4096), 4);
    }

    #[test]
    fn test_defaults() {
        let c = ScanConfig::default();
        assert_eq!(c.max_depth, 12);
        assert!(!c.follow_symlinks);
        assert_eq!(c.batch_pages, 65536);
        assert_eq!(c.page_count, PageCountPolicy::Inclusive);
        assert_eq!(c.kpagecgroup_path, PathBuf::from("/proc/kpagecgroup"));
        assert_eq!(c.effective_batch_pages(), 65536);
    }

    #[test]
    fn test_batch_pages_are_clamped() {
        let batch = |batch_pages| {
            ScanConfig {
                batch_pages,
                ..Default::default()
            }
            .effective_batch_pages()
        };
        assert_eq!(batch(0), 1);
        assert_eq!(batch(1), 1);
        assert_eq!(batch(usize::MAX), ScanConfig::MAX_BATCH_PAGES);
    }
}
