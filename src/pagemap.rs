use std::fmt;
use std::path::Path;

use bitflags::bitflags;

use crate::{error::Result, table::Table};

///////////////////////////////////////////////////////////////////////////////////////////////////
//
// PageMapEntry
//
///////////////////////////////////////////////////////////////////////////////////////////////////

bitflags! {
    /// The flag bits of a `/proc/<PID>/pagemap` entry, as defined in Linux, at
    /// `fs/proc/task_mmu.c`.
    #[derive(Default)]
    pub struct PageMapFlags: u64 {
        const SOFT_DIRTY     = 1 << 55;
        const MMAP_EXCLUSIVE = 1 << 56;
        const UFFD_WP        = 1 << 57;
        const FILE           = 1 << 61;
        const SWAP           = 1 << 62;
        const PRESENT        = 1 << 63;
    }
}

/// An entry read from `/proc/<PID>/pagemap`.
///
/// Documentation and details about the various bits of the API can be found in Linux, at
/// [`doc/Documentation/vm/pagemap.txt`](https://www.kernel.org/doc/Documentation/vm/pagemap.txt).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageMapEntry(u64);

impl std::convert::From<u64> for PageMapEntry {
    fn from(raw: u64) -> Self {
        PageMapEntry(raw)
    }
}

impl PageMapEntry {
    pub const PM_PFRAME_BITS: u64 = 55;
    pub const PM_PFRAME_MASK: u64 = (1 << Self::PM_PFRAME_BITS) - 1;

    /// The raw `u64` value as read from [`procfs(5)`].
    ///
    /// [`procfs(5)`]: https://man7.org/linux/man-pages/man5/proc.5.html
    #[inline(always)]
    pub fn raw(&self) -> u64 {
        self.0
    }

    /// The flag bits of the entry.
    #[inline(always)]
    pub fn flags(&self) -> PageMapFlags {
        PageMapFlags::from_bits_truncate(self.0)
    }

    #[inline(always)]
    pub fn present(&self) -> bool {
        self.flags().contains(PageMapFlags::PRESENT)
    }

    #[inline(always)]
    pub fn swapped(&self) -> bool {
        self.flags().contains(PageMapFlags::SWAP)
    }

    #[inline(always)]
    pub fn file_mapped(&self) -> bool {
        self.flags().contains(PageMapFlags::FILE)
    }

    /// The page frame number held in bits 0-54.
    ///
    /// Zero means that no physical frame backs the page (or that the kernel hid it from us, which
    /// happens without `CAP_SYS_ADMIN`).
    #[inline(always)]
    pub fn pfn(&self) -> u64 {
        self.0 & Self::PM_PFRAME_MASK
    }

    /// Returns the page frame number, unless it is zero.
    #[inline]
    pub fn frame(&self) -> Option<u64> {
        match self.pfn() {
            0 => None,
            pfn => Some(pfn),
        }
    }
}

impl fmt::Display for PageMapEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PageMapEntry{{ present: {}; swapped: {}; file_mapped: {}; pfn: 0x{:x} }}",
            self.present(),
            self.swapped(),
            self.file_mapped(),
            self.pfn(),
        )
    }
}

///////////////////////////////////////////////////////////////////////////////////////////////////
//
// PageMap
//
///////////////////////////////////////////////////////////////////////////////////////////////////

/// A handle on the pagemap of the calling process, resolving virtual pages to page frames.
#[derive(Debug)]
pub struct PageMap {
    table: Table,
    page_size: u64,
}

impl PageMap {
    pub const SELF_PAGEMAP: &'static str = "/proc/self/pagemap";

    /// Open the pagemap table at `path`; normally [`PageMap::SELF_PAGEMAP`].
    pub fn open<P: AsRef<Path>>(path: P, page_size: u64) -> Result<Self> {
        Ok(PageMap {
            table: Table::open(path)?,
            page_size,
        })
    }

    /// Returns the entries for the `pages` consecutive virtual pages starting at `address`.
    ///
    /// # Errors
    ///
    /// Anything short of exactly `pages` entries is an error ([`CgError::ShortRead`]).
    ///
    /// [`CgError::ShortRead`]: crate::CgError::ShortRead
    pub fn entries(&self, address: u64, pages: usize) -> Result<Vec<PageMapEntry>> {
        let vpn = address / self.page_size;
        Ok(self
            .table
            .read_entries(vpn, pages)?
            .into_iter()
            .map(PageMapEntry::from)
            .collect())
    }
}
