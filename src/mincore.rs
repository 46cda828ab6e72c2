use std::fs::File;
use std::io;
use std::marker::PhantomData;
use std::os::unix::io::AsRawFd;

use log::trace;

use crate::error::{CgError, Result};

/// Access pattern advice passed to `madvise(2)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advice {
    /// `MADV_RANDOM`: disables read-ahead, so that no page is faulted in speculatively.
    Random,
    /// `MADV_SEQUENTIAL`: aggressive read-ahead; the default behavior for later accesses.
    Sequential,
}

impl Advice {
    fn as_raw(self) -> libc::c_int {
        match self {
            Advice::Random => libc::MADV_RANDOM,
            Advice::Sequential => libc::MADV_SEQUENTIAL,
        }
    }
}

/// A read-only, shared mapping of a page-aligned range of a file.
///
/// The mapping borrows the file it was created from and is unmapped when dropped.
#[derive(Debug)]
pub struct MappedRegion<'f> {
    addr: *mut libc::c_void,
    len: usize,
    page_size: usize,
    path: String,
    _file: PhantomData<&'f File>,
}

impl<'f> MappedRegion<'f> {
    /// Map `pages` pages of `file`, starting at `offset` (which must be page-aligned).
    pub fn map(
        file: &'f File,
        path: &str,
        offset: u64,
        pages: usize,
        page_size: usize,
    ) -> Result<Self> {
        let len = pages * page_size;
        // SAFETY: a fresh PROT_READ mapping with no address hint; the result is checked against
        // MAP_FAILED and the file outlives the mapping through the borrow held in `_file`.
        let addr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ,
                libc::MAP_SHARED,
                file.as_raw_fd(),
                offset as libc::off_t,
            )
        };
        if addr == libc::MAP_FAILED {
            return Err(CgError::from_os("mmap", path, io::Error::last_os_error()));
        }
        trace!(
            "mapped {} pages of '{}' at offset {} to {:p}",
            pages,
            path,
            offset,
            addr
        );
        Ok(MappedRegion {
            addr,
            len,
            page_size,
            path: path.to_owned(),
            _file: PhantomData,
        })
    }

    /// Returns the virtual address the region starts at.
    #[inline(always)]
    pub fn address(&self) -> u64 {
        self.addr as u64
    }

    /// Returns the number of pages in the region.
    #[inline(always)]
    pub fn pages(&self) -> usize {
        self.len / self.page_size
    }

    /// Apply the given access pattern advice to the whole region.
    pub fn advise(&self, advice: Advice) -> Result<()> {
        // SAFETY: addr and len describe a live mapping owned by self.
        match unsafe { libc::madvise(self.addr, self.len, advice.as_raw()) } {
            0 => Ok(()),
            _ => Err(CgError::from_os(
                "madvise",
                &self.path,
                io::Error::last_os_error(),
            )),
        }
    }

    /// Query the page cache residency of every page in the region, without faulting any of them
    /// in.
    pub fn residency(&self) -> Result<Vec<bool>> {
        let mut vec: Vec<libc::c_uchar> = vec![0; self.pages()];
        // SAFETY: vec holds one byte per page of the live mapping, as mincore(2) requires.
        match unsafe { libc::mincore(self.addr, self.len, vec.as_mut_ptr()) } {
            0 => Ok(vec.into_iter().map(|v| v & 1 == 1).collect()),
            _ => Err(CgError::from_os(
                "mincore",
                &self.path,
                io::Error::last_os_error(),
            )),
        }
    }

    /// Perform a single one-byte read access at the start of page `page` of the region, so that
    /// the kernel installs a page table entry for it.
    ///
    /// Only call this for pages reported resident by [`MappedRegion::residency`]; touching any
    /// other page would read it in from storage.
    ///
    /// # Panics
    ///
    /// Panics if `page` lies outside the region.
    #[inline]
    pub fn touch(&self, page: usize) -> u8 {
        assert!(page < self.pages(), "page {} outside of mapped region", page);
        // SAFETY: the address lies inside the live, readable mapping.
        unsafe { std::ptr::read_volatile((self.addr as *const u8).add(page * self.page_size)) }
    }
}

impl Drop for MappedRegion<'_> {
    fn drop(&mut self) {
        // SAFETY: addr and len are exactly what mmap(2) returned and was asked for.
        if unsafe { libc::munmap(self.addr, self.len) } != 0 {
            log::warn!(
                "munmap failed for '{}': {}",
                self.path,
                io::Error::last_os_error()
            );
        }
    }
}

/// Find the pages of `region` that are already in the page cache, and touch exactly those, so
/// that they become visible in `/proc/self/pagemap`.
///
/// Read-ahead is disabled meanwhile so that no absent page gets faulted in, and switched to
/// sequential afterwards. Returns the indices of the resident pages, in increasing order.
pub fn touch_resident(region: &MappedRegion<'_>) -> Result<Vec<usize>> {
    region.advise(Advice::Random)?;

    let resident: Vec<usize> = region
        .residency()?
        .into_iter()
        .enumerate()
        .filter(|(_, r)| *r)
        .map(|(i, _)| i)
        .collect();
    for &i in &resident {
        region.touch(i);
    }

    region.advise(Advice::Sequential)?;
    Ok(resident)
}
