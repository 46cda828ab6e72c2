//! Find out which memory cgroups are charged for the pages of a set of files that currently sit
//! in the page cache.
//!
//! Files are mapped in bounded batches; the pages found resident with `mincore(2)` (and only
//! those) are touched so that they show up in `/proc/self/pagemap`, whose frame numbers are then
//! looked up in `/proc/kpagecgroup`. Nothing is ever read in from storage.
//!
//! Mind the peculiarities regarding permissions and `CAP_SYS_ADMIN`, documented here:
//! https://www.kernel.org/doc/Documentation/vm/pagemap.txt
#![doc(html_root_url = "https://docs.rs/cgcache/0.1.0")]
#![warn(rust_2018_idioms)]
#![deny(
    //missing_docs,
    unreachable_pub,
    rustdoc::broken_intra_doc_links,
)]

mod bytesize;
mod config;
mod error;
mod kpagecgroup;
mod mincore;
mod pagemap;
mod report;
mod resolve;
mod scan;
mod stats;
mod table;
mod walk;

pub use crate::pagemap::{PageMap, PageMapEntry, PageMapFlags};
pub use bytesize::ByteSize;
pub use config::{PageCountPolicy, ScanConfig};
pub use error::{CgError, Result};
pub use kpagecgroup::KPageCgroup;
pub use mincore::{touch_resident, Advice, MappedRegion};
pub use report::{write_cgroups, Report};
pub use resolve::{find_cgroup, CgroupResolver};
pub use scan::{KernelTables, PageTables, Scanner};
pub use stats::{Cgroup, CgroupId, Cgroups, FileRecord, RunStatistics};
pub use table::{Table, ENTRY_SIZE};
pub use walk::Walker;

/// The size of a virtual memory page, as reported by `sysconf(3)`.
pub fn page_size() -> Result<u64> {
    match unsafe { libc::sysconf(libc::_SC_PAGESIZE) } {
        -1 => Err(std::io::Error::last_os_error().into()),
        sz => Ok(sz as u64),
    }
}
