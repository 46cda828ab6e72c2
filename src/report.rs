use std::io::{self, Write};

use crate::{
    bytesize::ByteSize,
    resolve::CgroupResolver,
    stats::{Cgroup, Cgroups, RunStatistics},
};

/// Human-readable report of a finished run.
#[derive(Debug)]
pub struct Report<'a> {
    stats: &'a RunStatistics,
    page_size: u64,
    verbose: bool,
}

impl<'a> Report<'a> {
    pub fn new(stats: &'a RunStatistics, page_size: u64) -> Self {
        Report {
            stats,
            page_size,
            verbose: false,
        }
    }

    /// Also print a cgroup table for every scanned file.
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Write the whole report: warnings first, then the per-file sections (if verbose), the
    /// totals and the per-cgroup table of the run.
    pub fn write<W: Write>(&self, out: &mut W, resolver: &mut CgroupResolver) -> io::Result<()> {
        let stats = self.stats;

        for err in &stats.errors {
            writeln!(out, "Warning: {}", err)?;
        }
        if !stats.errors.is_empty() {
            writeln!(out)?;
        }

        if self.verbose {
            for file in stats.files.values() {
                writeln!(out, "{}", file.path.display())?;
                write_cgroups(out, &file.cgroups, file.charged, file.pages, resolver)?;
                writeln!(out, "\n--")?;
            }
        }

        let resident = (stats.charged * self.page_size).min(stats.size);
        writeln!(out, "{:>14}: {}", "Files", stats.files.len())?;
        writeln!(out, "{:>14}: {}", "Directories", stats.dirs)?;
        writeln!(
            out,
            "{:>14}: {}/{} {}/{} {:.1}%\n",
            "Resident Pages",
            stats.charged,
            stats.pages,
            ByteSize(resident),
            ByteSize(stats.size),
            percent(resident, stats.size),
        )?;

        write_cgroups(out, &stats.cgroups, stats.charged, stats.pages, resolver)
    }
}

/// Write the table of `cgroups`, preceded by a row for the `pages` that were not charged to any
/// of them. Cgroups are listed by decreasing page count.
pub fn write_cgroups<W: Write>(
    out: &mut W,
    cgroups: &Cgroups,
    charged: u64,
    pages: u64,
    resolver: &mut CgroupResolver,
) -> io::Result<()> {
    writeln!(
        out,
        "{:>12}{:>11}{:>12}{:>12}",
        "cgmem inode", "percent", "pages", "path"
    )?;

    let uncharged = pages.saturating_sub(charged);
    writeln!(
        out,
        "{:>12}{:>10.1}%{:>12}        {}",
        "-",
        percent(uncharged, pages),
        uncharged,
        "not charged"
    )?;

    let mut rows: Vec<&Cgroup> = cgroups.values().collect();
    rows.sort_by(|a, b| b.charged.cmp(&a.charged).then(a.id.cmp(&b.id)));
    for cg in rows {
        let path = match cg.id {
            0 => "no cgroup".to_owned(),
            id => match resolver.resolve(id) {
                Ok(path) => path.display().to_string(),
                Err(e) => e.to_owned(),
            },
        };
        writeln!(
            out,
            "{:>12}{:>10.1}%{:>12}        {}",
            cg.id,
            percent(cg.charged, pages),
            cg.charged,
            path
        )?;
    }
    Ok(())
}

fn percent(part: u64, whole: u64) -> f64 {
    match whole {
        0 => 0.0,
        _ => part as f64 * 100.0 / whole as f64,
    }
}
