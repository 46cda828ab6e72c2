use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::Context;
use clap::{builder::RangedU64ValueParser, Parser};
use log::LevelFilter;

use cgcache::{CgroupResolver, PageCountPolicy, Report, ScanConfig, Scanner};

/// Show which memory cgroups are charged for the page cache pages of files.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Files and directories to inspect
    #[arg(value_name = "PATH", required = true)]
    paths: Vec<PathBuf>,

    /// Debug mode: trace every file and page frame
    #[arg(short, long)]
    debug: bool,

    /// Verbose mode: per-file cgroup tables
    #[arg(short, long)]
    verbose: bool,

    /// Follow symbolic links
    #[arg(short, long)]
    follow: bool,

    /// Maximum depth to walk into directories
    #[arg(short = 'p', long, default_value_t = ScanConfig::DEFAULT_MAX_DEPTH)]
    max_depth: usize,

    /// Memory cgroup mount point
    #[arg(short, long, default_value = ScanConfig::DEFAULT_CGROUP_MOUNT)]
    mount: PathBuf,

    /// Count the pages a file actually spans, instead of one more than its full pages
    #[arg(long)]
    exact_pages: bool,

    /// Pages mapped at once while scanning a file
    #[arg(
        long,
        default_value_t = ScanConfig::DEFAULT_BATCH_PAGES,
        value_parser = RangedU64ValueParser::<usize>::new()
            .range(1..=ScanConfig::MAX_BATCH_PAGES as u64),
        hide = true
    )]
    batch_pages: usize,
}

impl Args {
    fn config(&self) -> ScanConfig {
        ScanConfig {
            max_depth: self.max_depth,
            follow_symlinks: self.follow,
            cgroup_mount: self.mount.clone(),
            batch_pages: self.batch_pages,
            page_count: if self.exact_pages {
                PageCountPolicy::Exact
            } else {
                PageCountPolicy::Inclusive
            },
            ..Default::default()
        }
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    env_logger::Builder::new()
        .filter_level(LevelFilter::Warn)
        .filter_module(
            "cgcache",
            if args.debug {
                LevelFilter::Debug
            } else {
                LevelFilter::Warn
            },
        )
        .parse_default_env()
        .init();

    let config = args.config();
    let mut scanner = Scanner::new(config.clone()).context("failed to open the kernel tables")?;
    let stats = scanner.scan_paths(&args.paths);

    let mut resolver = CgroupResolver::new(config.cgroup_mount);
    let stdout = io::stdout();
    let mut out = stdout.lock();
    Report::new(&stats, scanner.page_size())
        .verbose(args.verbose)
        .write(&mut out, &mut resolver)?;
    out.flush()?;

    Ok(())
}
