use std::fs;
use std::path::{Path, PathBuf};

use log::debug;
use walkdir::{DirEntry, WalkDir};

use crate::{
    config::ScanConfig,
    error::{CgError, Result},
    stats::RunStatistics,
};

/// Expands the paths given on the command line into the regular files beneath them.
///
/// Problems with individual paths (unreadable directories, disallowed symlinks, directories
/// beyond the maximum depth, special files) are recorded on the [`RunStatistics`] and never stop
/// the walk.
#[derive(Debug, Clone)]
pub struct Walker {
    max_depth: usize,
    follow_symlinks: bool,
}

impl Walker {
    pub fn new(max_depth: usize, follow_symlinks: bool) -> Self {
        Walker {
            max_depth,
            follow_symlinks,
        }
    }

    pub fn from_config(config: &ScanConfig) -> Self {
        Self::new(config.max_depth, config.follow_symlinks)
    }

    /// Walk `paths` in order, calling `visit` for every regular file found. Directory entries
    /// are visited sorted by name. Errors returned by `visit` are recorded as well.
    pub fn walk<F>(&self, paths: &[PathBuf], stats: &mut RunStatistics, visit: &mut F)
    where
        F: FnMut(&Path, &mut RunStatistics) -> Result<()>,
    {
        for path in paths {
            self.walk_root(&absolute(path), 0, stats, visit);
        }
    }

    /// Walk the tree under `root`, which lies `base` levels below a path given to
    /// [`Walker::walk`].
    fn walk_root<F>(&self, root: &Path, base: usize, stats: &mut RunStatistics, visit: &mut F)
    where
        F: FnMut(&Path, &mut RunStatistics) -> Result<()>,
    {
        let walker = WalkDir::new(root)
            .follow_links(false)
            .follow_root_links(false)
            .sort_by_file_name()
            .max_depth(self.max_depth.saturating_sub(base));
        for entry in walker {
            match entry {
                Ok(entry) => {
                    debug!("working with path: {}", entry.path().display());
                    let depth = base + entry.depth();
                    if let Err(e) = self.visit_entry(&entry, depth, stats, visit) {
                        stats.record_error(e);
                    }
                }
                Err(e) => stats.record_error(e.into()),
            }
        }
    }

    fn visit_entry<F>(
        &self,
        entry: &DirEntry,
        depth: usize,
        stats: &mut RunStatistics,
        visit: &mut F,
    ) -> Result<()>
    where
        F: FnMut(&Path, &mut RunStatistics) -> Result<()>,
    {
        let path = entry.path();
        let file_type = entry.file_type();

        if file_type.is_symlink() {
            if !self.follow_symlinks {
                return Err(CgError::SymlinkNotFollowed(path.display().to_string()));
            }
            let target = fs::canonicalize(path).map_err(|e| CgError::Stat {
                path: path.display().to_string(),
                source: e,
            })?;
            let meta = fs::symlink_metadata(&target).map_err(|e| CgError::Stat {
                path: target.display().to_string(),
                source: e,
            })?;
            return if meta.is_dir() {
                self.walk_root(&target, depth, stats, visit);
                Ok(())
            } else if meta.is_file() {
                visit(&target, stats)
            } else {
                Err(CgError::NotRegular(target.display().to_string()))
            };
        }

        if file_type.is_dir() {
            stats.record_dir();
            // Entries at the maximum depth are yielded, but never descended into.
            if depth >= self.max_depth {
                return Err(CgError::MaxDepth(path.display().to_string()));
            }
            Ok(())
        } else if file_type.is_file() {
            visit(path, stats)
        } else {
            Err(CgError::NotRegular(path.display().to_string()))
        }
    }
}

/// Make `path` absolute against the current directory, dropping `.` components and repeated
/// separators. `..` is kept as is, since resolving it lexically is wrong across symlinks.
fn absolute(path: &Path) -> PathBuf {
    let path = if path.is_absolute() {
        path.to_path_buf()
    } else {
        match std::env::current_dir() {
            Ok(cwd) => cwd.join(path),
            Err(_) => path.to_path_buf(),
        }
    };
    path.components().collect()
}
