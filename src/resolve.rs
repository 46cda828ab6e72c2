use std::collections::HashMap;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use log::debug;
use walkdir::WalkDir;

use crate::{
    error::{CgError, Result},
    stats::CgroupId,
};

/// Look up the directory under the cgroup mount point `mount` whose inode number is `id`.
///
/// This walks the whole cgroup hierarchy; see [`CgroupResolver`] for a memoizing wrapper.
/// Subdirectories that cannot be read are skipped, but failing to read `mount` itself is an
/// error.
pub fn find_cgroup(mount: &Path, id: CgroupId) -> Result<PathBuf> {
    for entry in WalkDir::new(mount) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if e.depth() == 0 => return Err(e.into()),
            Err(e) => {
                debug!("skipping part of cgroup hierarchy: {}", e);
                continue;
            }
        };
        if !entry.file_type().is_dir() {
            continue;
        }
        match entry.metadata() {
            Ok(meta) if meta.ino() == id => return Ok(entry.into_path()),
            Ok(_) => {}
            Err(e) => debug!("could not stat '{}': {}", entry.path().display(), e),
        }
    }
    Err(CgError::CgroupNotFound {
        id,
        mount: mount.display().to_string(),
    })
}

/// Resolves cgroup identifiers to paths under a cgroup mount point, remembering every answer
/// (including failures) for the rest of the run.
#[derive(Debug)]
pub struct CgroupResolver {
    mount: PathBuf,
    cache: HashMap<CgroupId, std::result::Result<PathBuf, String>>,
}

impl CgroupResolver {
    pub fn new<P: Into<PathBuf>>(mount: P) -> Self {
        CgroupResolver {
            mount: mount.into(),
            cache: HashMap::new(),
        }
    }

    /// Returns the path of the cgroup `id`, or the reason it could not be found.
    pub fn resolve(&mut self, id: CgroupId) -> std::result::Result<&Path, &str> {
        let mount = &self.mount;
        let resolved = self
            .cache
            .entry(id)
            .or_insert_with(|| find_cgroup(mount, id).map_err(|e| e.to_string()));
        match resolved {
            Ok(path) => Ok(path.as_path()),
            Err(e) => Err(e.as_str()),
        }
    }
}
