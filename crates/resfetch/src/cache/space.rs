//! Free-space probing for the cache root.

use std::fmt::Debug;
use std::io;
use std::path::{Path, PathBuf};

use sysinfo::Disks;

/// Reports how many bytes can still be written under a path
pub trait SpaceProbe: Send + Sync + Debug {
    fn available_bytes(&self, path: &Path) -> io::Result<u64>;
}

/// Probe backed by the operating system's disk list.
///
/// The disk whose mount point is the longest prefix of the path wins. The path
/// does not need to exist yet; its nearest existing ancestor is used.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiskSpaceProbe;

impl SpaceProbe for DiskSpaceProbe {
    fn available_bytes(&self, path: &Path) -> io::Result<u64> {
        let target = existing_ancestor(path)?;
        let disks = Disks::new_with_refreshed_list();

        disks
            .list()
            .iter()
            .filter(|disk| target.starts_with(disk.mount_point()))
            .max_by_key(|disk| disk.mount_point().as_os_str().len())
            .map(|disk| disk.available_space())
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no disk found for {}", target.display()),
                )
            })
    }
}

/// Canonical form of the closest ancestor of `path` that exists
fn existing_ancestor(path: &Path) -> io::Result<PathBuf> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };

    for candidate in absolute.ancestors() {
        if candidate.exists() {
            return candidate.canonicalize();
        }
    }

    Err(io::Error::new(
        io::ErrorKind::NotFound,
        format!("no existing ancestor for {}", path.display()),
    ))
}

/// A probe that always reports the same amount of free space
#[derive(Debug, Clone, Copy)]
pub struct FixedSpace(pub u64);

impl SpaceProbe for FixedSpace {
    fn available_bytes(&self, _path: &Path) -> io::Result<u64> {
        Ok(self.0)
    }
}

/// A probe that never refuses a write
#[derive(Debug, Default, Clone, Copy)]
pub struct UnlimitedSpace;

impl SpaceProbe for UnlimitedSpace {
    fn available_bytes(&self, _path: &Path) -> io::Result<u64> {
        Ok(u64::MAX)
    }
}
