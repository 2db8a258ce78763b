use std::fs::Metadata;
use std::os::unix::fs::MetadataExt;
use std::path::Path;
use std::time::SystemTime;

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use gls_common::types::{FileEntry, FileList};
use gls_common::LS_METHOD;
use tracing::debug;
use walkdir::WalkDir;

use crate::rpc::Registry;

const MOD_TIME_FORMAT: &str = "%b %e %H:%M";

/// Registers `Ls.Ls` in the dispatch table.
pub fn register(registry: &mut Registry) {
    registry.register(LS_METHOD, |path: String| shallow_walk(Path::new(&path)));
}

/// Lists `root` followed by its immediate children.
///
/// The walk is depth-unbounded; every directory below the root is pruned as
/// soon as it has been emitted. Children come back sorted by file name.
/// Symlinks below the root are reported as links and never followed, while a
/// symlinked root is resolved (walkdir defaults). Any error aborts the listing.
pub fn shallow_walk(root: &Path) -> Result<FileList> {
    let mut entries = Vec::new();
    let mut walker = WalkDir::new(root).sort_by_file_name().into_iter();

    while let Some(entry) = walker.next() {
        let entry = entry.with_context(|| format!("failed to list {}", root.display()))?;
        let metadata = entry
            .metadata()
            .with_context(|| format!("lstat {}", entry.path().display()))?;

        entries.push(file_entry(&entry.file_name().to_string_lossy(), &metadata)?);

        if entry.depth() > 0 && metadata.is_dir() {
            walker.skip_current_dir();
        }
    }

    debug!(root = %root.display(), entries = entries.len(), "listed");
    Ok(FileList { entries })
}

pub fn file_entry(name: &str, metadata: &Metadata) -> Result<FileEntry> {
    let modified = metadata
        .modified()
        .with_context(|| format!("no modification time for {name}"))?;
    Ok(FileEntry {
        name: name.to_string(),
        size: metadata.len(),
        mode: mode_string(metadata.mode()),
        mod_time: format_mod_time(modified),
    })
}

pub fn format_mod_time(time: SystemTime) -> String {
    DateTime::<Local>::from(time).format(MOD_TIME_FORMAT).to_string()
}

/// Renders `st_mode` the way `ls -l` does, e.g. `drwxr-xr-x` or `-rwsr-xr-x`.
pub fn mode_string(mode: u32) -> String {
    let kind = match mode & libc::S_IFMT as u32 {
        m if m == libc::S_IFDIR as u32 => 'd',
        m if m == libc::S_IFLNK as u32 => 'l',
        m if m == libc::S_IFIFO as u32 => 'p',
        m if m == libc::S_IFSOCK as u32 => 's',
        m if m == libc::S_IFCHR as u32 => 'c',
        m if m == libc::S_IFBLK as u32 => 'b',
        _ => '-',
    };

    let mut s = String::with_capacity(10);
    s.push(kind);
    for (shift, special, set, unset) in [
        (6, libc::S_ISUID as u32, 's', 'S'),
        (3, libc::S_ISGID as u32, 's', 'S'),
        (0, libc::S_ISVTX as u32, 't', 'T'),
    ] {
        let bits = (mode >> shift) & 0o7;
        s.push(if bits & 0o4 != 0 { 'r' } else { '-' });
        s.push(if bits & 0o2 != 0 { 'w' } else { '-' });
        s.push(match (mode & special != 0, bits & 0o1 != 0) {
            (true, true) => set,
            (true, false) => unset,
            (false, true) => 'x',
            (false, false) => '-',
        });
    }
    s
}
