use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use globset::{Glob, GlobSet, GlobSetBuilder};
use tracing::{debug, warn};

use crate::error::Result;

/// A candidate document file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredFile {
    /// Path relative to the root directory.
    pub relative_path: PathBuf,
    /// Fully resolved absolute path.
    pub absolute_path: PathBuf,
    pub size: u64,
}

/// Which files under a root become candidates.
#[derive(Debug, Clone)]
pub struct WalkOptions<'a> {
    pub recursive: bool,
    pub include: &'a [String],
    pub exclude: &'a [String],
    pub max_file_size: u64,
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

/// Walk `root` and return de-duplicated candidates sorted by relative path.
///
/// Skips hidden files/directories (names starting with `.`), broken
/// symlinks, symlinked directories, empty files and files larger than
/// `max_file_size`. A file is kept when any include pattern matches its
/// relative path and no exclude pattern matches its relative or absolute
/// path. Two entries resolving to the same file are kept once.
pub fn discover_files(
    root: &Path,
    options: &WalkOptions<'_>,
) -> Result<Vec<DiscoveredFile>> {
    let include = build_globset(options.include)?;
    let exclude = build_globset(options.exclude)?;
    let canonical_root = root.canonicalize()?;

    let mut found = BTreeMap::new();
    walk_dir(&canonical_root, &canonical_root, options.recursive, &mut |file| {
        if file.size == 0 {
            debug!(path = %file.relative_path.display(), "skipping empty file");
            return;
        }
        if file.size > options.max_file_size {
            debug!(
                path = %file.relative_path.display(),
                size = file.size,
                "skipping file over size limit"
            );
            return;
        }
        if !include.is_match(&file.relative_path) {
            return;
        }
        if exclude.is_match(&file.relative_path)
            || exclude.is_match(&file.absolute_path)
        {
            debug!(path = %file.relative_path.display(), "excluded");
            return;
        }
        found.entry(file.absolute_path.clone()).or_insert(file);
    })?;

    let mut results: Vec<_> = found.into_values().collect();
    results.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    Ok(results)
}

/// Visit the entries of `current`. Only failing to list `current` itself is
/// an error; unreadable entries below it are logged and skipped.
fn walk_dir(
    root: &Path,
    current: &Path,
    recursive: bool,
    visit: &mut dyn FnMut(DiscoveredFile),
) -> Result<()> {
    let entries = std::fs::read_dir(current)?;

    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!(dir = %current.display(), %err, "skipping unreadable entry");
                continue;
            }
        };
        let path = entry.path();
        let file_name = entry.file_name();

        if file_name.to_string_lossy().starts_with('.') {
            continue;
        }

        let file_type = match entry.file_type() {
            Ok(file_type) => file_type,
            Err(err) => {
                warn!(path = %path.display(), %err, "skipping entry without file type");
                continue;
            }
        };

        if file_type.is_dir() {
            if recursive {
                descend(root, &path, visit);
            }
        } else if file_type.is_symlink() {
            let Ok(resolved) = path.canonicalize() else {
                debug!(path = %path.display(), "skipping broken symlink");
                continue;
            };
            if !resolved.is_file() {
                continue;
            }
            if let Some(file) = make_discovered(root, &path, &resolved) {
                visit(file);
            }
        } else if file_type.is_file() {
            let abs = match path.canonicalize() {
                Ok(abs) => abs,
                Err(err) => {
                    warn!(path = %path.display(), %err, "skipping unresolvable file");
                    continue;
                }
            };
            if let Some(file) = make_discovered(root, &path, &abs) {
                visit(file);
            }
        }
    }

    Ok(())
}

fn descend(root: &Path, dir: &Path, visit: &mut dyn FnMut(DiscoveredFile)) {
    if let Err(err) = walk_dir(root, dir, true, visit) {
        warn!(dir = %dir.display(), %err, "skipping unreadable directory");
    }
}

fn make_discovered(
    root: &Path,
    original_path: &Path,
    absolute_path: &Path,
) -> Option<DiscoveredFile> {
    let relative_path = original_path
        .strip_prefix(root)
        .unwrap_or(original_path)
        .to_path_buf();
    let size = match std::fs::metadata(absolute_path) {
        Ok(meta) => meta.len(),
        Err(err) => {
            warn!(path = %absolute_path.display(), %err, "skipping file without metadata");
            return None;
        }
    };

    Some(DiscoveredFile {
        relative_path,
        absolute_path: absolute_path.to_path_buf(),
        size,
    })
}
