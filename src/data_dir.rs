use std::{
    ffi::OsString,
    path::{Path, PathBuf},
};

use tracing::debug;

use crate::error::{Error, Result};

/// Environment variable overriding the storage root.
pub const DATA_DIR_ENV: &str = "DOCSHELF_DATA_DIR";

const INDEXES_SUBDIR: &str = "indexes";

/// Where docshelf keeps its state: `<root>/indexes/<name>/` per index.
#[derive(Debug, Clone)]
pub struct DataDir {
    root: PathBuf,
}

/// Which setting produced the storage root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RootSource {
    Flag,
    Env,
    Xdg,
}

/// Pick the storage root without touching the filesystem.
///
/// `--data-dir` wins over the environment; a blank environment value counts
/// as unset. `None` means the XDG data home should be used.
fn pick_root(
    explicit: Option<&Path>,
    env: Option<OsString>,
) -> Option<(PathBuf, RootSource)> {
    if let Some(path) = explicit {
        return Some((path.to_path_buf(), RootSource::Flag));
    }
    env.filter(|v| !v.is_empty())
        .map(|v| (PathBuf::from(v), RootSource::Env))
}

fn ensure_dir(path: PathBuf) -> Result<PathBuf> {
    std::fs::create_dir_all(&path).map_err(|_| Error::DataDir(path.clone()))?;
    Ok(path)
}

impl DataDir {
    /// Resolve and create the storage root: `--data-dir`, then
    /// `DOCSHELF_DATA_DIR`, then `$XDG_DATA_HOME/docshelf`.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        let (root, source) =
            match pick_root(explicit, std::env::var_os(DATA_DIR_ENV)) {
                Some(picked) => picked,
                None => {
                    let home = xdg::BaseDirectories::with_prefix("docshelf")
                        .get_data_home()
                        .ok_or_else(|| {
                            Error::Config(
                                "could not determine XDG data home directory"
                                    .into(),
                            )
                        })?;
                    (home, RootSource::Xdg)
                }
            };
        debug!(root = %root.display(), ?source, "resolved data directory");

        Ok(Self {
            root: ensure_dir(root)?,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Storage root handed to [`IndexManager`](crate::IndexManager).
    pub fn indexes_dir(&self) -> Result<PathBuf> {
        ensure_dir(self.root.join(INDEXES_SUBDIR))
    }
}
