use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Result, TenancyError};
use crate::model::Changeset;
use crate::store::traits::ChangesetSource;

/// Changesets compiled into the binary
#[derive(Debug, Clone, Default)]
pub struct StaticChangesets {
    changesets: Vec<Changeset>,
}

impl StaticChangesets {
    pub fn new(changesets: Vec<Changeset>) -> Self {
        Self { changesets }
    }
}

impl ChangesetSource for StaticChangesets {
    fn changesets(&self) -> Result<Vec<Changeset>> {
        Ok(self.changesets.clone())
    }
}

/// Changesets read from a directory of `<id>.up.sql` files with optional
/// matching `<id>.down.sql` files, ordered by id.
///
/// The directory is re-read on every call so operators can add scripts
/// without restarting anything.
#[derive(Debug, Clone)]
pub struct DirectoryChangesets {
    dir: PathBuf,
}

const UP_SUFFIX: &str = ".up.sql";
const DOWN_SUFFIX: &str = ".down.sql";

impl DirectoryChangesets {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

fn read(path: &Path) -> Result<String> {
    fs::read_to_string(path)
        .map_err(|e| TenancyError::ChangesetSource(format!("{}: {e}", path.display())))
}

impl ChangesetSource for DirectoryChangesets {
    fn changesets(&self) -> Result<Vec<Changeset>> {
        let entries = fs::read_dir(&self.dir)
            .map_err(|e| TenancyError::ChangesetSource(format!("{}: {e}", self.dir.display())))?;

        let mut ups = BTreeMap::new();
        let mut downs = BTreeMap::new();
        for entry in entries {
            let path = entry
                .map_err(|e| TenancyError::ChangesetSource(e.to_string()))?
                .path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if let Some(id) = name.strip_suffix(UP_SUFFIX) {
                ups.insert(id.to_string(), read(&path)?);
            } else if let Some(id) = name.strip_suffix(DOWN_SUFFIX) {
                downs.insert(id.to_string(), read(&path)?);
            }
        }

        if let Some(orphan) = downs.keys().find(|id| !ups.contains_key(*id)) {
            return Err(TenancyError::ChangesetSource(format!(
                "{orphan}{DOWN_SUFFIX} has no matching {orphan}{UP_SUFFIX}"
            )));
        }

        Ok(ups
            .into_iter()
            .map(|(id, up)| {
                let down = downs.remove(&id);
                Changeset { id, up, down }
            })
            .collect())
    }
}
