//! Spec file lookup across ordered search directories.
//!
//! A driver named `foo` is advertised by `foo.sock`, `foo.spec` or
//! `foo.json`. Within a directory the extensions rank in that order; across
//! directories the first directory listing the name wins outright.

use std::{
    collections::{BTreeMap, btree_map::Entry},
    fmt, fs, io,
    path::{Path, PathBuf},
};

use tracing::{debug, trace};

use crate::error::{Error, Result};

/// On-disk spec form, in precedence order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SpecKind {
    Sock,
    Spec,
    Json,
}

impl SpecKind {
    pub const ALL: [Self; 3] = [Self::Sock, Self::Spec, Self::Json];

    pub fn extension(self) -> &'static str {
        match self {
            Self::Sock => "sock",
            Self::Spec => "spec",
            Self::Json => "json",
        }
    }

    fn from_extension(ext: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.extension() == ext)
    }
}

impl fmt::Display for SpecKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// The winning spec file for one driver name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecLocation {
    pub name: String,
    pub path: PathBuf,
    pub kind: SpecKind,
}

#[derive(Debug, Clone)]
pub struct SpecLocator {
    search_paths: Vec<PathBuf>,
}

impl SpecLocator {
    pub fn new(search_paths: Vec<PathBuf>) -> Self {
        Self { search_paths }
    }

    pub fn search_paths(&self) -> &[PathBuf] {
        &self.search_paths
    }

    /// One location per driver name, sorted by name.
    ///
    /// Missing directories are skipped. Any other failure to list a
    /// directory fails the whole call.
    pub fn locate(&self) -> Result<Vec<SpecLocation>> {
        let mut winners: BTreeMap<String, SpecLocation> = BTreeMap::new();

        for dir in &self.search_paths {
            for (name, location) in scan_dir(dir)? {
                match winners.entry(name) {
                    Entry::Vacant(slot) => {
                        slot.insert(location);
                    },
                    Entry::Occupied(kept) => trace!(
                        driver = %kept.key(),
                        kept = %kept.get().path.display(),
                        shadowed = %location.path.display(),
                        "spec shadowed by earlier search path"
                    ),
                }
            }
        }

        Ok(winners.into_values().collect())
    }
}

/// Best spec per name inside a single directory.
fn scan_dir(dir: &Path) -> Result<BTreeMap<String, SpecLocation>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            debug!(path = %dir.display(), "search path does not exist, skipping");
            return Ok(BTreeMap::new());
        },
        Err(source) => {
            return Err(Error::SearchPath {
                path: dir.to_path_buf(),
                source,
            });
        },
    };

    let mut found: BTreeMap<String, SpecLocation> = BTreeMap::new();
    for entry in entries {
        let entry = entry.map_err(|source| Error::SearchPath {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        if path.is_dir() {
            continue;
        }

        let (Some(stem), Some(ext)) = (
            path.file_stem().and_then(|s| s.to_str()),
            path.extension().and_then(|s| s.to_str()),
        ) else {
            continue;
        };
        let Some(kind) = SpecKind::from_extension(ext) else {
            continue;
        };
        if stem.is_empty() {
            continue;
        }

        let candidate = SpecLocation {
            name: stem.to_string(),
            path,
            kind,
        };
        match found.entry(candidate.name.clone()) {
            Entry::Vacant(slot) => {
                slot.insert(candidate);
            },
            Entry::Occupied(mut slot) => {
                if candidate.kind < slot.get().kind {
                    slot.insert(candidate);
                }
            },
        }
    }

    Ok(found)
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn touch(dir: &Path, file: &str) {
        fs::write(dir.join(file), "x").unwrap();
    }

    #[test]
    fn sock_beats_spec_beats_json() {
        let tmp = tempfile::tempdir().unwrap();
        touch(tmp.path(), "foo.json");
        touch(tmp.path(), "foo.spec");
        touch(tmp.path(), "foo.sock");
        touch(tmp.path(), "bar.json");
        touch(tmp.path(), "bar.spec");

        let found = SpecLocator::new(vec![tmp.path().to_path_buf()]).locate().unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].name, "bar");
        assert_eq!(found[0].kind, SpecKind::Spec);
        assert_eq!(found[1].name, "foo");
        assert_eq!(found[1].kind, SpecKind::Sock);
    }

    #[test]
    fn first_directory_wins_regardless_of_extension() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        touch(first.path(), "foo.json");
        touch(second.path(), "foo.sock");
        touch(second.path(), "only-second.spec");

        let found = SpecLocator::new(vec![first.path().into(), second.path().into()])
            .locate()
            .unwrap();
        assert_eq!(found[0].name, "foo");
        assert_eq!(found[0].path, first.path().join("foo.json"));
        assert_eq!(found[1].name, "only-second");
    }

    #[test]
    fn ignores_unrelated_files_and_directories() {
        let tmp = tempfile::tempdir().unwrap();
        touch(tmp.path(), "README.md");
        touch(tmp.path(), "noext");
        touch(tmp.path(), ".spec");
        fs::create_dir(tmp.path().join("dir.spec")).unwrap();

        let found = SpecLocator::new(vec![tmp.path().into()]).locate().unwrap();
        assert!(found.is_empty());
    }

    #[test]
    fn missing_directory_is_empty() {
        let found = SpecLocator::new(vec![PathBuf::from("/nonexistent/volbroker")])
            .locate()
            .unwrap();
        assert!(found.is_empty());
    }

    #[test]
    fn unreadable_directory_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let not_a_dir = tmp.path().join("plugins");
        fs::write(&not_a_dir, "").unwrap();

        let err = SpecLocator::new(vec![not_a_dir.clone()]).locate().unwrap_err();
        match err {
            Error::SearchPath { path, .. } => assert_eq!(path, not_a_dir),
            other => panic!("unexpected error {other}"),
        }
    }
}
