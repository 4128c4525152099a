use std::path::{Path, PathBuf};

use globset::{Glob, GlobSet, GlobSetBuilder};

use crate::error::{Error, Result};

/// A file found under a collection root.
#[derive(Debug, Clone)]
pub struct DiscoveredFile {
    /// Path relative to the collection root directory.
    pub relative_path: PathBuf,
    /// Fully resolved absolute path.
    pub absolute_path: PathBuf,
}

impl DiscoveredFile {
    pub fn relative_str(&self) -> String {
        self.relative_path.to_string_lossy().into_owned()
    }
}

/// Compile exclude patterns, matched against paths relative to the root.
pub fn build_excludes<S: AsRef<str>>(patterns: &[S]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern.as_ref()).map_err(|e| {
            Error::Config(format!("invalid glob pattern: {e}"))
        })?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| Error::Config(format!("invalid glob pattern: {e}")))
}

/// Recursively walk a directory and return every regular file under it.
///
/// Hidden files and directories (names starting with `.`) are skipped, as
/// are files whose relative path matches `excludes`. Classification by
/// format is left to the caller, so unrecognized files are returned too.
pub fn discover_files(
    root: &Path,
    excludes: Option<&GlobSet>,
) -> Result<Vec<DiscoveredFile>> {
    let canonical_root = root.canonicalize()?;
    let mut results = Vec::new();
    walk_dir(&canonical_root, &canonical_root, excludes, &mut results)?;
    results.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    Ok(results)
}

fn walk_dir(
    root: &Path,
    current: &Path,
    excludes: Option<&GlobSet>,
    results: &mut Vec<DiscoveredFile>,
) -> Result<()> {
    let entries = std::fs::read_dir(current)?;

    for entry in entries {
        let entry = entry?;
        let file_name = entry.file_name();
        let name = file_name.to_string_lossy();

        if name.starts_with('.') {
            continue;
        }

        let path = entry.path();
        let relative_path =
            path.strip_prefix(root).unwrap_or(&path).to_path_buf();
        if excludes.is_some_and(|set| set.is_match(&relative_path)) {
            continue;
        }

        let file_type = entry.file_type()?;

        if file_type.is_dir() {
            walk_dir(root, &path, excludes, results)?;
        } else if file_type.is_symlink() {
            let resolved = match path.canonicalize() {
                Ok(p) => p,
                Err(_) => continue, // broken symlink
            };
            // Directory links are not followed, which also rules out cycles.
            if resolved.is_file() {
                results.push(DiscoveredFile {
                    relative_path,
                    absolute_path: resolved,
                });
            }
        } else if file_type.is_file() {
            results.push(DiscoveredFile {
                relative_path,
                absolute_path: path.canonicalize()?,
            });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(files: &[DiscoveredFile]) -> Vec<String> {
        files.iter().map(DiscoveredFile::relative_str).collect()
    }

    #[test]
    fn returns_every_regular_file() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("ethanol.mol"), "x").unwrap();
        std::fs::write(tmp.path().join("notes.txt"), "x").unwrap();

        let files = discover_files(tmp.path(), None).unwrap();
        assert_eq!(names(&files), vec!["ethanol.mol", "notes.txt"]);
        assert!(files[0].absolute_path.is_absolute());
    }

    #[test]
    fn skips_hidden_entries() {
        let tmp = tempfile::tempdir().unwrap();
        let hidden = tmp.path().join(".cache");
        std::fs::create_dir(&hidden).unwrap();
        std::fs::write(hidden.join("a.mol"), "x").unwrap();
        std::fs::write(tmp.path().join(".b.mol"), "x").unwrap();
        std::fs::write(tmp.path().join("c.mol"), "x").unwrap();

        let files = discover_files(tmp.path(), None).unwrap();
        assert_eq!(names(&files), vec!["c.mol"]);
    }

    #[test]
    fn recurses_and_sorts() {
        let tmp = tempfile::tempdir().unwrap();
        let sub = tmp.path().join("rxn");
        std::fs::create_dir(&sub).unwrap();
        std::fs::write(sub.join("ester.rxn"), "x").unwrap();
        std::fs::write(tmp.path().join("z.sdf"), "x").unwrap();
        std::fs::write(tmp.path().join("a.mol"), "x").unwrap();

        let files = discover_files(tmp.path(), None).unwrap();
        assert_eq!(names(&files), vec!["a.mol", "rxn/ester.rxn", "z.sdf"]);
    }

    #[test]
    fn excludes_match_relative_paths() {
        let tmp = tempfile::tempdir().unwrap();
        let drafts = tmp.path().join("drafts");
        std::fs::create_dir(&drafts).unwrap();
        std::fs::write(drafts.join("wip.mol"), "x").unwrap();
        std::fs::write(tmp.path().join("keep.mol"), "x").unwrap();
        std::fs::write(tmp.path().join("skip.bak"), "x").unwrap();

        let excludes = build_excludes(&["drafts", "*.bak"]).unwrap();
        let files = discover_files(tmp.path(), Some(&excludes)).unwrap();
        assert_eq!(names(&files), vec!["keep.mol"]);
    }

    #[test]
    fn invalid_exclude_pattern() {
        assert!(matches!(
            build_excludes(&["a[b"]),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn missing_root_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(matches!(
            discover_files(&tmp.path().join("absent"), None),
            Err(Error::Io(_))
        ));
    }

    #[test]
    fn empty_directory() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(discover_files(tmp.path(), None).unwrap().is_empty());
    }
}
