// ABOUTME: File-system boundary used by the export and import engines
// ABOUTME: Local disk implementation plus an in-memory one for buffered-only callers

use crate::error::{Result, TransferError};
use regex::Regex;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Minimal file-system operations the engines need.
///
/// Only the local implementation is eligible for streaming export; any other
/// sink receives the complete buffered output through [`FileSystem::write_file`].
pub trait FileSystem {
    fn is_dir(&self, path: &Path) -> bool;

    fn mkdir(&self, path: &Path, recursive: bool) -> Result<()>;

    fn read_file(&self, path: &Path) -> Result<Vec<u8>>;

    fn write_file(&self, path: &Path, contents: &[u8]) -> Result<()>;

    fn file_exists(&self, path: &Path) -> bool;

    /// Files matching a pattern whose last component may contain `*` and `?`.
    fn glob(&self, pattern: &Path) -> Result<Vec<PathBuf>>;

    /// Whether paths refer to the real local disk.
    fn is_local(&self) -> bool;
}

/// Translate a file-name wildcard into an anchored regex.
fn wildcard_regex(pattern: &str) -> Result<Regex> {
    let mut expr = String::from("^");
    for ch in pattern.chars() {
        match ch {
            '*' => expr.push_str(".*"),
            '?' => expr.push('.'),
            other => expr.push_str(&regex::escape(&other.to_string())),
        }
    }
    expr.push('$');
    Regex::new(&expr)
        .map_err(|e| TransferError::Configuration(format!("Invalid file pattern '{}': {}", pattern, e)))
}

fn split_pattern(pattern: &Path) -> (PathBuf, String) {
    let dir = pattern
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let name = pattern
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    (dir, name)
}

/// `std::fs`-backed file system.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalFileSystem;

impl FileSystem for LocalFileSystem {
    fn is_dir(&self, path: &Path) -> bool {
        path.is_dir()
    }

    fn mkdir(&self, path: &Path, recursive: bool) -> Result<()> {
        let result = if recursive {
            std::fs::create_dir_all(path)
        } else {
            std::fs::create_dir(path)
        };
        result.map_err(|e| TransferError::io(path, e))
    }

    fn read_file(&self, path: &Path) -> Result<Vec<u8>> {
        std::fs::read(path).map_err(|e| TransferError::io(path, e))
    }

    fn write_file(&self, path: &Path, contents: &[u8]) -> Result<()> {
        std::fs::write(path, contents).map_err(|e| TransferError::io(path, e))
    }

    fn file_exists(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn glob(&self, pattern: &Path) -> Result<Vec<PathBuf>> {
        let (dir, name) = split_pattern(pattern);
        let matcher = wildcard_regex(&name)?;
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(TransferError::io(&dir, e)),
        };

        let mut matches = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| TransferError::io(&dir, e))?;
            let file_name = entry.file_name().to_string_lossy().into_owned();
            if matcher.is_match(&file_name) && entry.path().is_file() {
                matches.push(entry.path());
            }
        }
        matches.sort();
        Ok(matches)
    }

    fn is_local(&self) -> bool {
        true
    }
}

/// In-memory file system. Directories exist implicitly once created or written into.
#[derive(Debug, Default)]
pub struct MemoryFileSystem {
    files: RefCell<BTreeMap<PathBuf, Vec<u8>>>,
    dirs: RefCell<Vec<PathBuf>>,
}

impl MemoryFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Paths of every stored file, sorted.
    pub fn paths(&self) -> Vec<PathBuf> {
        self.files.borrow().keys().cloned().collect()
    }
}

impl FileSystem for MemoryFileSystem {
    fn is_dir(&self, path: &Path) -> bool {
        self.dirs.borrow().iter().any(|d| d == path)
            || self.files.borrow().keys().any(|f| f.parent() == Some(path))
    }

    fn mkdir(&self, path: &Path, recursive: bool) -> Result<()> {
        if !recursive {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() && !self.is_dir(parent) {
                    return Err(TransferError::io(
                        path,
                        std::io::Error::new(std::io::ErrorKind::NotFound, "parent directory missing"),
                    ));
                }
            }
        }
        let mut dirs = self.dirs.borrow_mut();
        let mut current = Some(path);
        while let Some(dir) = current {
            if dir.as_os_str().is_empty() {
                break;
            }
            if !dirs.iter().any(|d| d == dir) {
                dirs.push(dir.to_path_buf());
            }
            current = if recursive { dir.parent() } else { None };
        }
        Ok(())
    }

    fn read_file(&self, path: &Path) -> Result<Vec<u8>> {
        self.files.borrow().get(path).cloned().ok_or_else(|| {
            TransferError::io(
                path,
                std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
            )
        })
    }

    fn write_file(&self, path: &Path, contents: &[u8]) -> Result<()> {
        self.files
            .borrow_mut()
            .insert(path.to_path_buf(), contents.to_vec());
        Ok(())
    }

    fn file_exists(&self, path: &Path) -> bool {
        self.files.borrow().contains_key(path)
    }

    fn glob(&self, pattern: &Path) -> Result<Vec<PathBuf>> {
        let (dir, name) = split_pattern(pattern);
        let matcher = wildcard_regex(&name)?;
        Ok(self
            .files
            .borrow()
            .keys()
            .filter(|path| path.parent() == Some(dir.as_path()))
            .filter(|path| {
                path.file_name()
                    .map(|n| matcher.is_match(&n.to_string_lossy()))
                    .unwrap_or(false)
            })
            .cloned()
            .collect())
    }

    fn is_local(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wildcard_regex() {
        let re = wildcard_regex("*.csv").unwrap();
        assert!(re.is_match("users.csv"));
        assert!(!re.is_match("users.csv.bak"));
        assert!(!re.is_match("usersxcsv"));
        let re = wildcard_regex("0?_init.sql").unwrap();
        assert!(re.is_match("01_init.sql"));
    }

    #[test]
    fn test_local_glob_sorted() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.csv"), "x").unwrap();
        std::fs::write(dir.path().join("a.csv"), "x").unwrap();
        std::fs::write(dir.path().join("meta.json"), "{}").unwrap();
        let fs = LocalFileSystem;
        let found = fs.glob(&dir.path().join("*.csv")).unwrap();
        assert_eq!(
            found,
            vec![dir.path().join("a.csv"), dir.path().join("b.csv")]
        );
        assert!(fs.glob(&dir.path().join("missing/*.csv")).unwrap().is_empty());
    }

    #[test]
    fn test_local_write_error_names_path() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("nope").join("out.sql");
        let err = LocalFileSystem.write_file(&target, b"x").unwrap_err();
        assert!(err.to_string().contains("out.sql"));
    }

    #[test]
    fn test_memory_fs_round_trip() {
        let fs = MemoryFileSystem::new();
        fs.mkdir(Path::new("/out"), true).unwrap();
        assert!(fs.is_dir(Path::new("/out")));
        fs.write_file(Path::new("/out/a.csv"), b"id\n1\n").unwrap();
        fs.write_file(Path::new("/out/b.txt"), b"").unwrap();
        assert!(fs.file_exists(Path::new("/out/a.csv")));
        assert_eq!(fs.read_file(Path::new("/out/a.csv")).unwrap(), b"id\n1\n");
        assert_eq!(
            fs.glob(Path::new("/out/*.csv")).unwrap(),
            vec![PathBuf::from("/out/a.csv")]
        );
        assert!(!fs.is_local());
    }

    #[test]
    fn test_memory_fs_non_recursive_mkdir_requires_parent() {
        let fs = MemoryFileSystem::new();
        assert!(fs.mkdir(Path::new("/a/b"), false).is_err());
        fs.mkdir(Path::new("/a/b"), true).unwrap();
        assert!(fs.is_dir(Path::new("/a")));
    }
}
