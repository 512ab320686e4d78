//! Path confinement to a project root.
//!
//! Resolution never requires the target to exist. The longest existing prefix
//! is canonicalized with symlinks followed, and the missing tail is appended
//! lexically. A dangling symlink is followed to its target, so writing a new
//! file through a link that points outside the root is rejected as well.

use crate::error::{SandboxError, SandboxResult};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};

/// Symlink chains longer than this are treated as loops.
const MAX_LINK_DEPTH: usize = 40;

/// An absolute path that is known to lie inside its project root.
///
/// Only [`SandboxResolver`] constructs these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxedPath {
    path: PathBuf,
    root: PathBuf,
}

impl SandboxedPath {
    pub fn as_path(&self) -> &Path {
        &self.path
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path relative to the root. The root itself is `.`.
    pub fn relative(&self) -> PathBuf {
        match self.path.strip_prefix(&self.root) {
            Ok(rel) if rel.as_os_str().is_empty() => PathBuf::from("."),
            Ok(rel) => rel.to_path_buf(),
            Err(_) => self.path.clone(),
        }
    }

    pub fn is_root(&self) -> bool {
        self.path == self.root
    }

    pub fn into_path_buf(self) -> PathBuf {
        self.path
    }
}

impl AsRef<Path> for SandboxedPath {
    fn as_ref(&self) -> &Path {
        &self.path
    }
}

impl fmt::Display for SandboxedPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path.display())
    }
}

/// Resolves user supplied paths against a fixed project root.
#[derive(Debug, Clone)]
pub struct SandboxResolver {
    root: PathBuf,
}

impl SandboxResolver {
    /// Create a resolver. The root is canonicalized once here and does not
    /// need to exist.
    pub fn new(root: impl AsRef<Path>) -> SandboxResult<Self> {
        let root = root.as_ref();
        let absolute = if root.is_absolute() {
            root.to_path_buf()
        } else {
            std::env::current_dir()?.join(root)
        };

        let canonical = canonicalize_lenient(&absolute, 0)
            .map_err(|e| SandboxError::invalid_root(root, e.to_string()))?;

        if canonical.exists() && !canonical.is_dir() {
            return Err(SandboxError::invalid_root(root, "not a directory"));
        }

        Ok(Self { root: canonical })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve `path` (relative to the root, or absolute) into a
    /// [`SandboxedPath`], or fail with [`SandboxError::Violation`].
    pub fn resolve(&self, path: impl AsRef<Path>) -> SandboxResult<SandboxedPath> {
        let requested = path.as_ref();
        let joined = if requested.is_absolute() {
            requested.to_path_buf()
        } else {
            self.root.join(requested)
        };

        let resolved = match canonicalize_lenient(&joined, 0) {
            Ok(p) => p,
            Err(e) => {
                warn!(path = %requested.display(), error = %e, "Path could not be resolved");
                return Err(SandboxError::violation(requested, &self.root));
            }
        };

        if !resolved.starts_with(&self.root) {
            warn!(
                path = %requested.display(),
                resolved = %resolved.display(),
                root = %self.root.display(),
                "Sandbox violation"
            );
            return Err(SandboxError::violation(requested, &self.root));
        }

        debug!(path = %requested.display(), resolved = %resolved.display(), "Resolved path");
        Ok(SandboxedPath {
            path: resolved,
            root: self.root.clone(),
        })
    }

    /// Whether `path` resolves inside the root.
    pub fn contains(&self, path: impl AsRef<Path>) -> bool {
        self.resolve(path).is_ok()
    }
}

/// Resolve `path` against `root` in one call.
pub fn resolve(root: impl AsRef<Path>, path: impl AsRef<Path>) -> SandboxResult<SandboxedPath> {
    SandboxResolver::new(root)?.resolve(path)
}

/// Canonicalize an absolute path without requiring it to exist.
fn canonicalize_lenient(path: &Path, depth: usize) -> io::Result<PathBuf> {
    if depth > MAX_LINK_DEPTH {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "too many levels of symbolic links",
        ));
    }

    let mut current = PathBuf::new();
    // While true, `current` is a canonical path that exists on disk.
    let mut on_disk = true;

    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => current.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                current.pop();
                if !on_disk {
                    on_disk = fs::symlink_metadata(&current).is_ok();
                }
            }
            Component::Normal(name) => {
                current.push(name);
                if !on_disk {
                    continue;
                }
                match fs::symlink_metadata(&current) {
                    Ok(meta) if meta.file_type().is_symlink() => {
                        let target = fs::read_link(&current)?;
                        let base = current.parent().map(Path::to_path_buf).unwrap_or_default();
                        current = canonicalize_lenient(&base.join(target), depth + 1)?;
                        on_disk = fs::symlink_metadata(&current).is_ok();
                    }
                    Ok(_) => {}
                    Err(_) => on_disk = false,
                }
            }
        }
    }

    Ok(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, SandboxResolver) {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("src/nested")).unwrap();
        fs::write(dir.path().join("src/main.rs"), "fn main() {}").unwrap();
        let resolver = SandboxResolver::new(dir.path()).unwrap();
        (dir, resolver)
    }

    #[test]
    fn test_resolves_existing_file() {
        let (_dir, resolver) = setup();
        let path = resolver.resolve("src/main.rs").unwrap();
        assert!(path.as_path().is_absolute());
        assert_eq!(path.relative(), PathBuf::from("src/main.rs"));
        assert!(path.as_path().exists());
    }

    #[test]
    fn test_resolves_missing_file_for_writes() {
        let (_dir, resolver) = setup();
        let path = resolver.resolve("src/new/deeper/file.txt").unwrap();
        assert_eq!(path.relative(), PathBuf::from("src/new/deeper/file.txt"));
        assert!(!path.as_path().exists());
    }

    #[test]
    fn test_root_itself_is_allowed() {
        let (_dir, resolver) = setup();
        let path = resolver.resolve(".").unwrap();
        assert!(path.is_root());
        assert_eq!(path.relative(), PathBuf::from("."));
        assert!(resolver.resolve("src/..").unwrap().is_root());
    }

    #[test]
    fn test_dotdot_inside_root_is_fine() {
        let (_dir, resolver) = setup();
        let path = resolver.resolve("src/nested/../main.rs").unwrap();
        assert_eq!(path.relative(), PathBuf::from("src/main.rs"));
    }

    #[test]
    fn test_traversal_is_violation() {
        let (_dir, resolver) = setup();
        let err = resolver.resolve("../../etc/passwd").unwrap_err();
        assert!(err.is_violation());
        assert!(err.to_string().contains("sandbox"));
        assert!(err.to_string().contains("../../etc/passwd"));
    }

    #[test]
    fn test_traversal_through_missing_dirs_is_violation() {
        let (_dir, resolver) = setup();
        assert!(resolver.resolve("nope/../../outside.txt").is_err());
        assert!(resolver.resolve("a/b/../../../x").is_err());
    }

    #[test]
    fn test_absolute_outside_is_violation() {
        let (_dir, resolver) = setup();
        assert!(resolver.resolve("/etc/passwd").unwrap_err().is_violation());
    }

    #[test]
    fn test_absolute_inside_is_allowed() {
        let (dir, resolver) = setup();
        let inside = dir.path().join("src/main.rs");
        assert!(resolver.resolve(&inside).is_ok());
    }

    #[test]
    fn test_sibling_with_common_prefix_is_violation() {
        let parent = TempDir::new().unwrap();
        let root = parent.path().join("proj");
        let sibling = parent.path().join("proj-secrets");
        fs::create_dir_all(&root).unwrap();
        fs::create_dir_all(&sibling).unwrap();

        let resolver = SandboxResolver::new(&root).unwrap();
        assert!(resolver.resolve(sibling.join("key")).is_err());
        assert!(resolver.resolve("../proj-secrets/key").is_err());
    }

    #[test]
    fn test_nonexistent_root() {
        let resolver = SandboxResolver::new("/home/project-that-does-not-exist").unwrap();
        let err = resolver.resolve("../../../../etc/passwd").unwrap_err();
        assert!(err.to_string().contains("sandbox"));
        assert!(resolver.resolve("src/lib.rs").is_ok());
    }

    #[test]
    fn test_free_function() {
        let (dir, _resolver) = setup();
        assert!(resolve(dir.path(), "src").is_ok());
        assert!(resolve(dir.path(), "..").is_err());
    }

    #[test]
    fn test_root_must_be_directory() {
        let (dir, _resolver) = setup();
        let err = SandboxResolver::new(dir.path().join("src/main.rs")).unwrap_err();
        assert!(matches!(err, SandboxError::InvalidRoot { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_out_of_root_is_violation() {
        let (dir, resolver) = setup();
        let outside = TempDir::new().unwrap();
        fs::write(outside.path().join("secret"), "s3cret").unwrap();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("escape")).unwrap();

        assert!(resolver.resolve("escape/secret").unwrap_err().is_violation());
        assert!(resolver.resolve("escape/new-file").is_err());
        assert!(!resolver.contains("escape"));
    }

    #[cfg(unix)]
    #[test]
    fn test_dangling_symlink_out_of_root_is_violation() {
        let (dir, resolver) = setup();
        std::os::unix::fs::symlink("/nonexistent-target-dir/file", dir.path().join("dangling"))
            .unwrap();
        assert!(resolver.resolve("dangling").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_inside_root_is_allowed() {
        let (dir, resolver) = setup();
        std::os::unix::fs::symlink(dir.path().join("src"), dir.path().join("alias")).unwrap();
        let path = resolver.resolve("alias/main.rs").unwrap();
        assert_eq!(path.relative(), PathBuf::from("src/main.rs"));
    }

    #[cfg(unix)]
    #[test]
    fn test_dotdot_after_missing_dir_rechecks_symlinks() {
        let (dir, resolver) = setup();
        let outside = TempDir::new().unwrap();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("link")).unwrap();
        assert!(resolver.resolve("missing/../link/file").is_err());
    }
}
