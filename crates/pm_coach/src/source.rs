//! Repo sources - where a target checkout comes from
//!
//! Acquiring repositories (cloning, URL parsing) is not the harness's job.
//! A [`RepoSource`] only has to describe itself and, for every mode this
//! crate implements, expose a checkout on disk through
//! [`RepoSource::local_path`].
//!
//! Two local sources are provided:
//! - [`LocalRepoSource`] runs the engines directly inside an existing directory.
//! - [`SnapshotRepoSource`] copies the directory into a private temporary tree
//!   first, so artifact generation never writes into the user's checkout.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tempfile::TempDir;
use tracing::debug;
use walkdir::{DirEntry, WalkDir};

use crate::error::{CoachError, Result};

/// Directories never counted or copied.
const SKIPPED_DIRS: &[&str] = &[".git"];

/// Descriptive metadata for one target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoMetadata {
    pub name: String,
    #[serde(default)]
    pub origin_url: Option<String>,
    #[serde(default)]
    pub file_count: usize,
    #[serde(default)]
    pub clone_time_ms: u64,
}

impl RepoMetadata {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            origin_url: None,
            file_count: 0,
            clone_time_ms: 0,
        }
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin_url = Some(origin.into());
        self
    }
}

/// A checkout the engines can be pointed at.
pub trait RepoSource: Send + Sync {
    /// Name, origin and size of the target.
    fn metadata(&self) -> RepoMetadata;

    /// Directory holding the checkout, if this source has one.
    fn local_path(&self) -> Option<&Path>;

    /// Like [`RepoSource::local_path`], but absence is a configuration error.
    fn require_path(&self) -> Result<&Path> {
        self.local_path()
            .ok_or_else(|| CoachError::MissingLocalPath {
                name: self.metadata().name,
            })
    }
}

/// An existing directory used in place.
#[derive(Debug, Clone)]
pub struct LocalRepoSource {
    path: PathBuf,
    metadata: RepoMetadata,
}

impl LocalRepoSource {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path
            .as_ref()
            .canonicalize()
            .map_err(|e| CoachError::io(path.as_ref(), e))?;
        if !path.is_dir() {
            return Err(CoachError::InvalidTarget {
                target: path.display().to_string(),
                reason: "not a directory".to_string(),
            });
        }
        let metadata = RepoMetadata {
            name: dir_name(&path),
            origin_url: Some(format!("file://{}", path.display())),
            file_count: count_files(&path)?,
            clone_time_ms: 0,
        };
        Ok(Self { path, metadata })
    }
}

impl RepoSource for LocalRepoSource {
    fn metadata(&self) -> RepoMetadata {
        self.metadata.clone()
    }

    fn local_path(&self) -> Option<&Path> {
        Some(&self.path)
    }
}

/// A private copy of a local directory, removed when dropped.
#[derive(Debug)]
pub struct SnapshotRepoSource {
    dir: TempDir,
    checkout: PathBuf,
    metadata: RepoMetadata,
}

impl SnapshotRepoSource {
    pub fn copy_from(path: impl AsRef<Path>) -> Result<Self> {
        let original = LocalRepoSource::open(path)?;
        let started = Instant::now();

        let dir = tempfile::Builder::new()
            .prefix("pm_coach_snapshot_")
            .tempdir()
            .map_err(|e| CoachError::io(std::env::temp_dir(), e))?;
        // Keep the directory name so engines that print it agree with the original.
        let checkout = dir.path().join(&original.metadata.name);
        copy_tree(&original.path, &checkout)?;

        let mut metadata = original.metadata;
        metadata.clone_time_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        debug!(
            target = %metadata.name,
            snapshot = %checkout.display(),
            copy_ms = metadata.clone_time_ms,
            "Snapshot created"
        );
        Ok(Self {
            dir,
            checkout,
            metadata,
        })
    }

    /// Root of the temporary tree (parent of the checkout).
    pub fn snapshot_root(&self) -> &Path {
        self.dir.path()
    }
}

impl RepoSource for SnapshotRepoSource {
    fn metadata(&self) -> RepoMetadata {
        self.metadata.clone()
    }

    fn local_path(&self) -> Option<&Path> {
        Some(&self.checkout)
    }
}

/// Open a target as either a local or a snapshot source.
pub fn open_source(path: &Path, snapshot: bool) -> Result<Box<dyn RepoSource>> {
    if snapshot {
        Ok(Box::new(SnapshotRepoSource::copy_from(path)?))
    } else {
        Ok(Box::new(LocalRepoSource::open(path)?))
    }
}

/// Resolve the CLI target into a list of directories.
///
/// The target is either a directory or a text file naming one directory per
/// line. Blank lines and `#` comments are skipped; relative entries are
/// resolved against the list file's directory.
pub fn load_targets(target: &str) -> Result<Vec<PathBuf>> {
    if is_remote(target) {
        return Err(remote_target(target));
    }

    let path = Path::new(target);
    if path.is_dir() {
        return Ok(vec![path.to_path_buf()]);
    }
    if !path.is_file() {
        return Err(CoachError::InvalidTarget {
            target: target.to_string(),
            reason: "not a directory or a target list file".to_string(),
        });
    }

    let content = fs::read_to_string(path).map_err(|e| CoachError::io(path, e))?;
    let base = path.parent().unwrap_or_else(|| Path::new("."));
    let mut targets = Vec::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if is_remote(line) {
            return Err(remote_target(line));
        }
        let entry = Path::new(line);
        if entry.is_absolute() {
            targets.push(entry.to_path_buf());
        } else {
            targets.push(base.join(entry));
        }
    }

    if targets.is_empty() {
        return Err(CoachError::InvalidTarget {
            target: target.to_string(),
            reason: "target list is empty".to_string(),
        });
    }
    Ok(targets)
}

fn is_remote(target: &str) -> bool {
    ["http://", "https://", "git@", "ssh://"]
        .iter()
        .any(|prefix| target.starts_with(prefix))
}

fn remote_target(target: &str) -> CoachError {
    CoachError::InvalidTarget {
        target: target.to_string(),
        reason: "remote repositories must be checked out locally first".to_string(),
    }
}

fn dir_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Walk `root`, pruning [`SKIPPED_DIRS`] below the root itself.
fn walk(root: &Path) -> impl Iterator<Item = walkdir::Result<DirEntry>> {
    WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| {
            entry.depth() == 0
                || !(entry.file_type().is_dir()
                    && SKIPPED_DIRS.iter().any(|skip| entry.file_name() == *skip))
        })
}

fn walk_error(root: &Path, err: walkdir::Error) -> CoachError {
    let path = err.path().unwrap_or(root).to_path_buf();
    let source = err
        .into_io_error()
        .unwrap_or_else(|| io::Error::other("filesystem loop detected"));
    CoachError::io(path, source)
}

fn count_files(dir: &Path) -> Result<usize> {
    let mut count = 0;
    for entry in walk(dir) {
        if entry.map_err(|e| walk_error(dir, e))?.file_type().is_file() {
            count += 1;
        }
    }
    Ok(count)
}

fn copy_tree(from: &Path, to: &Path) -> Result<()> {
    for entry in walk(from) {
        let entry = entry.map_err(|e| walk_error(from, e))?;
        let source = entry.path();
        let rel = source.strip_prefix(from).unwrap_or(source);
        let dest = to.join(rel);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            fs::create_dir_all(&dest).map_err(|e| CoachError::io(&dest, e))?;
        } else if file_type.is_symlink() {
            copy_symlink(source, &dest)?;
        } else {
            fs::copy(source, &dest).map_err(|e| CoachError::io(source, e))?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn copy_symlink(source: &Path, dest: &Path) -> Result<()> {
    let link = fs::read_link(source).map_err(|e| CoachError::io(source, e))?;
    std::os::unix::fs::symlink(&link, dest).map_err(|e| CoachError::io(dest, e))
}

#[cfg(not(unix))]
fn copy_symlink(source: &Path, _dest: &Path) -> Result<()> {
    debug!(path = %source.display(), "Skipping symlink in snapshot");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_repo() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("main.py"), "print(1)\n").unwrap();
        fs::create_dir_all(dir.path().join("pkg")).unwrap();
        fs::write(dir.path().join("pkg/util.py"), "x = 1\n").unwrap();
        fs::create_dir_all(dir.path().join(".git")).unwrap();
        fs::write(dir.path().join(".git/HEAD"), "ref: main\n").unwrap();
        dir
    }

    #[test]
    fn local_source_counts_files_outside_git() {
        let repo = sample_repo();
        let source = LocalRepoSource::open(repo.path()).unwrap();
        let meta = source.metadata();
        assert_eq!(meta.file_count, 2);
        assert!(meta.origin_url.unwrap().starts_with("file://"));
        assert_eq!(
            source.require_path().unwrap(),
            repo.path().canonicalize().unwrap()
        );
    }

    #[test]
    fn local_source_rejects_files() {
        let repo = sample_repo();
        let err = LocalRepoSource::open(repo.path().join("main.py")).unwrap_err();
        assert!(matches!(err, CoachError::InvalidTarget { .. }));
    }

    #[test]
    fn snapshot_copies_tree_and_cleans_up() {
        let repo = sample_repo();
        let snapshot = SnapshotRepoSource::copy_from(repo.path()).unwrap();
        let checkout = snapshot.local_path().unwrap().to_path_buf();
        let root = snapshot.snapshot_root().to_path_buf();

        assert_eq!(
            fs::read_to_string(checkout.join("pkg/util.py")).unwrap(),
            "x = 1\n"
        );
        assert!(!checkout.join(".git").exists());
        assert_eq!(snapshot.metadata().file_count, 2);
        assert_eq!(
            checkout.file_name(),
            repo.path().canonicalize().unwrap().file_name()
        );

        drop(snapshot);
        assert!(!root.exists());
    }

    #[test]
    fn nested_git_dirs_are_pruned_but_similar_names_are_kept() {
        let repo = sample_repo();
        fs::create_dir_all(repo.path().join("vendor/lib/.git")).unwrap();
        fs::write(repo.path().join("vendor/lib/.git/config"), "").unwrap();
        fs::write(repo.path().join("vendor/lib/mod.py"), "").unwrap();
        fs::write(repo.path().join(".gitignore"), "*.pyc\n").unwrap();

        assert_eq!(count_files(repo.path()).unwrap(), 4);

        let snapshot = SnapshotRepoSource::copy_from(repo.path()).unwrap();
        let checkout = snapshot.local_path().unwrap();
        assert!(checkout.join("vendor/lib/mod.py").is_file());
        assert!(checkout.join(".gitignore").is_file());
        assert!(!checkout.join("vendor/lib/.git").exists());
        assert_eq!(snapshot.metadata().file_count, 4);
    }

    #[cfg(unix)]
    #[test]
    fn snapshot_recreates_symlinks_without_following_them() {
        let repo = sample_repo();
        std::os::unix::fs::symlink("pkg", repo.path().join("alias")).unwrap();

        let snapshot = SnapshotRepoSource::copy_from(repo.path()).unwrap();
        let alias = snapshot.local_path().unwrap().join("alias");
        assert!(fs::symlink_metadata(&alias).unwrap().file_type().is_symlink());
        assert_eq!(fs::read_link(&alias).unwrap(), PathBuf::from("pkg"));
        // The link is not counted as a file.
        assert_eq!(snapshot.metadata().file_count, 2);
    }

    struct Pathless;

    impl RepoSource for Pathless {
        fn metadata(&self) -> RepoMetadata {
            RepoMetadata::new("streamed")
        }

        fn local_path(&self) -> Option<&Path> {
            None
        }
    }

    #[test]
    fn missing_path_is_configuration_error() {
        let err = Pathless.require_path().unwrap_err();
        assert!(matches!(err, CoachError::MissingLocalPath { ref name } if name == "streamed"));
    }

    #[test]
    fn load_targets_accepts_directory() {
        let repo = sample_repo();
        let targets = load_targets(repo.path().to_str().unwrap()).unwrap();
        assert_eq!(targets, vec![repo.path().to_path_buf()]);
    }

    #[test]
    fn load_targets_reads_list_file() {
        let dir = TempDir::new().unwrap();
        let list = dir.path().join("targets.txt");
        fs::write(&list, "# corpus\n\nrepo_a\n  /abs/repo_b  \n").unwrap();

        let targets = load_targets(list.to_str().unwrap()).unwrap();
        assert_eq!(
            targets,
            vec![dir.path().join("repo_a"), PathBuf::from("/abs/repo_b")]
        );
    }

    #[test]
    fn load_targets_rejects_urls() {
        let err = load_targets("https://github.com/psf/requests").unwrap_err();
        assert!(err.to_string().contains("checked out locally"));

        let dir = TempDir::new().unwrap();
        let list = dir.path().join("targets.txt");
        fs::write(&list, "git@github.com:psf/requests.git\n").unwrap();
        assert!(load_targets(list.to_str().unwrap()).is_err());
    }

    #[test]
    fn load_targets_rejects_empty_list_and_missing_paths() {
        let dir = TempDir::new().unwrap();
        let list = dir.path().join("targets.txt");
        fs::write(&list, "# nothing here\n").unwrap();
        assert!(load_targets(list.to_str().unwrap()).is_err());
        assert!(load_targets("/no/such/target/anywhere").is_err());
    }
}
