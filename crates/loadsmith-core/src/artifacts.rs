//! Artifact Store
//!
//! Owns the working area shared by all runs. Each [`RunIdentity`] maps to a
//! file triple sharing one stem:
//!
//! ```text
//! <working_dir>/<stem>.jmx   plan
//! <working_dir>/<stem>.jtl   engine results
//! <working_dir>/<stem>.log   engine log
//! ```
//!
//! Allocation is idempotent per identity for the life of the store and
//! never hands the same stem to two identities. A stem already on disk is
//! reused only when its plan carries the same run marker; anything else gets
//! a numbered suffix.

use crate::error::{Result, StorageError};
use crate::identity::{sanitize_component, RunIdentity};
use crate::template::run_marker;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Component, Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

pub const PLAN_EXTENSION: &str = "jmx";
pub const RESULT_EXTENSION: &str = "jtl";
pub const LOG_EXTENSION: &str = "log";

/// Numbered suffixes tried before falling back to a random token
const MAX_SUFFIX_ATTEMPTS: usize = 64;

/// The files one run owns
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactPaths {
    pub stem: String,
    pub plan: PathBuf,
    pub results: PathBuf,
    pub log: PathBuf,
}

impl ArtifactPaths {
    fn new(root: &Path, stem: String) -> Self {
        Self {
            plan: root.join(format!("{stem}.{PLAN_EXTENSION}")),
            results: root.join(format!("{stem}.{RESULT_EXTENSION}")),
            log: root.join(format!("{stem}.{LOG_EXTENSION}")),
            stem,
        }
    }
}

#[derive(Default)]
struct Allocations {
    by_identity: HashMap<RunIdentity, ArtifactPaths>,
    claimed: HashSet<String>,
}

pub struct ArtifactStore {
    root: PathBuf,
    allocations: Mutex<Allocations>,
}

impl ArtifactStore {
    /// Create a store over `root`. Nothing touches the disk until first use.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            allocations: Mutex::new(Allocations::default()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map `identity` to its file triple, creating the working area if needed
    pub async fn allocate(&self, identity: &RunIdentity) -> Result<ArtifactPaths> {
        let mut allocations = self.allocations.lock().await;
        if let Some(paths) = allocations.by_identity.get(identity) {
            return Ok(paths.clone());
        }

        let base = sanitize_component(identity.as_str());
        if base.is_empty() {
            return Err(StorageError::InvalidName(identity.to_string()));
        }

        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| StorageError::io(&self.root, e))?;

        let marker = run_marker(identity);
        let mut chosen = None;
        for attempt in 0..MAX_SUFFIX_ATTEMPTS {
            let stem = if attempt == 0 {
                base.clone()
            } else {
                format!("{base}-{attempt}")
            };
            if allocations.claimed.contains(&stem) {
                continue;
            }
            let candidate = ArtifactPaths::new(&self.root, stem);
            if self.is_free_for(&candidate, &marker).await? {
                chosen = Some(candidate);
                break;
            }
            debug!(
                run_id = %identity,
                stem = %candidate.stem,
                "Artifact stem occupied by another run"
            );
        }

        let paths = match chosen {
            Some(paths) => paths,
            None => {
                let token = uuid::Uuid::new_v4().simple().to_string();
                warn!(run_id = %identity, "Numbered stems exhausted, using random suffix");
                ArtifactPaths::new(&self.root, format!("{base}-{token}"))
            }
        };

        allocations.claimed.insert(paths.stem.clone());
        allocations.by_identity.insert(identity.clone(), paths.clone());
        debug!(run_id = %identity, stem = %paths.stem, "Allocated artifacts");
        Ok(paths)
    }

    /// A stem is free when nothing is on disk for it, or its plan was
    /// rendered for the same run.
    async fn is_free_for(&self, candidate: &ArtifactPaths, marker: &str) -> Result<bool> {
        match tokio::fs::read_to_string(&candidate.plan).await {
            Ok(existing) => Ok(existing.contains(marker)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                for orphan in [&candidate.results, &candidate.log] {
                    if self.exists(orphan).await? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            // Unreadable or non-UTF-8 plan: not ours
            Err(e) if e.kind() == std::io::ErrorKind::InvalidData => Ok(false),
            Err(e) => Err(StorageError::io(&candidate.plan, e)),
        }
    }

    /// Atomically replace `path` with `bytes` and flush it to disk
    pub async fn write(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        self.ensure_within(path)?;
        let parent = path.parent().unwrap_or(self.root.as_path());
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| StorageError::io(parent, e))?;

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| StorageError::InvalidName(path.display().to_string()))?;
        let tmp = parent.join(format!(
            ".{file_name}.{}.tmp",
            uuid::Uuid::new_v4().simple()
        ));

        let written = async {
            let mut file = tokio::fs::File::create(&tmp).await?;
            file.write_all(bytes).await?;
            file.sync_all().await?;
            drop(file);
            tokio::fs::rename(&tmp, path).await
        }
        .await;

        if let Err(e) = written {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(StorageError::io(path, e));
        }
        Ok(())
    }

    pub async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        self.ensure_within(path)?;
        tokio::fs::read(path)
            .await
            .map_err(|e| StorageError::io(path, e))
    }

    /// Open `path` for streaming reads. `Ok(None)` when it does not exist.
    pub async fn open(&self, path: &Path) -> Result<Option<std::fs::File>> {
        self.ensure_within(path)?;
        match tokio::fs::File::open(path).await {
            Ok(file) => Ok(Some(file.into_std().await)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::io(path, e)),
        }
    }

    pub async fn exists(&self, path: &Path) -> Result<bool> {
        self.ensure_within(path)?;
        tokio::fs::try_exists(path)
            .await
            .map_err(|e| StorageError::io(path, e))
    }

    /// Remove `path` if present
    pub async fn clear(&self, path: &Path) -> Result<()> {
        self.ensure_within(path)?;
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::io(path, e)),
        }
    }

    /// Drop leftovers of any earlier execution so they cannot be mistaken
    /// for this one's output
    pub async fn clear_outputs(&self, paths: &ArtifactPaths) -> Result<()> {
        self.clear(&paths.results).await?;
        self.clear(&paths.log).await
    }

    /// Only the part below the root is checked; the root itself may be
    /// relative, e.g. `./runs` or `../shared/runs`.
    fn ensure_within(&self, path: &Path) -> Result<()> {
        let inside = path.strip_prefix(&self.root).is_ok_and(|rest| {
            let mut components = rest.components().peekable();
            components.peek().is_some() && components.all(|c| matches!(c, Component::Normal(_)))
        });
        if !inside {
            return Err(StorageError::OutsideWorkingArea(path.to_path_buf()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn id(token: &str) -> RunIdentity {
        RunIdentity::from_token(token).unwrap()
    }

    #[tokio::test]
    async fn allocate_shares_stem_across_extensions() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path());

        let paths = store.allocate(&id("example.com-1")).await.unwrap();
        assert_eq!(paths.plan, dir.path().join("example.com-1.jmx"));
        assert_eq!(paths.results, dir.path().join("example.com-1.jtl"));
        assert_eq!(paths.log, dir.path().join("example.com-1.log"));
    }

    #[tokio::test]
    async fn allocate_is_idempotent_per_identity() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path());

        let first = store.allocate(&id("run-a")).await.unwrap();
        store.write(&first.plan, b"<plan/>").await.unwrap();
        let second = store.allocate(&id("run-a")).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn distinct_identities_never_share_a_stem() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path());

        // Both sanitize to "a_b"
        let a = store.allocate(&id("a b")).await.unwrap();
        let b = store.allocate(&id("a/b")).await.unwrap();
        assert_ne!(a.stem, b.stem);
        assert_eq!(b.stem, "a_b-1");
    }

    #[tokio::test]
    async fn foreign_plan_on_disk_forces_suffix() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("nightly.jmx"),
            "<stringProp name=\"TestPlan.comments\">loadsmith-run:someone-else</stringProp>",
        )
        .unwrap();

        let store = ArtifactStore::new(dir.path());
        let paths = store.allocate(&id("nightly")).await.unwrap();
        assert_eq!(paths.stem, "nightly-1");
    }

    #[tokio::test]
    async fn matching_plan_on_disk_is_reused() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("nightly.jmx"),
            format!("<x>{}</x>", run_marker(&id("nightly"))),
        )
        .unwrap();

        let store = ArtifactStore::new(dir.path());
        let paths = store.allocate(&id("nightly")).await.unwrap();
        assert_eq!(paths.stem, "nightly");
    }

    #[tokio::test]
    async fn orphan_result_file_counts_as_occupied() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("orphan.jtl"), "elapsed,success\n").unwrap();

        let store = ArtifactStore::new(dir.path());
        let paths = store.allocate(&id("orphan")).await.unwrap();
        assert_eq!(paths.stem, "orphan-1");
    }

    #[tokio::test]
    async fn write_read_clear_cycle() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path());
        let paths = store.allocate(&id("cycle")).await.unwrap();

        store.write(&paths.results, b"old data").await.unwrap();
        assert!(store.exists(&paths.results).await.unwrap());
        assert_eq!(store.read(&paths.results).await.unwrap(), b"old data");

        store.clear_outputs(&paths).await.unwrap();
        assert!(!store.exists(&paths.results).await.unwrap());
        // clearing twice is fine
        store.clear(&paths.results).await.unwrap();
    }

    #[tokio::test]
    async fn write_leaves_no_temp_files() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path());
        let paths = store.allocate(&id("tidy")).await.unwrap();
        store.write(&paths.plan, b"<plan/>").await.unwrap();

        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["tidy.jmx".to_string()]);
    }

    #[tokio::test]
    async fn paths_outside_working_area_are_refused() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path().join("runs"));

        let escape = dir.path().join("runs").join("..").join("evil.jmx");
        assert!(matches!(
            store.write(&escape, b"x").await,
            Err(StorageError::OutsideWorkingArea(_))
        ));
        assert!(matches!(
            store.read(Path::new("/etc/passwd")).await,
            Err(StorageError::OutsideWorkingArea(_))
        ));
    }

    #[test]
    fn relative_roots_accept_their_own_files() {
        for root in ["./runs", "../x/runs", "runs"] {
            let store = ArtifactStore::new(root);
            let paths = ArtifactPaths::new(Path::new(root), "relative".into());
            for path in [&paths.plan, &paths.results, &paths.log] {
                assert!(store.ensure_within(path).is_ok(), "{root}: {}", path.display());
            }

            let root = Path::new(root);
            assert!(store.ensure_within(root).is_err());
            assert!(store.ensure_within(&root.join("..").join("a.jmx")).is_err());
            assert!(store.ensure_within(&root.join("sub/../../a.jmx")).is_err());
        }
        let store = ArtifactStore::new("../x/runs");
        assert!(store.ensure_within(Path::new("../x/other/a.jmx")).is_err());
    }

    #[tokio::test]
    async fn traversal_identity_stays_inside() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path());
        let paths = store.allocate(&id("../../etc/passwd")).await.unwrap();
        assert_eq!(paths.plan.parent(), Some(dir.path()));
    }

    #[tokio::test]
    async fn open_missing_file_is_none() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path());
        let paths = store.allocate(&id("absent")).await.unwrap();
        assert!(store.open(&paths.results).await.unwrap().is_none());
    }
}
