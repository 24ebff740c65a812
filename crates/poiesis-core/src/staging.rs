//! Path math for the shared per-task volume.
//!
//! Filer containers mount the task PVC at the staging root (`/transfer`),
//! so the semantic path `/data/f1/file` materializes at
//! `/transfer/data/f1/file`. Executor containers mount slices of the same
//! claim via `subPath` so every declared path is visible at its semantic
//! absolute location.

use std::path::{Path, PathBuf};

use poiesis_models::tes::{TesFileType, TesTask};

/// Path filer containers mount the task PVC at.
pub const STAGING_ROOT: &str = "/transfer";

/// Where a semantic path materializes under the staging root.
///
/// `container_path("/data/f1/file", "/transfer")` is
/// `/transfer/data/f1/file`: when the claim is later mounted at `/` the
/// file is visible at its semantic path.
pub fn container_path(semantic_path: &str, staging_root: &Path) -> PathBuf {
    staging_root.join(semantic_path.trim_start_matches('/'))
}

/// Glob metacharacters that mark a wildcard output path.
pub fn has_glob(path: &str) -> bool {
    path.contains(['*', '?', '[', ']', '{', '}'])
}

/// The directory a glob pattern is rooted in.
///
/// For `/work/results/SRR*.fna` this is `/work/results/` (everything up
/// to and including the last `/` before the first metacharacter). For a
/// plain path it is the parent directory, without a trailing slash.
pub fn infer_base_path(path: &str) -> String {
    match path.find(['*', '?', '[', ']', '{', '}']) {
        Some(glob_start) => match path[..glob_start].rfind('/') {
            Some(last_slash) => path[..=last_slash].to_owned(),
            None => String::new(),
        },
        None => Path::new(path)
            .parent()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default(),
    }
}

/// A `subPath`-based mount of the task claim into the executor pod.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountPoint {
    /// Absolute path inside the executor container.
    pub mount_path: String,
    /// Path within the claim, relative to its root.
    pub sub_path: String,
}

impl MountPoint {
    fn for_dir(dir: &str) -> Self {
        let mount_path = normalize(dir);
        let sub_path = mount_path.trim_start_matches('/').to_owned();
        Self {
            mount_path,
            sub_path,
        }
    }
}

/// Minimal covering set of claim mounts for a task's executors.
///
/// Candidates, in priority order: declared scratch `volumes`, output
/// parent directories, then input paths not already covered. Directories
/// are mounted as such; files contribute their parent directory (or, for
/// a file directly under `/`, the file path itself, since the root
/// cannot be a mount point). A shallower candidate absorbs any deeper
/// one it contains.
pub fn executor_mounts(task: &TesTask) -> Vec<MountPoint> {
    let mut candidates: Vec<String> = Vec::new();

    for volume in task.volumes() {
        candidates.push(normalize(volume));
    }

    for output in task.outputs() {
        let dir = if has_glob(&output.path) {
            infer_base_path(&output.path)
        } else {
            match output.r#type {
                TesFileType::Directory => output.path.clone(),
                TesFileType::File => dir_or_self(&output.path),
            }
        };
        candidates.push(normalize(&dir));
    }

    for input in task.inputs() {
        let dir = match input.r#type {
            TesFileType::Directory => input.path.clone(),
            TesFileType::File => dir_or_self(&input.path),
        };
        candidates.push(normalize(&dir));
    }

    // Shallowest-first so that a containing directory is selected before
    // anything beneath it.
    let mut ordered: Vec<String> = candidates.into_iter().filter(|c| c != "/").collect();
    ordered.sort_by_key(|c| c.matches('/').count());

    let mut selected: Vec<MountPoint> = Vec::new();
    for candidate in ordered {
        if !selected.iter().any(|m| covers(&m.mount_path, &candidate)) {
            selected.push(MountPoint::for_dir(&candidate));
        }
    }
    selected
}

/// Parent directory of a file path, or the path itself when the parent
/// is the filesystem root.
fn dir_or_self(path: &str) -> String {
    match Path::new(path).parent() {
        Some(parent) if parent != Path::new("/") => parent.to_string_lossy().into_owned(),
        _ => path.to_owned(),
    }
}

fn normalize(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_owned()
    } else {
        trimmed.to_owned()
    }
}

/// Whether `base` is `candidate` or a path-component ancestor of it.
fn covers(base: &str, candidate: &str) -> bool {
    candidate == base
        || candidate
            .strip_prefix(base)
            .is_some_and(|rest| rest.starts_with('/'))
}
