//! Isolated per-scenario copies of the provisioning configuration.
//!
//! Every scenario gets its own temporary copy of the whole configuration
//! tree, so tool state files written by one run are never visible to
//! another. The copy is removed when the [`Workspace`] is dropped.
//!
//! Workspaces may not be created inside the tree they copy, and symlinked
//! directories that lead back to one of their own ancestors are skipped.

use std::collections::HashSet;
use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tempfile::TempDir;
use tracing::debug;
use uuid::Uuid;

use crate::error::{FleetError, Result};

/// Directory names never copied into a workspace.
const SKIPPED_DIRS: &[&str] = &[".terraform", ".git"];

/// Whether a file holds provisioning state that belongs to another run.
fn is_state_file(name: &str) -> bool {
    name.contains(".tfstate")
}

/// Creates workspaces from a fixed source tree.
#[derive(Debug, Clone)]
pub struct WorkspaceIsolator {
    source_root: PathBuf,
    module_dir: PathBuf,
    temp_root: Option<PathBuf>,
}

impl WorkspaceIsolator {
    /// `module_dir` is relative to `source_root` and is where the
    /// provisioning tool is run inside each copy.
    pub fn new(source_root: impl Into<PathBuf>, module_dir: impl Into<PathBuf>) -> Self {
        Self {
            source_root: source_root.into(),
            module_dir: module_dir.into(),
            temp_root: None,
        }
    }

    /// Same source tree and temp root, provisioning from `module_dir`.
    pub fn for_module(&self, module_dir: impl Into<PathBuf>) -> Self {
        Self {
            module_dir: module_dir.into(),
            ..self.clone()
        }
    }

    /// Create workspaces under `dir` instead of the system temp directory.
    pub fn with_temp_root(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_root = Some(dir.into());
        self
    }

    pub fn source_root(&self) -> &Path {
        &self.source_root
    }

    /// Copy the source tree into a fresh private directory.
    ///
    /// Blocking; async callers should run it on the blocking pool.
    pub fn isolate(&self, label: &str) -> Result<Workspace> {
        if self.module_dir.is_absolute() {
            return Err(self.error(format!(
                "module dir {} must be relative to the source root",
                self.module_dir.display()
            )));
        }
        if !self.source_root.join(&self.module_dir).is_dir() {
            return Err(self.error(format!(
                "module dir {} does not exist",
                self.module_dir.display()
            )));
        }

        let source = fs::canonicalize(&self.source_root)
            .map_err(|e| self.error(format!("cannot resolve source root: {e}")))?;
        let temp_root = self.temp_root.clone().unwrap_or_else(env::temp_dir);
        let parent = fs::canonicalize(&temp_root)
            .map_err(|e| self.error(format!("cannot resolve temp root {}: {e}", temp_root.display())))?;
        if parent.starts_with(&source) {
            return Err(self.error(format!(
                "temp root {} lies inside the source tree",
                temp_root.display()
            )));
        }

        let id = format!("{}-{}", sanitize(label), Uuid::new_v4().simple());
        let prefix = format!("fleetcheck-{id}-");
        let mut builder = tempfile::Builder::new();
        builder.prefix(&prefix);
        let dir = builder
            .tempdir_in(&parent)
            .map_err(|e| self.error(format!("cannot create temp dir: {e}")))?;

        let mut walk = CopyWalk {
            src: &source,
            dst: dir.path(),
            copied: Vec::new(),
            ancestors: HashSet::new(),
        };
        walk.copy_dir(Path::new(""))
            .map_err(|e| self.error(format!("copy failed: {e}")))?;
        let mut copied = walk.copied;
        copied.sort();

        let digest = digest_files(dir.path(), &copied)
            .map_err(|e| self.error(format!("cannot hash copy: {e}")))?;

        debug!(
            workspace_id = %id,
            files = copied.len(),
            digest = %&digest[..12],
            "workspace isolated"
        );

        Ok(Workspace {
            id,
            module_dir: dir.path().join(&self.module_dir),
            dir,
            digest,
        })
    }

    fn error(&self, reason: String) -> FleetError {
        FleetError::Isolation {
            source_dir: self.source_root.clone(),
            reason,
        }
    }
}

/// A private, disposable copy of the configuration tree.
#[derive(Debug)]
pub struct Workspace {
    id: String,
    dir: TempDir,
    module_dir: PathBuf,
    digest: String,
}

impl Workspace {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Directory inside the copy where the provisioning tool runs.
    pub fn module_dir(&self) -> &Path {
        &self.module_dir
    }

    /// Hex SHA-256 over the relative paths and contents of the copied files.
    pub fn digest(&self) -> &str {
        &self.digest
    }
}

fn sanitize(label: &str) -> String {
    let cleaned: String = label
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c.to_ascii_lowercase() } else { '-' })
        .collect();
    if cleaned.is_empty() {
        "workspace".to_string()
    } else {
        cleaned
    }
}

/// Recursive copy of `src` into `dst`.
struct CopyWalk<'a> {
    src: &'a Path,
    dst: &'a Path,
    /// Relative paths of the copied files.
    copied: Vec<PathBuf>,
    /// Canonical directories on the current path from the root.
    ancestors: HashSet<PathBuf>,
}

impl CopyWalk<'_> {
    fn copy_dir(&mut self, relative: &Path) -> io::Result<()> {
        let canonical = fs::canonicalize(self.src.join(relative))?;
        if !self.ancestors.insert(canonical.clone()) {
            debug!(path = %relative.display(), "skipping symlinked directory cycle");
            return Ok(());
        }
        fs::create_dir_all(self.dst.join(relative))?;
        let result = self.copy_entries(relative);
        self.ancestors.remove(&canonical);
        result
    }

    fn copy_entries(&mut self, relative: &Path) -> io::Result<()> {
        for entry in fs::read_dir(self.src.join(relative))? {
            let entry = entry?;
            let name = entry.file_name();
            let name_str = name.to_string_lossy();
            let rel = relative.join(&name);
            let file_type = entry.file_type()?;

            if file_type.is_dir() {
                if SKIPPED_DIRS.contains(&name_str.as_ref()) {
                    continue;
                }
                self.copy_dir(&rel)?;
            } else if file_type.is_file() || file_type.is_symlink() {
                if is_state_file(&name_str) {
                    continue;
                }
                // Symlinked directories are copied as directories.
                if fs::metadata(entry.path())?.is_dir() {
                    self.copy_dir(&rel)?;
                } else {
                    fs::copy(entry.path(), self.dst.join(&rel))?;
                    self.copied.push(rel);
                }
            }
        }
        Ok(())
    }
}

fn digest_files(root: &Path, files: &[PathBuf]) -> io::Result<String> {
    let mut hasher = Sha256::new();
    for rel in files {
        hasher.update(rel.to_string_lossy().as_bytes());
        hasher.update(b"\0");
        hasher.update(fs::read(root.join(rel))?);
        hasher.update(b"\0");
    }
    Ok(hex::encode(hasher.finalize()))
}
