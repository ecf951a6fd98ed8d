//! On-disk half of the sync: node files under the sync root.
//!
//! ## `save_node` write protocol
//!
//! 1. Render the node to YAML and normalise line endings to LF.
//! 2. SHA-256 the rendered text and the current file (if any).
//! 3. Identical digests → [`WriteResult::Unchanged`]; the file is not touched.
//! 4. Write `<path>.canopy.tmp`, creating parent directories.
//! 5. Rename over the target; on failure the tmp file is removed.
//!
//! Nothing is ever deleted outright: stale files are moved to
//! `<root>/<archive>/<UTC stamp>/<relative path>`.

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use chrono::Utc;
use sha2::{Digest, Sha256};

use canopy_core::{EntityKey, SyncSettings};

use crate::codec::SerializedNode;
use crate::error::{io_err, SyncError};

/// Suffix of the temporary sibling used by atomic writes.
const TMP_SUFFIX: &str = "canopy.tmp";

/// Outcome of an individual node write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteResult {
    /// File was written (content changed or did not previously exist).
    Written { path: PathBuf },
    /// File was skipped; rendered content matches the file on disk.
    Unchanged { path: PathBuf },
}

impl WriteResult {
    pub fn path(&self) -> &Path {
        match self {
            WriteResult::Written { path } | WriteResult::Unchanged { path } => path,
        }
    }
}

/// A node file found by [`FileStore::scan`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub key: EntityKey,
    pub path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
    extension: String,
    archive_folder: String,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>, settings: &SyncSettings) -> Self {
        Self {
            root: root.into(),
            extension: settings.extension.clone(),
            archive_folder: settings.archive_folder.clone(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    pub fn category_dir(&self, category: &str) -> PathBuf {
        self.root.join(category)
    }

    pub fn archive_dir(&self) -> PathBuf {
        self.root.join(&self.archive_folder)
    }

    /// `<root>/<category>/<entity_path parent>/<safe_name>.<ext>`.
    ///
    /// Any component that could leave the root is rejected with
    /// [`SyncError::OutsideRoot`].
    pub fn save_path(
        &self,
        category: &str,
        entity_path: &Path,
        safe_name: &str,
    ) -> Result<PathBuf, SyncError> {
        let mut relative = PathBuf::from(category);
        if let Some(parent) = entity_path.parent() {
            relative.push(parent);
        }
        relative.push(format!("{safe_name}.{}", self.extension));

        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
            || safe_name.contains(['/', '\\']);
        if escapes {
            return Err(SyncError::OutsideRoot {
                path: relative,
                root: self.root.clone(),
            });
        }
        Ok(self.root.join(relative))
    }

    /// Hash-gated atomic write of `node` to `path`.
    pub fn save_node(&self, node: &SerializedNode, path: &Path) -> Result<WriteResult, SyncError> {
        self.ensure_inside(path)?;
        let rendered = normalize_line_endings(&node.to_yaml()?);

        match fs::read_to_string(path) {
            Ok(existing) => {
                if digest(&normalize_line_endings(&existing)) == digest(&rendered) {
                    tracing::debug!(path = %path.display(), "unchanged");
                    return Ok(WriteResult::Unchanged {
                        path: path.to_path_buf(),
                    });
                }
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(io_err(path, err)),
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
        }
        let tmp = tmp_path(path);
        fs::write(&tmp, &rendered).map_err(|e| io_err(&tmp, e))?;
        if let Err(e) = fs::rename(&tmp, path) {
            let _ = fs::remove_file(&tmp);
            return Err(io_err(path, e));
        }

        tracing::info!(path = %path.display(), key = %node.key, "wrote node");
        Ok(WriteResult::Written {
            path: path.to_path_buf(),
        })
    }

    pub fn load_node(&self, path: &Path) -> Result<SerializedNode, SyncError> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(SyncError::FileNotFound {
                    path: path.to_path_buf(),
                })
            }
            Err(err) => return Err(io_err(path, err)),
        };
        SerializedNode::from_yaml(&text, path)
    }

    /// Move a file or folder into the archive. `Ok(None)` when nothing exists
    /// at `path`.
    pub fn archive_file(&self, path: &Path) -> Result<Option<PathBuf>, SyncError> {
        let relative = self.ensure_inside(path)?;
        if fs::symlink_metadata(path).is_err() {
            return Ok(None);
        }

        let stamped = self
            .archive_dir()
            .join(Utc::now().format("%Y%m%dT%H%M%S%3fZ").to_string());
        let mut target = stamped.join(&relative);
        let mut attempt = 1;
        while target.exists() {
            let mut name = relative.as_os_str().to_owned();
            name.push(format!(".{attempt}"));
            target = stamped.join(name);
            attempt += 1;
        }

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
        }
        fs::rename(path, &target).map_err(|e| io_err(path, e))?;
        tracing::info!(from = %path.display(), to = %target.display(), "archived");
        Ok(Some(target))
    }

    /// Archive `<category>/<relative>.<ext>` unless it belongs to a live
    /// entity, then prune the folder `<category>/<relative>`.
    pub fn archive_relative_file(
        &self,
        category: &str,
        relative: &Path,
        is_live: &dyn Fn(&EntityKey) -> bool,
    ) -> Result<Vec<PathBuf>, SyncError> {
        let base = self.category_dir(category).join(relative);
        let mut file = base.as_os_str().to_owned();
        file.push(format!(".{}", self.extension));
        let file = PathBuf::from(file);

        let mut archived = Vec::new();
        if file.is_file() {
            archived.extend(self.archive_unless_live(&file, is_live)?);
        }
        archived.extend(self.prune_folder(category, relative, is_live)?);
        Ok(archived)
    }

    /// Tidy the folder `<category>/<relative>` of a container with no
    /// children left in the store.
    ///
    /// Names are not unique, so the folder may also hold the children of a
    /// same-named sibling. Only node files whose key `is_live` rejects are
    /// archived; live and foreign files stay where they are. Folders left
    /// with no entries are then removed, the folder itself included.
    ///
    /// Returns archive targets followed by removed folders.
    pub fn prune_folder(
        &self,
        category: &str,
        relative: &Path,
        is_live: &dyn Fn(&EntityKey) -> bool,
    ) -> Result<Vec<PathBuf>, SyncError> {
        let folder = self.category_dir(category).join(relative);
        if !folder.is_dir() {
            return Ok(Vec::new());
        }

        let mut pruned = Vec::new();
        let mut dirs = collect_dirs(&folder)?;
        for dir in &dirs {
            for entry in fs::read_dir(dir).map_err(|e| io_err(dir, e))? {
                let path = entry.map_err(|e| io_err(dir, e))?.path();
                if path.is_file() && self.is_node_file(&path) {
                    pruned.extend(self.archive_unless_live(&path, is_live)?);
                }
            }
        }

        dirs.sort_by_key(|d| std::cmp::Reverse(d.components().count()));
        for dir in dirs {
            if dir.is_dir() && is_empty_dir(&dir)? {
                fs::remove_dir(&dir).map_err(|e| io_err(&dir, e))?;
                tracing::debug!(path = %dir.display(), "removed empty folder");
                pruned.push(dir);
            }
        }
        Ok(pruned)
    }

    /// Archive a node file unless its key is live. Unreadable files stay.
    fn archive_unless_live(
        &self,
        path: &Path,
        is_live: &dyn Fn(&EntityKey) -> bool,
    ) -> Result<Option<PathBuf>, SyncError> {
        match self.load_node(path) {
            Ok(node) if is_live(&node.key) => {
                tracing::debug!(key = %node.key, path = %path.display(), "file belongs to a live entity; kept");
                Ok(None)
            }
            Ok(_) => self.archive_file(path),
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "leaving unreadable node file in place");
                Ok(None)
            }
        }
    }

    /// Every node file in the category tree, sorted by path.
    ///
    /// Unreadable and foreign files are skipped with a warning.
    pub fn scan(&self, category: &str) -> Result<Vec<FileRecord>, SyncError> {
        let mut records = Vec::new();
        for dir in collect_dirs(&self.category_dir(category))? {
            let entries = match fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(err) if err.kind() == ErrorKind::NotFound => continue,
                Err(err) => return Err(io_err(&dir, err)),
            };
            for entry in entries {
                let entry = entry.map_err(|e| io_err(&dir, e))?;
                let path = entry.path();
                if !path.is_file() || !self.is_node_file(&path) {
                    continue;
                }
                match self.load_node(&path) {
                    Ok(node) => records.push(FileRecord {
                        key: node.key,
                        path,
                    }),
                    Err(err) => {
                        tracing::warn!(path = %path.display(), error = %err, "skipping unreadable node file");
                    }
                }
            }
        }
        records.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(records)
    }

    /// Archive every file for `key` that is not `current`.
    pub fn manage_orphan_files(
        &self,
        category: &str,
        key: &EntityKey,
        current: &Path,
    ) -> Result<Vec<PathBuf>, SyncError> {
        let mut archived = Vec::new();
        for record in self.scan(category)? {
            if record.key == *key && record.path != current {
                tracing::info!(key = %key, path = %record.path.display(), "orphan file");
                archived.extend(self.archive_file(&record.path)?);
            }
        }
        Ok(archived)
    }

    /// One-scan version of [`FileStore::manage_orphan_files`] for a whole
    /// export: archive files whose key maps to a different canonical path.
    pub fn sweep_orphans(
        &self,
        category: &str,
        canonical: &HashMap<EntityKey, PathBuf>,
    ) -> Result<Vec<PathBuf>, SyncError> {
        let mut archived = Vec::new();
        for record in self.scan(category)? {
            match canonical.get(&record.key) {
                Some(current) if *current != record.path => {
                    tracing::info!(key = %record.key, path = %record.path.display(), "orphan file");
                    archived.extend(self.archive_file(&record.path)?);
                }
                _ => {}
            }
        }
        Ok(archived)
    }

    /// Remove, deepest first, every folder under the category that holds no
    /// files. The category folder itself is kept.
    pub fn prune_empty_dirs(&self, category: &str) -> Result<Vec<PathBuf>, SyncError> {
        let category_dir = self.category_dir(category);
        let mut dirs = collect_dirs(&category_dir)?;
        dirs.retain(|d| *d != category_dir);
        dirs.sort_by_key(|d| std::cmp::Reverse(d.components().count()));

        let mut removed = Vec::new();
        for dir in dirs {
            if dir.is_dir() && is_empty_dir(&dir)? {
                fs::remove_dir(&dir).map_err(|e| io_err(&dir, e))?;
                tracing::debug!(path = %dir.display(), "pruned empty folder");
                removed.push(dir);
            }
        }
        Ok(removed)
    }

    fn is_node_file(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case(&self.extension))
            .unwrap_or(false)
    }

    /// Path relative to the root, or `OutsideRoot`.
    fn ensure_inside(&self, path: &Path) -> Result<PathBuf, SyncError> {
        let outside = || SyncError::OutsideRoot {
            path: path.to_path_buf(),
            root: self.root.clone(),
        };
        let relative = path.strip_prefix(&self.root).map_err(|_| outside())?;
        if relative.as_os_str().is_empty()
            || relative
                .components()
                .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(outside());
        }
        Ok(relative.to_path_buf())
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(format!(".{TMP_SUFFIX}"));
    PathBuf::from(tmp)
}

fn digest(content: &str) -> String {
    let mut h = Sha256::new();
    h.update(content.as_bytes());
    hex::encode(h.finalize())
}

fn normalize_line_endings(content: &str) -> String {
    content.replace("\r\n", "\n")
}

fn is_empty_dir(path: &Path) -> Result<bool, SyncError> {
    let mut entries = fs::read_dir(path).map_err(|e| io_err(path, e))?;
    Ok(entries.next().is_none())
}

/// Breadth-first list of `root` and every directory below it.
fn collect_dirs(root: &Path) -> Result<Vec<PathBuf>, SyncError> {
    let mut dirs = vec![root.to_path_buf()];
    let mut cursor = 0;
    while cursor < dirs.len() {
        let current = dirs[cursor].clone();
        cursor += 1;
        let entries = match fs::read_dir(&current) {
            Ok(entries) => entries,
            Err(err) => {
                if err.kind() == ErrorKind::NotFound {
                    continue;
                }
                return Err(io_err(&current, err));
            }
        };
        for entry in entries {
            let entry = entry.map_err(|e| io_err(&current, e))?;
            let ty = entry.file_type().map_err(|e| io_err(entry.path(), e))?;
            if ty.is_dir() {
                dirs.push(entry.path());
            }
        }
    }
    dirs.sort();
    dirs.dedup();
    Ok(dirs)
}
