//! Sync engine: change detection and index application.
//!
//! Detection prefers a VCS-aware diff (commit marker vs HEAD via git2)
//! to bound the candidate set, then verifies candidates by content hash
//! against the stored manifest. Without a `.git` directory the persisted
//! mtime+size+hash manifest does all the work. Renames are recognized by
//! content-hash identity.
//!
//! Application is per-file atomic: a reader never observes a partial
//! file's spans. Enrichments whose spans disappear are kept as orphans
//! for later reconnection and reaped after a TTL.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use git2::Repository;
use ignore::WalkBuilder;
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::error::{CoreError, Result};
use crate::extract::{self, content_hash, Extraction};
use crate::graph::{self, FileExtraction};
use crate::store::IndexStore;
use crate::types::IndexState;

/// Files larger than this are not indexed.
pub const MAX_FILE_SIZE: u64 = 4 * 1024 * 1024;

/// Detected repository changes since the last sync.
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    pub added: Vec<String>,
    pub modified: Vec<String>,
    pub deleted: Vec<String>,
    /// `(old_path, new_path)` pairs matched by content hash.
    pub renamed: Vec<(String, String)>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty()
            && self.modified.is_empty()
            && self.deleted.is_empty()
            && self.renamed.is_empty()
    }

    pub fn total(&self) -> usize {
        self.added.len() + self.modified.len() + self.deleted.len() + self.renamed.len()
    }
}

/// Outcome of one apply pass.
#[derive(Debug, Clone, Default)]
pub struct ApplyReport {
    pub files_added: usize,
    pub files_modified: usize,
    pub files_deleted: usize,
    pub files_renamed: usize,
    pub spans_inserted: usize,
    pub spans_removed: usize,
    /// Parse warnings as `path: message`; the next sync retries them.
    pub warnings: Vec<String>,
    pub entities: usize,
    pub relations: usize,
    pub unresolved_refs: u64,
}

impl ApplyReport {
    pub fn did_work(&self) -> bool {
        self.files_added + self.files_modified + self.files_deleted + self.files_renamed > 0
    }
}

/// One file observed on disk.
#[derive(Debug, Clone)]
struct DiskFile {
    mtime: i64,
    size: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChangeKind {
    Added,
    Modified,
    Renamed,
}

/// Per-repo sync engine over one index store.
pub struct SyncEngine {
    repo_root: PathBuf,
    store: Arc<IndexStore>,
}

impl SyncEngine {
    pub fn new(repo_root: impl Into<PathBuf>, store: Arc<IndexStore>) -> Self {
        Self {
            repo_root: repo_root.into(),
            store,
        }
    }

    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    /// Current HEAD commit id, when the repo is under git.
    pub fn head_commit(&self) -> Option<String> {
        let repo = Repository::open(&self.repo_root).ok()?;
        let head = repo.head().ok()?.peel_to_commit().ok()?;
        Some(head.id().to_string())
    }

    /// Detect added/modified/deleted/renamed files since the last sync.
    pub fn detect_changes(&self) -> Result<ChangeSet> {
        let disk = self.walk_disk()?;
        let stored: HashMap<String, (String, i64, i64)> = self
            .store
            .file_manifest()?
            .into_iter()
            .map(|f| (f.path, (f.content_hash, f.mtime, f.size)))
            .collect();

        // With a commit marker, the tree diff bounds which unchanged-looking
        // files still need a hash check (uncommitted edits are caught by the
        // mtime+size compare either way).
        let git_candidates = self
            .store
            .index_status()?
            .last_indexed_commit
            .as_deref()
            .and_then(|since| self.git_changed_paths(since));

        let mut changes = ChangeSet::default();
        let mut added_hashes: HashMap<String, String> = HashMap::new();

        for (path, disk_file) in &disk {
            match stored.get(path) {
                None => {
                    let hash = self.hash_file(path)?;
                    added_hashes.insert(path.clone(), hash);
                    changes.added.push(path.clone());
                }
                Some((stored_hash, stored_mtime, stored_size)) => {
                    let metadata_match =
                        *stored_mtime == disk_file.mtime && *stored_size == disk_file.size as i64;
                    let git_says_unchanged = git_candidates
                        .as_ref()
                        .map(|set| !set.contains(path))
                        .unwrap_or(false);
                    if metadata_match && git_says_unchanged {
                        continue;
                    }
                    if metadata_match && git_candidates.is_none() {
                        continue;
                    }
                    let hash = self.hash_file(path)?;
                    if hash != *stored_hash {
                        changes.modified.push(path.clone());
                    }
                }
            }
        }

        for path in stored.keys() {
            if !disk.contains_key(path) {
                changes.deleted.push(path.clone());
            }
        }

        // Rename detection: an added file whose content hash matches a
        // deleted file's stored hash.
        let deleted_by_hash: HashMap<String, String> = changes
            .deleted
            .iter()
            .filter_map(|path| {
                stored
                    .get(path)
                    .map(|(hash, _, _)| (hash.clone(), path.clone()))
            })
            .collect();
        let mut still_added = Vec::new();
        let mut renamed_old: HashSet<String> = HashSet::new();
        for path in changes.added.drain(..) {
            if let Some(hash) = added_hashes.get(&path) {
                if let Some(old_path) = deleted_by_hash.get(hash) {
                    if renamed_old.insert(old_path.clone()) {
                        changes.renamed.push((old_path.clone(), path));
                        continue;
                    }
                }
            }
            still_added.push(path);
        }
        changes.added = still_added;
        changes.deleted.retain(|path| !renamed_old.contains(path));

        changes.added.sort();
        changes.modified.sort();
        changes.deleted.sort();
        changes.renamed.sort();
        Ok(changes)
    }

    /// Apply a change set: re-extract, diff spans, update the store.
    pub fn apply(&self, changes: &ChangeSet) -> Result<ApplyReport> {
        let mut report = ApplyReport::default();

        for path in &changes.deleted {
            if self.store.delete_file(path)? {
                report.files_deleted += 1;
            }
        }

        // A rename tombstones the old file id; spans keep their hashes so
        // enrichments reconnect through the new file's rows.
        let mut to_index: Vec<(String, ChangeKind)> = Vec::new();
        for (old_path, new_path) in &changes.renamed {
            self.store.delete_file(old_path)?;
            to_index.push((new_path.clone(), ChangeKind::Renamed));
        }
        to_index.extend(changes.added.iter().map(|p| (p.clone(), ChangeKind::Added)));
        to_index.extend(
            changes
                .modified
                .iter()
                .map(|p| (p.clone(), ChangeKind::Modified)),
        );

        // Parse in parallel, write sequentially.
        let extracted: Vec<(String, ChangeKind, Result<(Vec<u8>, Extraction)>)> = to_index
            .par_iter()
            .map(|(path, kind)| {
                let result = self.read_and_extract(path);
                (path.clone(), *kind, result)
            })
            .collect();

        for (path, kind, result) in extracted {
            match result {
                Ok((bytes, extraction)) => {
                    let metadata = std::fs::metadata(self.repo_root.join(&path))?;
                    let mtime = file_mtime(&metadata);
                    let (file_id, _) = self.store.upsert_file(
                        &path,
                        &content_hash(&bytes),
                        mtime,
                        &extraction.language,
                        metadata.len() as i64,
                    )?;
                    let diff = self.store.replace_spans_for_file(file_id, &extraction.spans)?;
                    report.spans_inserted += diff.inserted;
                    report.spans_removed += diff.removed;
                    if extraction.partial {
                        report
                            .warnings
                            .push(format!("{path}: parsed with recovered syntax errors"));
                    }
                    match kind {
                        ChangeKind::Added => report.files_added += 1,
                        ChangeKind::Modified => report.files_modified += 1,
                        ChangeKind::Renamed => report.files_renamed += 1,
                    }
                }
                Err(CoreError::ParseError { path, message }) => {
                    // Zero spans, recorded warning, retried next run.
                    warn!(path = %path.display(), %message, "parse failed");
                    report
                        .warnings
                        .push(format!("{}: {message}", path.display()));
                }
                Err(CoreError::UnsupportedLanguage { path }) => {
                    debug!(path = %path.display(), "skipping binary file");
                }
                Err(other) => return Err(other),
            }
        }

        Ok(report)
    }

    /// Full cycle: detect, apply, rebuild the graph, mark status.
    ///
    /// With no changes this performs zero store writes.
    pub fn sync(&self) -> Result<ApplyReport> {
        let changes = self.detect_changes()?;
        let head = self.head_commit();
        let status = self.store.index_status()?;

        if changes.is_empty() {
            debug!("sync: no changes detected");
            // Re-anchor the commit marker after a content-free commit;
            // otherwise stay silent so a no-op sync performs zero writes.
            if status.last_indexed_commit != head && status.last_indexed_at.is_some() {
                self.store.mark_synced(head.as_deref())?;
            }
            return Ok(ApplyReport::default());
        }

        info!(
            added = changes.added.len(),
            modified = changes.modified.len(),
            deleted = changes.deleted.len(),
            renamed = changes.renamed.len(),
            "sync: applying changes"
        );
        self.store.set_state(IndexState::Indexing, None)?;

        let result = self.apply(&changes).and_then(|mut report| {
            let built = self.rebuild_graph()?;
            report.entities = built.entities.len();
            report.relations = built.relations.len();
            report.unresolved_refs = built.unresolved;
            self.store.replace_graph(&built.entities, &built.relations)?;
            Ok(report)
        });

        match result {
            Ok(report) => {
                self.store.mark_synced(head.as_deref())?;
                if !report.warnings.is_empty() {
                    self.store
                        .set_state(IndexState::Warn, Some(&report.warnings.join("; ")))?;
                }
                Ok(report)
            }
            Err(e) => {
                self.store.set_state(IndexState::Error, Some(&e.to_string()))?;
                Err(e)
            }
        }
    }

    /// Cheap staleness probe for the freshness gate: commit mismatch or
    /// any mtime+size drift counts as stale. No hashing.
    pub fn is_stale(&self) -> Result<bool> {
        let status = self.store.index_status()?;
        if status.last_indexed_commit != self.head_commit() {
            return Ok(true);
        }
        let disk = self.walk_disk()?;
        let stored: HashMap<String, (String, i64, i64)> = self
            .store
            .file_manifest()?
            .into_iter()
            .map(|f| (f.path, (f.content_hash, f.mtime, f.size)))
            .collect();
        if disk.len() != stored.len() {
            return Ok(true);
        }
        for (path, disk_file) in &disk {
            match stored.get(path) {
                None => return Ok(true),
                Some((_, mtime, size)) => {
                    if *mtime != disk_file.mtime || *size != disk_file.size as i64 {
                        return Ok(true);
                    }
                }
            }
        }
        Ok(false)
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    /// Walk the repo respecting ignore files; skips the index's own
    /// directories, binaries, and oversized files.
    fn walk_disk(&self) -> Result<HashMap<String, DiskFile>> {
        let mut files = HashMap::new();
        let walker = WalkBuilder::new(&self.repo_root)
            .hidden(true)
            .git_ignore(true)
            .git_exclude(true)
            .filter_entry(|entry| {
                let name = entry.file_name().to_string_lossy();
                name != ".git" && name != ".llmc" && name != ".rag" && name != "logs"
            })
            .build();

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    debug!("walk error: {e}");
                    continue;
                }
            };
            let Some(file_type) = entry.file_type() else {
                continue;
            };
            if !file_type.is_file() {
                continue;
            }
            let metadata = match entry.metadata() {
                Ok(m) => m,
                Err(_) => continue,
            };
            if metadata.len() > MAX_FILE_SIZE {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(&self.repo_root) else {
                continue;
            };
            files.insert(
                relative.to_string_lossy().replace('\\', "/"),
                DiskFile {
                    mtime: file_mtime(&metadata),
                    size: metadata.len(),
                },
            );
        }
        Ok(files)
    }

    fn hash_file(&self, path: &str) -> Result<String> {
        let bytes = std::fs::read(self.repo_root.join(path))?;
        Ok(content_hash(&bytes))
    }

    fn read_and_extract(&self, path: &str) -> Result<(Vec<u8>, Extraction)> {
        let full_path = self.repo_root.join(path);
        let bytes = std::fs::read(&full_path)?;
        if extract::looks_binary(&bytes) {
            return Err(CoreError::unsupported(path));
        }
        let source = String::from_utf8_lossy(&bytes).into_owned();
        let extraction = extract::extract(Path::new(path), &source)?;
        Ok((bytes, extraction))
    }

    /// Re-extract every current file and resolve the repo graph.
    fn rebuild_graph(&self) -> Result<graph::BuiltGraph> {
        let disk = self.walk_disk()?;
        let mut paths: Vec<String> = disk.into_keys().collect();
        paths.sort();

        let extractions: Vec<FileExtraction> = paths
            .par_iter()
            .filter_map(|path| match self.read_and_extract(path) {
                Ok((_, extraction)) => Some(FileExtraction {
                    path: path.clone(),
                    extraction,
                }),
                Err(_) => None,
            })
            .collect();

        Ok(graph::build(&extractions))
    }

    fn git_changed_paths(&self, since: &str) -> Option<HashSet<String>> {
        let repo = Repository::open(&self.repo_root).ok()?;
        let old = repo
            .revparse_single(since)
            .ok()?
            .peel_to_commit()
            .ok()?;
        let new = repo.head().ok()?.peel_to_commit().ok()?;
        let diff = repo
            .diff_tree_to_tree(Some(&old.tree().ok()?), Some(&new.tree().ok()?), None)
            .ok()?;

        let mut paths = HashSet::new();
        diff.foreach(
            &mut |delta, _| {
                for file in [delta.old_file(), delta.new_file()] {
                    if let Some(path) = file.path() {
                        paths.insert(path.to_string_lossy().to_string());
                    }
                }
                true
            },
            None,
            None,
            None,
        )
        .ok()?;
        Some(paths)
    }
}

fn file_mtime(metadata: &std::fs::Metadata) -> i64 {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
