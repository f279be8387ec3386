//! Persistent index store over a single embedded SQLite file.
//!
//! All writes are transactional; readers see consistent snapshots. The
//! store is the only shared mutable resource in the system and follows a
//! single-writer discipline: one connection guarded by a mutex, WAL
//! journaling, and a busy timeout of five seconds.
//!
//! Bulk enrichment/embedding writes go through [`BatchWriter`], which
//! commits at most every 50 items or 5 seconds. Per-item commits are a
//! throughput collapse under SQLite's locking and are not offered.

mod batch;
pub mod schema;

pub use batch::{BatchWriter, WriteOp, BATCH_MAX_AGE, BATCH_MAX_ITEMS};
pub use schema::CURRENT_SCHEMA_VERSION;

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::{Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info, warn};

use crate::error::{CoreError, Result};
use crate::graph::{EntityGraph, TraversalDirection, TraversalHit};
use crate::types::{
    EdgeType, EmbeddingRecord, Enrichment, Entity, EntityKind, EntityMetadata, EvidenceRange,
    FailureRecord, FileRecord, HealthReport, IndexState, IndexStats, IndexStatus, Span, SpanKind,
};

/// Lexical prefilter cap for vector candidate narrowing.
pub const VECTOR_PREFILTER_CAP: usize = 2000;

/// A span joined with its file row.
#[derive(Debug, Clone)]
pub struct SpanRow {
    pub file_id: i64,
    pub file_path: String,
    pub span: Span,
}

/// A span pending enrichment, ordered by file mtime desc then position.
#[derive(Debug, Clone)]
pub struct PendingSpan {
    pub file_id: i64,
    pub file_path: String,
    pub file_mtime: i64,
    pub span: Span,
}

/// A span pending an embedding for some profile, with the text to embed
/// (enrichment summary when present, else canonicalized span text).
#[derive(Debug, Clone)]
pub struct PendingEmbedding {
    pub span_hash: String,
    pub text: String,
}

/// A lexical search hit.
#[derive(Debug, Clone)]
pub struct LexicalHit {
    pub span_hash: String,
    pub file_path: String,
    /// BM25-derived, larger is better.
    pub score: f32,
}

/// A vector search hit.
#[derive(Debug, Clone)]
pub struct VectorHit {
    pub span_hash: String,
    /// Cosine similarity in [-1, 1].
    pub score: f32,
}

/// Result of replacing a file's spans.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SpanDiff {
    pub inserted: usize,
    pub removed: usize,
    pub kept: usize,
}

/// The persistent index store. Cheap to share behind an `Arc`.
pub struct IndexStore {
    conn: Mutex<Connection>,
    path: PathBuf,
}

impl IndexStore {
    /// Open (creating if needed) the store at `db_path` and run forward
    /// migrations. `repo_path` seeds the index status record.
    pub fn open(db_path: &Path, repo_path: &str) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(db_path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;

        let store = Self {
            conn: Mutex::new(conn),
            path: db_path.to_path_buf(),
        };
        store.migrate(repo_path)?;
        Ok(store)
    }

    /// In-memory store for tests.
    pub fn open_in_memory(repo_path: &str) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        let store = Self {
            conn: Mutex::new(conn),
            path: PathBuf::from(":memory:"),
        };
        store.migrate(repo_path)?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    // ------------------------------------------------------------------
    // Migrations
    // ------------------------------------------------------------------

    fn migrate(&self, repo_path: &str) -> Result<()> {
        let mut conn = self.conn.lock();
        conn.execute_batch(schema::SCHEMA_CREATE_META)?;

        let on_disk = read_schema_version(&conn)?;
        if on_disk > CURRENT_SCHEMA_VERSION {
            return Err(CoreError::StoreCorrupt(format!(
                "on-disk schema version {on_disk} is newer than supported {CURRENT_SCHEMA_VERSION}"
            )));
        }

        for &(version, sql) in schema::MIGRATIONS {
            if version <= on_disk {
                continue;
            }
            info!(version, "applying schema migration");
            let tx = conn.transaction()?;
            if let Err(e) = tx.execute_batch(sql) {
                // Dropping the transaction rolls back; the store is untouched.
                return Err(CoreError::MigrationFailed {
                    version,
                    message: e.to_string(),
                });
            }
            tx.execute(
                "INSERT INTO meta (key, value) VALUES ('schema_version', ?1)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![version.to_string()],
            )?;
            tx.commit()?;
        }

        // Seed the singleton status row.
        conn.execute(
            "INSERT OR IGNORE INTO index_status
                 (id, repo_path, state, last_indexed_at, last_indexed_commit, schema_version, last_error)
             VALUES (1, ?1, 'empty', NULL, NULL, ?2, NULL)",
            params![repo_path, CURRENT_SCHEMA_VERSION],
        )?;
        conn.execute(
            "UPDATE index_status SET schema_version = ?1 WHERE id = 1",
            params![CURRENT_SCHEMA_VERSION],
        )?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Files and spans
    // ------------------------------------------------------------------

    /// Insert or update a file row. Returns `(file_id, created)`.
    pub fn upsert_file(
        &self,
        path: &str,
        content_hash: &str,
        mtime: i64,
        language: &str,
        size: i64,
    ) -> Result<(i64, bool)> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let existing: Option<i64> = tx
            .query_row("SELECT id FROM files WHERE path = ?1", params![path], |r| {
                r.get(0)
            })
            .optional()?;
        let (id, created) = match existing {
            Some(id) => {
                tx.execute(
                    "UPDATE files SET content_hash = ?1, mtime = ?2, language = ?3, size = ?4
                     WHERE id = ?5",
                    params![content_hash, mtime, language, size, id],
                )?;
                (id, false)
            }
            None => {
                tx.execute(
                    "INSERT INTO files (path, content_hash, mtime, language, size)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![path, content_hash, mtime, language, size],
                )?;
                (tx.last_insert_rowid(), true)
            }
        };
        bump_write_counter(&tx)?;
        tx.commit()?;
        Ok((id, created))
    }

    /// Atomically replace a file's spans with the extractor's output.
    ///
    /// Readers never observe a partial file: the whole replacement is one
    /// transaction. Unchanged span hashes are kept in place.
    pub fn replace_spans_for_file(&self, file_id: i64, spans: &[Span]) -> Result<SpanDiff> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let mut existing: HashSet<String> = HashSet::new();
        {
            let mut stmt = tx.prepare("SELECT span_hash FROM spans WHERE file_id = ?1")?;
            let rows = stmt.query_map(params![file_id], |r| r.get::<_, String>(0))?;
            for row in rows {
                existing.insert(row?);
            }
        }

        let incoming: HashSet<&str> = spans.iter().map(|s| s.span_hash.as_str()).collect();
        let mut diff = SpanDiff::default();

        for hash in &existing {
            if !incoming.contains(hash.as_str()) {
                tx.execute(
                    "DELETE FROM spans WHERE file_id = ?1 AND span_hash = ?2",
                    params![file_id, hash],
                )?;
                tx.execute(
                    "DELETE FROM span_fts WHERE file_id = ?1 AND span_hash = ?2",
                    params![file_id, hash],
                )?;
                diff.removed += 1;
            }
        }

        for span in spans {
            if existing.contains(&span.span_hash) {
                // Lines may have shifted; refresh metadata without
                // touching the hash-keyed identity.
                tx.execute(
                    "UPDATE spans SET kind = ?1, symbol_name = ?2, start_line = ?3, end_line = ?4
                     WHERE file_id = ?5 AND span_hash = ?6",
                    params![
                        span.kind.as_str(),
                        span.symbol_name,
                        span.start_line,
                        span.end_line,
                        file_id,
                        span.span_hash
                    ],
                )?;
                diff.kept += 1;
            } else {
                tx.execute(
                    "INSERT OR REPLACE INTO spans
                         (span_hash, file_id, kind, symbol_name, start_line, end_line,
                          content, content_type, content_language)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                    params![
                        span.span_hash,
                        file_id,
                        span.kind.as_str(),
                        span.symbol_name,
                        span.start_line,
                        span.end_line,
                        span.content,
                        span.content_type,
                        span.content_language
                    ],
                )?;
                tx.execute(
                    "INSERT INTO span_fts (span_hash, file_id, symbol_name, content)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![
                        span.span_hash,
                        file_id,
                        span.symbol_name.as_deref().unwrap_or(""),
                        span.content
                    ],
                )?;
                diff.inserted += 1;
            }
        }

        if diff.inserted > 0 || diff.removed > 0 {
            bump_write_counter(&tx)?;
        }
        tx.commit()?;
        Ok(diff)
    }

    /// Delete a file and cascade to its spans. Enrichments survive as
    /// orphans. Returns whether a row was deleted.
    pub fn delete_file(&self, path: &str) -> Result<bool> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let id: Option<i64> = tx
            .query_row("SELECT id FROM files WHERE path = ?1", params![path], |r| {
                r.get(0)
            })
            .optional()?;
        let Some(id) = id else {
            return Ok(false);
        };
        tx.execute("DELETE FROM span_fts WHERE file_id = ?1", params![id])?;
        tx.execute("DELETE FROM files WHERE id = ?1", params![id])?;
        bump_write_counter(&tx)?;
        tx.commit()?;
        Ok(true)
    }

    /// All tracked files, ordered by path.
    pub fn file_manifest(&self) -> Result<Vec<FileRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, path, content_hash, mtime, language, size FROM files ORDER BY path",
        )?;
        let rows = stmt.query_map([], |r| {
            Ok(FileRecord {
                id: r.get(0)?,
                path: r.get(1)?,
                content_hash: r.get(2)?,
                mtime: r.get(3)?,
                language: r.get(4)?,
                size: r.get(5)?,
            })
        })?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Into::into)
    }

    /// Look up one span row by hash (first match when shared by files).
    pub fn span_by_hash(&self, span_hash: &str) -> Result<Option<SpanRow>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {}, f.path FROM spans s JOIN files f ON f.id = s.file_id
             WHERE s.span_hash = ?1 ORDER BY f.path LIMIT 1",
            span_columns_qualified()
        ))?;
        stmt.query_row(params![span_hash], row_to_span_row)
            .optional()
            .map_err(Into::into)
    }

    /// Find the span covering a symbol in a file, for materializing graph
    /// hits as spans.
    pub fn span_for_symbol(&self, file_path: &str, symbol_name: &str) -> Result<Option<SpanRow>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {}, f.path FROM spans s JOIN files f ON f.id = s.file_id
             WHERE f.path = ?1 AND s.symbol_name = ?2 LIMIT 1",
            span_columns_qualified()
        ))?;
        stmt.query_row(params![file_path, symbol_name], row_to_span_row)
            .optional()
            .map_err(Into::into)
    }

    // ------------------------------------------------------------------
    // Enrichments
    // ------------------------------------------------------------------

    pub fn put_enrichment(&self, enrichment: &Enrichment) -> Result<()> {
        let conn = self.conn.lock();
        insert_enrichment(&conn, enrichment)?;
        bump_write_counter(&conn)?;
        Ok(())
    }

    pub fn enrichment(&self, span_hash: &str) -> Result<Option<Enrichment>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT span_hash, summary, inputs_json, outputs_json, side_effects_json,
                    pitfalls_json, usage_snippet, evidence_json, model_id, created_at
             FROM enrichments WHERE span_hash = ?1",
        )?;
        stmt.query_row(params![span_hash], row_to_enrichment)
            .optional()
            .map_err(Into::into)
    }

    /// Spans lacking an enrichment, newest files first, excluding spans
    /// whose file was touched within the cooldown window.
    pub fn pending_enrichments(
        &self,
        limit: usize,
        cooldown_seconds: u64,
    ) -> Result<Vec<PendingSpan>> {
        let cutoff = Utc::now().timestamp() - cooldown_seconds as i64;
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {}, f.path, f.mtime
             FROM spans s JOIN files f ON f.id = s.file_id
             WHERE NOT EXISTS (SELECT 1 FROM enrichments e WHERE e.span_hash = s.span_hash)
               AND f.mtime <= ?1
             ORDER BY f.mtime DESC, f.path ASC, s.start_line ASC
             LIMIT ?2",
            span_columns_qualified()
        ))?;
        let rows = stmt.query_map(params![cutoff, (limit * 2) as i64], |row| {
            let span = row_to_span(row)?;
            Ok(PendingSpan {
                file_id: row.get(1)?,
                file_path: row.get(9)?,
                file_mtime: row.get(10)?,
                span,
            })
        })?;

        // Identical spans in multiple files enrich once.
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for row in rows {
            let pending = row?;
            if seen.insert(pending.span.span_hash.clone()) {
                out.push(pending);
                if out.len() >= limit {
                    break;
                }
            }
        }
        Ok(out)
    }

    /// Enrichment rows whose span no longer exists.
    pub fn orphan_enrichments(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT e.span_hash FROM enrichments e
             WHERE NOT EXISTS (SELECT 1 FROM spans s WHERE s.span_hash = e.span_hash)
             ORDER BY e.span_hash",
        )?;
        let rows = stmt.query_map([], |r| r.get::<_, String>(0))?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Into::into)
    }

    /// Delete orphan enrichments older than the TTL. Returns the count.
    pub fn reap_orphans(&self, ttl_days: u32) -> Result<u64> {
        let cutoff = (Utc::now() - ChronoDuration::days(ttl_days as i64)).to_rfc3339();
        let conn = self.conn.lock();
        let deleted = conn.execute(
            "DELETE FROM enrichments
             WHERE created_at < ?1
               AND NOT EXISTS (SELECT 1 FROM spans s WHERE s.span_hash = enrichments.span_hash)",
            params![cutoff],
        )?;
        if deleted > 0 {
            bump_write_counter(&conn)?;
            debug!(deleted, "reaped orphan enrichments");
        }
        Ok(deleted as u64)
    }

    // ------------------------------------------------------------------
    // Embeddings
    // ------------------------------------------------------------------

    pub fn put_embedding(&self, embedding: &EmbeddingRecord) -> Result<()> {
        let conn = self.conn.lock();
        insert_embedding(&conn, embedding)?;
        bump_write_counter(&conn)?;
        Ok(())
    }

    /// Spans missing an embedding for `profile`, with the text to embed.
    pub fn pending_embeddings(&self, profile: &str, limit: usize) -> Result<Vec<PendingEmbedding>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT s.span_hash, COALESCE(e.summary, s.content)
             FROM spans s LEFT JOIN enrichments e ON e.span_hash = s.span_hash
             WHERE NOT EXISTS
                 (SELECT 1 FROM embeddings em
                  WHERE em.span_hash = s.span_hash AND em.profile = ?1)
             ORDER BY s.span_hash
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![profile, (limit * 2) as i64], |r| {
            Ok(PendingEmbedding {
                span_hash: r.get(0)?,
                text: r.get(1)?,
            })
        })?;
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for row in rows {
            let pending = row?;
            if seen.insert(pending.span_hash.clone()) {
                out.push(pending);
                if out.len() >= limit {
                    break;
                }
            }
        }
        Ok(out)
    }

    /// Drop a profile's embeddings whose provider or dim no longer match
    /// the configuration. Returns the count removed.
    pub fn invalidate_profile(&self, profile: &str, provider_id: &str, dim: usize) -> Result<u64> {
        let conn = self.conn.lock();
        let deleted = conn.execute(
            "DELETE FROM embeddings WHERE profile = ?1 AND (provider_id != ?2 OR dim != ?3)",
            params![profile, provider_id, dim as i64],
        )?;
        if deleted > 0 {
            bump_write_counter(&conn)?;
            warn!(profile, deleted, "invalidated embeddings after profile change");
        }
        Ok(deleted as u64)
    }

    // ------------------------------------------------------------------
    // Search
    // ------------------------------------------------------------------

    /// Full-text search over span content and symbol names.
    pub fn search_lexical(&self, query: &str, k: usize) -> Result<Vec<LexicalHit>> {
        let Some(fts_query) = fts_query(query) else {
            return Ok(Vec::new());
        };
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT t.span_hash, f.path, bm25(span_fts) AS rank
             FROM span_fts t JOIN files f ON f.id = t.file_id
             WHERE span_fts MATCH ?1
             ORDER BY rank
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![fts_query, (k * 2) as i64], |r| {
            Ok(LexicalHit {
                span_hash: r.get(0)?,
                file_path: r.get(1)?,
                // bm25 is smaller-is-better and negative for matches.
                score: -r.get::<_, f64>(2)? as f32,
            })
        })?;
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for row in rows {
            let hit = row?;
            if seen.insert(hit.span_hash.clone()) {
                out.push(hit);
                if out.len() >= k {
                    break;
                }
            }
        }
        Ok(out)
    }

    /// Brute-force k-NN over a profile's vectors, optionally narrowed to
    /// a lexical prefilter of at most [`VECTOR_PREFILTER_CAP`] hashes.
    pub fn search_vector(
        &self,
        profile: &str,
        query: &[f32],
        k: usize,
        prefilter: Option<&[String]>,
    ) -> Result<Vec<VectorHit>> {
        let filter: Option<HashSet<&str>> = prefilter.map(|hashes| {
            hashes
                .iter()
                .take(VECTOR_PREFILTER_CAP)
                .map(String::as_str)
                .collect()
        });

        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT span_hash, vector FROM embeddings WHERE profile = ?1")?;
        let rows = stmt.query_map(params![profile], |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, Vec<u8>>(1)?))
        })?;

        let mut hits = Vec::new();
        for row in rows {
            let (span_hash, blob) = row?;
            if let Some(ref filter) = filter {
                if !filter.contains(span_hash.as_str()) {
                    continue;
                }
            }
            let vector = blob_to_vec(&blob);
            let score = cosine(query, &vector);
            hits.push(VectorHit { span_hash, score });
        }
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(k);
        Ok(hits)
    }

    // ------------------------------------------------------------------
    // Graph
    // ------------------------------------------------------------------

    pub fn upsert_entity(&self, entity: &Entity) -> Result<()> {
        let conn = self.conn.lock();
        insert_entity(&conn, entity)?;
        bump_write_counter(&conn)?;
        Ok(())
    }

    /// Insert relations, validating both endpoints against the entities
    /// table. Unknown endpoints are rejected.
    pub fn put_relations(&self, relations: &[crate::types::Relation]) -> Result<usize> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let mut inserted = 0;
        {
            let mut exists_stmt = tx.prepare("SELECT 1 FROM entities WHERE id = ?1")?;
            let mut insert_stmt = tx.prepare(
                "INSERT OR IGNORE INTO relations (src_id, edge_type, dst_id) VALUES (?1, ?2, ?3)",
            )?;
            for relation in relations {
                for endpoint in [&relation.src_id, &relation.dst_id] {
                    let found: Option<i64> = exists_stmt
                        .query_row(params![endpoint], |r| r.get(0))
                        .optional()?;
                    if found.is_none() {
                        return Err(CoreError::UnknownEndpoint {
                            id: endpoint.clone(),
                        });
                    }
                }
                inserted += insert_stmt.execute(params![
                    relation.src_id,
                    relation.edge_type.as_str(),
                    relation.dst_id
                ])?;
            }
        }
        if inserted > 0 {
            bump_write_counter(&tx)?;
        }
        tx.commit()?;
        Ok(inserted)
    }

    /// Replace the whole graph in one transaction (full rebuild path).
    pub fn replace_graph(
        &self,
        entities: &[Entity],
        relations: &[crate::types::Relation],
    ) -> Result<()> {
        let ids: HashSet<&str> = entities.iter().map(|e| e.id.as_str()).collect();
        for relation in relations {
            for endpoint in [&relation.src_id, &relation.dst_id] {
                if !ids.contains(endpoint.as_str()) {
                    return Err(CoreError::UnknownEndpoint {
                        id: endpoint.clone(),
                    });
                }
            }
        }

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM relations", [])?;
        tx.execute("DELETE FROM entities", [])?;
        for entity in entities {
            insert_entity(&tx, entity)?;
        }
        for relation in relations {
            tx.execute(
                "INSERT OR IGNORE INTO relations (src_id, edge_type, dst_id) VALUES (?1, ?2, ?3)",
                params![
                    relation.src_id,
                    relation.edge_type.as_str(),
                    relation.dst_id
                ],
            )?;
        }
        bump_write_counter(&tx)?;
        tx.commit()?;
        Ok(())
    }

    /// Load the whole graph for in-memory traversal.
    pub fn load_graph(&self) -> Result<(Vec<Entity>, Vec<crate::types::Relation>)> {
        let conn = self.conn.lock();
        let mut entities = Vec::new();
        {
            let mut stmt =
                conn.prepare("SELECT id, kind, path_ref, metadata_json FROM entities")?;
            let rows = stmt.query_map([], row_to_entity)?;
            for row in rows {
                entities.push(row?);
            }
        }
        let mut relations = Vec::new();
        {
            let mut stmt = conn.prepare("SELECT src_id, edge_type, dst_id FROM relations")?;
            let rows = stmt.query_map([], |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                ))
            })?;
            for row in rows {
                let (src_id, edge, dst_id) = row?;
                if let Some(edge_type) = EdgeType::parse(&edge) {
                    relations.push(crate::types::Relation {
                        src_id,
                        edge_type,
                        dst_id,
                    });
                }
            }
        }
        Ok((entities, relations))
    }

    /// Bounded graph traversal from an entity.
    pub fn neighbors(
        &self,
        entity_id: &str,
        hops: u32,
        direction: TraversalDirection,
        edge_filter: Option<EdgeType>,
    ) -> Result<Vec<TraversalHit>> {
        let (entities, relations) = self.load_graph()?;
        let graph = EntityGraph::from_rows(entities, &relations);
        Ok(graph.neighbors(entity_id, hops, direction, edge_filter))
    }

    // ------------------------------------------------------------------
    // Failures
    // ------------------------------------------------------------------

    /// Record a failure for `(span, tier)`, bumping the attempt count.
    pub fn record_failure(
        &self,
        span_hash: &str,
        tier: &str,
        reason: &str,
        cooldown_until: Option<&str>,
    ) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO failures (span_hash, tier, reason, attempts, last_seen_at, cooldown_until)
             VALUES (?1, ?2, ?3, 1, ?4, ?5)
             ON CONFLICT(span_hash, tier) DO UPDATE SET
                 reason = excluded.reason,
                 attempts = failures.attempts + 1,
                 last_seen_at = excluded.last_seen_at,
                 cooldown_until = excluded.cooldown_until",
            params![span_hash, tier, reason, now_rfc3339(), cooldown_until],
        )?;
        bump_write_counter(&conn)?;
        Ok(())
    }

    pub fn failures_for(&self, span_hash: &str) -> Result<Vec<FailureRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT span_hash, tier, reason, attempts, cooldown_until, last_seen_at
             FROM failures WHERE span_hash = ?1",
        )?;
        let rows = stmt.query_map(params![span_hash], |r| {
            Ok(FailureRecord {
                span_hash: r.get(0)?,
                tier: r.get(1)?,
                reason: r.get(2)?,
                attempts: r.get::<_, i64>(3)? as u32,
                cooldown_until: r.get(4)?,
                last_seen_at: r.get(5)?,
            })
        })?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Into::into)
    }

    pub fn clear_failures(&self, span_hash: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM failures WHERE span_hash = ?1", params![span_hash])?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Status, stats, health
    // ------------------------------------------------------------------

    pub fn index_status(&self) -> Result<IndexStatus> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT repo_path, state, last_indexed_at, last_indexed_commit, schema_version, last_error
             FROM index_status WHERE id = 1",
            [],
            |r| {
                Ok(IndexStatus {
                    repo_path: r.get(0)?,
                    state: IndexState::parse(&r.get::<_, String>(1)?)
                        .unwrap_or(IndexState::Error),
                    last_indexed_at: r.get(2)?,
                    last_indexed_commit: r.get(3)?,
                    schema_version: r.get(4)?,
                    last_error: r.get(5)?,
                })
            },
        )
        .map_err(Into::into)
    }

    /// Atomic state transition; readers observe only full rows.
    pub fn set_state(&self, state: IndexState, last_error: Option<&str>) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE index_status SET state = ?1, last_error = ?2 WHERE id = 1",
            params![state.as_str(), last_error],
        )?;
        Ok(())
    }

    /// Mark a completed sync with its commit anchor.
    pub fn mark_synced(&self, commit: Option<&str>) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE index_status
             SET state = 'ready', last_indexed_at = ?1, last_indexed_commit = ?2, last_error = NULL
             WHERE id = 1",
            params![now_rfc3339(), commit],
        )?;
        Ok(())
    }

    pub fn stats(&self) -> Result<IndexStats> {
        let conn = self.conn.lock();
        let files: i64 = conn.query_row("SELECT COUNT(*) FROM files", [], |r| r.get(0))?;
        let spans: i64 =
            conn.query_row("SELECT COUNT(DISTINCT span_hash) FROM spans", [], |r| r.get(0))?;
        let enrichments: i64 =
            conn.query_row("SELECT COUNT(*) FROM enrichments", [], |r| r.get(0))?;
        let entities: i64 = conn.query_row("SELECT COUNT(*) FROM entities", [], |r| r.get(0))?;
        let relations: i64 = conn.query_row("SELECT COUNT(*) FROM relations", [], |r| r.get(0))?;

        let mut embeddings = std::collections::BTreeMap::new();
        {
            let mut stmt =
                conn.prepare("SELECT profile, COUNT(*) FROM embeddings GROUP BY profile")?;
            let rows = stmt.query_map([], |r| {
                Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)? as u64))
            })?;
            for row in rows {
                let (profile, count) = row?;
                embeddings.insert(profile, count);
            }
        }

        let pending_enrichments: i64 = conn.query_row(
            "SELECT COUNT(DISTINCT s.span_hash) FROM spans s
             WHERE NOT EXISTS (SELECT 1 FROM enrichments e WHERE e.span_hash = s.span_hash)",
            [],
            |r| r.get(0),
        )?;
        let orphan_enrichments: i64 = conn.query_row(
            "SELECT COUNT(*) FROM enrichments e
             WHERE NOT EXISTS (SELECT 1 FROM spans s WHERE s.span_hash = e.span_hash)",
            [],
            |r| r.get(0),
        )?;
        // Pending embeddings across all profiles that already have rows;
        // with no profile rows yet this reads zero and the embedder's gap
        // fill drives the real number.
        let pending_embeddings: i64 = conn.query_row(
            "SELECT COALESCE(SUM(missing), 0) FROM (
                 SELECT (SELECT COUNT(DISTINCT span_hash) FROM spans) - COUNT(DISTINCT span_hash) AS missing
                 FROM embeddings GROUP BY profile
             )",
            [],
            |r| r.get(0),
        )?;

        Ok(IndexStats {
            files: files as u64,
            spans: spans as u64,
            enrichments: enrichments as u64,
            embeddings,
            entities: entities as u64,
            relations: relations as u64,
            pending_enrichments: pending_enrichments as u64,
            pending_embeddings: pending_embeddings.max(0) as u64,
            orphan_enrichments: orphan_enrichments as u64,
        })
    }

    pub fn health(&self) -> Result<HealthReport> {
        let status = self.index_status()?;
        let stats = self.stats()?;

        let mut issues = Vec::new();
        if stats.orphan_enrichments > 0 {
            issues.push(format!(
                "{} orphan enrichments pending reconciliation",
                stats.orphan_enrichments
            ));
        }
        if let Some(ref error) = status.last_error {
            issues.push(format!("last error: {error}"));
        }

        let conn = self.conn.lock();
        let mut top_pending_files = Vec::new();
        {
            let mut stmt = conn.prepare(
                "SELECT f.path, COUNT(*) AS pending
                 FROM spans s JOIN files f ON f.id = s.file_id
                 WHERE NOT EXISTS (SELECT 1 FROM enrichments e WHERE e.span_hash = s.span_hash)
                 GROUP BY f.id ORDER BY pending DESC, f.path ASC LIMIT 5",
            )?;
            let rows = stmt.query_map([], |r| r.get::<_, String>(0))?;
            for row in rows {
                top_pending_files.push(row?);
            }
        }

        Ok(HealthReport {
            status: status.state,
            issues,
            top_pending_files,
            orphan_enrichments: stats.orphan_enrichments,
        })
    }

    /// Monotonic count of committed write transactions, for idempotence
    /// checks ("re-sync with no changes performs zero writes").
    pub fn write_counter(&self) -> Result<i64> {
        let conn = self.conn.lock();
        let value: Option<String> = conn
            .query_row(
                "SELECT value FROM meta WHERE key = 'write_counter'",
                [],
                |r| r.get(0),
            )
            .optional()?;
        Ok(value.and_then(|v| v.parse().ok()).unwrap_or(0))
    }

    /// Run queued batch operations in one transaction.
    pub(crate) fn apply_batch(&self, ops: &[WriteOp]) -> Result<()> {
        if ops.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        for op in ops {
            match op {
                WriteOp::Enrichment(enrichment) => insert_enrichment(&tx, enrichment)?,
                WriteOp::Embedding(embedding) => insert_embedding(&tx, embedding)?,
                WriteOp::Failure {
                    span_hash,
                    tier,
                    reason,
                    cooldown_until,
                } => {
                    tx.execute(
                        "INSERT INTO failures (span_hash, tier, reason, attempts, last_seen_at, cooldown_until)
                         VALUES (?1, ?2, ?3, 1, ?4, ?5)
                         ON CONFLICT(span_hash, tier) DO UPDATE SET
                             reason = excluded.reason,
                             attempts = failures.attempts + 1,
                             last_seen_at = excluded.last_seen_at,
                             cooldown_until = excluded.cooldown_until",
                        params![span_hash, tier, reason, now_rfc3339(), cooldown_until],
                    )?;
                }
                WriteOp::ClearFailures { span_hash } => {
                    tx.execute("DELETE FROM failures WHERE span_hash = ?1", params![span_hash])?;
                }
            }
        }
        bump_write_counter(&tx)?;
        tx.commit()?;
        Ok(())
    }

    /// Start a batched write session with the default limits.
    pub fn begin_batch(&self) -> BatchWriter<'_> {
        BatchWriter::new(self)
    }
}

// ============================================================================
// Row mapping and helpers
// ============================================================================

fn span_columns_qualified() -> String {
    schema::SPAN_COLUMNS
        .split(", ")
        .map(|c| format!("s.{c}"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn row_to_span(row: &rusqlite::Row<'_>) -> rusqlite::Result<Span> {
    Ok(Span {
        span_hash: row.get(0)?,
        kind: SpanKind::parse(&row.get::<_, String>(2)?).unwrap_or(SpanKind::Block),
        symbol_name: row.get(3)?,
        start_line: row.get::<_, i64>(4)? as u32,
        end_line: row.get::<_, i64>(5)? as u32,
        content: row.get(6)?,
        content_type: row.get(7)?,
        content_language: row.get(8)?,
    })
}

fn row_to_span_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SpanRow> {
    let span = row_to_span(row)?;
    Ok(SpanRow {
        file_id: row.get(1)?,
        file_path: row.get(9)?,
        span,
    })
}

fn row_to_enrichment(row: &rusqlite::Row<'_>) -> rusqlite::Result<Enrichment> {
    let parse_list = |text: String| -> Vec<String> {
        serde_json::from_str(&text).unwrap_or_default()
    };
    let evidence: Vec<EvidenceRange> =
        serde_json::from_str(&row.get::<_, String>(7)?).unwrap_or_default();
    Ok(Enrichment {
        span_hash: row.get(0)?,
        summary: row.get(1)?,
        inputs: parse_list(row.get(2)?),
        outputs: parse_list(row.get(3)?),
        side_effects: parse_list(row.get(4)?),
        pitfalls: parse_list(row.get(5)?),
        usage_snippet: row.get(6)?,
        evidence,
        model_id: row.get(8)?,
        created_at: row.get(9)?,
    })
}

fn row_to_entity(row: &rusqlite::Row<'_>) -> rusqlite::Result<Entity> {
    let metadata: EntityMetadata =
        serde_json::from_str(&row.get::<_, String>(3)?).unwrap_or_default();
    Ok(Entity {
        id: row.get(0)?,
        kind: EntityKind::parse(&row.get::<_, String>(1)?).unwrap_or(EntityKind::Module),
        path_ref: row.get(2)?,
        metadata,
    })
}

fn insert_enrichment(conn: &Connection, enrichment: &Enrichment) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO enrichments
             (span_hash, summary, inputs_json, outputs_json, side_effects_json,
              pitfalls_json, usage_snippet, evidence_json, model_id, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            enrichment.span_hash,
            enrichment.summary,
            serde_json::to_string(&enrichment.inputs)?,
            serde_json::to_string(&enrichment.outputs)?,
            serde_json::to_string(&enrichment.side_effects)?,
            serde_json::to_string(&enrichment.pitfalls)?,
            enrichment.usage_snippet,
            serde_json::to_string(&enrichment.evidence)?,
            enrichment.model_id,
            enrichment.created_at
        ],
    )?;
    Ok(())
}

fn insert_embedding(conn: &Connection, embedding: &EmbeddingRecord) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO embeddings
             (span_hash, profile, vector, dim, provider_id, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            embedding.span_hash,
            embedding.profile,
            vec_to_blob(&embedding.vector),
            embedding.dim as i64,
            embedding.provider_id,
            embedding.created_at
        ],
    )?;
    Ok(())
}

fn insert_entity(conn: &Connection, entity: &Entity) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO entities (id, kind, path_ref, metadata_json)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            entity.id,
            entity.kind.as_str(),
            entity.path_ref,
            serde_json::to_string(&entity.metadata)?
        ],
    )?;
    Ok(())
}

fn bump_write_counter(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO meta (key, value) VALUES ('write_counter', '1')
         ON CONFLICT(key) DO UPDATE SET value = CAST(CAST(value AS INTEGER) + 1 AS TEXT)",
        [],
    )?;
    Ok(())
}

fn read_schema_version(conn: &Connection) -> Result<i64> {
    let value: Option<String> = conn
        .query_row(
            "SELECT value FROM meta WHERE key = 'schema_version'",
            [],
            |r| r.get(0),
        )
        .optional()?;
    Ok(value.and_then(|v| v.parse().ok()).unwrap_or(0))
}

pub(crate) fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}

/// Build an FTS5 OR-query from free text; `None` when no tokens survive.
fn fts_query(query: &str) -> Option<String> {
    let tokens: Vec<String> = query
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{t}\""))
        .collect();
    if tokens.is_empty() {
        None
    } else {
        Some(tokens.join(" OR "))
    }
}

/// Encode a vector as little-endian f32 bytes, bit-exact.
pub fn vec_to_blob(vector: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(vector.len() * 4);
    for value in vector {
        blob.extend_from_slice(&value.to_le_bytes());
    }
    blob
}

/// Decode little-endian f32 bytes back into a vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity; zero when either vector is empty or zero-normed.
pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Relation;

    fn test_span(hash_seed: &str, start: u32) -> Span {
        let content = format!("def {hash_seed}():\n    return 1");
        Span {
            span_hash: crate::extract::span_hash("code", "python", &content),
            kind: SpanKind::Function,
            symbol_name: Some(hash_seed.to_string()),
            start_line: start,
            end_line: start + 1,
            content,
            content_type: "code".to_string(),
            content_language: "python".to_string(),
        }
    }

    fn test_enrichment(span_hash: &str) -> Enrichment {
        Enrichment {
            span_hash: span_hash.to_string(),
            summary: "Returns one.".to_string(),
            inputs: vec![],
            outputs: vec!["int".to_string()],
            side_effects: vec![],
            pitfalls: vec![],
            usage_snippet: None,
            evidence: vec![EvidenceRange {
                start_line: 1,
                end_line: 2,
            }],
            model_id: "test-model".to_string(),
            created_at: now_rfc3339(),
        }
    }

    #[test]
    fn test_upsert_file_counts() {
        let store = IndexStore::open_in_memory("/repo").unwrap();
        let (_, created) = store.upsert_file("a.py", "h1", 100, "python", 10).unwrap();
        assert!(created);
        assert_eq!(store.stats().unwrap().files, 1);

        let (_, created) = store.upsert_file("a.py", "h2", 101, "python", 11).unwrap();
        assert!(!created);
        assert_eq!(store.stats().unwrap().files, 1);
    }

    #[test]
    fn test_replace_spans_diff() {
        let store = IndexStore::open_in_memory("/repo").unwrap();
        let (file_id, _) = store.upsert_file("a.py", "h1", 100, "python", 10).unwrap();

        let a = test_span("alpha", 1);
        let b = test_span("beta", 5);
        let diff = store
            .replace_spans_for_file(file_id, &[a.clone(), b.clone()])
            .unwrap();
        assert_eq!(diff.inserted, 2);

        // Replace beta with gamma; alpha survives.
        let c = test_span("gamma", 5);
        let diff = store
            .replace_spans_for_file(file_id, &[a.clone(), c])
            .unwrap();
        assert_eq!(diff.inserted, 1);
        assert_eq!(diff.removed, 1);
        assert_eq!(diff.kept, 1);
    }

    #[test]
    fn test_replace_spans_no_change_no_write() {
        let store = IndexStore::open_in_memory("/repo").unwrap();
        let (file_id, _) = store.upsert_file("a.py", "h1", 100, "python", 10).unwrap();
        let span = test_span("alpha", 1);
        store.replace_spans_for_file(file_id, &[span.clone()]).unwrap();

        let before = store.write_counter().unwrap();
        store.replace_spans_for_file(file_id, &[span]).unwrap();
        assert_eq!(store.write_counter().unwrap(), before);
    }

    #[test]
    fn test_file_delete_cascades_spans_keeps_orphans() {
        let store = IndexStore::open_in_memory("/repo").unwrap();
        let (file_id, _) = store.upsert_file("a.py", "h1", 100, "python", 10).unwrap();
        let span = test_span("alpha", 1);
        store.replace_spans_for_file(file_id, &[span.clone()]).unwrap();
        store.put_enrichment(&test_enrichment(&span.span_hash)).unwrap();

        assert!(store.delete_file("a.py").unwrap());
        let stats = store.stats().unwrap();
        assert_eq!(stats.spans, 0);
        assert_eq!(stats.enrichments, 1);
        assert_eq!(stats.orphan_enrichments, 1);
        assert_eq!(store.orphan_enrichments().unwrap().len(), 1);
    }

    #[test]
    fn test_pending_enrichments_order_and_dedupe() {
        let store = IndexStore::open_in_memory("/repo").unwrap();
        let (old_file, _) = store.upsert_file("old.py", "h1", 100, "python", 10).unwrap();
        let (new_file, _) = store.upsert_file("new.py", "h2", 200, "python", 10).unwrap();

        let shared = test_span("shared", 1);
        store.replace_spans_for_file(old_file, &[shared.clone()]).unwrap();
        store
            .replace_spans_for_file(new_file, &[shared.clone(), test_span("fresh", 10)])
            .unwrap();

        let pending = store.pending_enrichments(10, 0).unwrap();
        // Shared span appears once; newest file first.
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].file_path, "new.py");
        assert!(pending.iter().filter(|p| p.span.span_hash == shared.span_hash).count() == 1);
    }

    #[test]
    fn test_cooldown_excludes_recent_files() {
        let store = IndexStore::open_in_memory("/repo").unwrap();
        let now = Utc::now().timestamp();
        let (file_id, _) = store.upsert_file("hot.py", "h1", now, "python", 10).unwrap();
        store.replace_spans_for_file(file_id, &[test_span("hot", 1)]).unwrap();

        assert!(store.pending_enrichments(10, 600).unwrap().is_empty());
        assert_eq!(store.pending_enrichments(10, 0).unwrap().len(), 1);
    }

    #[test]
    fn test_embedding_round_trip_bit_exact() {
        let store = IndexStore::open_in_memory("/repo").unwrap();
        let (file_id, _) = store.upsert_file("a.py", "h1", 100, "python", 10).unwrap();
        let span = test_span("alpha", 1);
        store.replace_spans_for_file(file_id, &[span.clone()]).unwrap();

        let vector = vec![0.25f32, -1.5, 3.0e-7, f32::MIN_POSITIVE];
        store
            .put_embedding(&EmbeddingRecord {
                span_hash: span.span_hash.clone(),
                profile: "code".to_string(),
                vector: vector.clone(),
                dim: 4,
                provider_id: "test".to_string(),
                created_at: now_rfc3339(),
            })
            .unwrap();

        let hits = store.search_vector("code", &vector, 1, None).unwrap();
        assert_eq!(hits.len(), 1);
        assert!((hits[0].score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_embedding_unique_per_profile() {
        let store = IndexStore::open_in_memory("/repo").unwrap();
        let record = EmbeddingRecord {
            span_hash: "h".to_string(),
            profile: "code".to_string(),
            vector: vec![1.0],
            dim: 1,
            provider_id: "p".to_string(),
            created_at: now_rfc3339(),
        };
        store.put_embedding(&record).unwrap();
        store.put_embedding(&record).unwrap();
        let conn_count: u64 = store.stats().unwrap().embeddings["code"];
        assert_eq!(conn_count, 1);
    }

    #[test]
    fn test_profile_invalidation() {
        let store = IndexStore::open_in_memory("/repo").unwrap();
        store
            .put_embedding(&EmbeddingRecord {
                span_hash: "h".to_string(),
                profile: "code".to_string(),
                vector: vec![1.0],
                dim: 1,
                provider_id: "old-provider".to_string(),
                created_at: now_rfc3339(),
            })
            .unwrap();
        let removed = store.invalidate_profile("code", "new-provider", 1).unwrap();
        assert_eq!(removed, 1);
    }

    #[test]
    fn test_lexical_search() {
        let store = IndexStore::open_in_memory("/repo").unwrap();
        let (file_id, _) = store.upsert_file("auth.py", "h1", 100, "python", 10).unwrap();
        let span = Span {
            content: "def login():\n    authenticate_user()".to_string(),
            ..test_span("login", 1)
        };
        let span = Span {
            span_hash: crate::extract::span_hash("code", "python", &span.content),
            ..span
        };
        store.replace_spans_for_file(file_id, &[span]).unwrap();

        let hits = store.search_lexical("authenticate user login", 5).unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].score > 0.0);
        assert!(store.search_lexical("zzz_missing", 5).unwrap().is_empty());
        assert!(store.search_lexical("!!!", 5).unwrap().is_empty());
    }

    #[test]
    fn test_relations_validate_endpoints() {
        let store = IndexStore::open_in_memory("/repo").unwrap();
        store
            .upsert_entity(&Entity {
                id: "sym:a.f".to_string(),
                kind: EntityKind::Function,
                path_ref: Some("a.py".to_string()),
                metadata: EntityMetadata::default(),
            })
            .unwrap();

        let bad = Relation {
            src_id: "sym:a.f".to_string(),
            edge_type: EdgeType::Calls,
            dst_id: "sym:missing".to_string(),
        };
        assert!(matches!(
            store.put_relations(&[bad]),
            Err(CoreError::UnknownEndpoint { .. })
        ));
    }

    #[test]
    fn test_neighbors_traversal() {
        let store = IndexStore::open_in_memory("/repo").unwrap();
        for id in ["sym:a.f", "sym:b.g"] {
            store
                .upsert_entity(&Entity {
                    id: id.to_string(),
                    kind: EntityKind::Function,
                    path_ref: Some("a.py".to_string()),
                    metadata: EntityMetadata::default(),
                })
                .unwrap();
        }
        store
            .put_relations(&[Relation {
                src_id: "sym:a.f".to_string(),
                edge_type: EdgeType::Calls,
                dst_id: "sym:b.g".to_string(),
            }])
            .unwrap();

        let hits = store
            .neighbors(
                "sym:b.g",
                2,
                crate::graph::TraversalDirection::Upstream,
                Some(EdgeType::Calls),
            )
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].entity.id, "sym:a.f");
    }

    #[test]
    fn test_migration_sets_version() {
        let store = IndexStore::open_in_memory("/repo").unwrap();
        let status = store.index_status().unwrap();
        assert_eq!(status.schema_version, CURRENT_SCHEMA_VERSION);
        assert_eq!(status.state, IndexState::Empty);
    }

    #[test]
    fn test_reopen_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let db = tmp.path().join("index.db");
        {
            let store = IndexStore::open(&db, "/repo").unwrap();
            store.upsert_file("a.py", "h1", 100, "python", 10).unwrap();
        }
        let store = IndexStore::open(&db, "/repo").unwrap();
        assert_eq!(store.stats().unwrap().files, 1);
        assert_eq!(store.index_status().unwrap().schema_version, CURRENT_SCHEMA_VERSION);
    }

    #[test]
    fn test_blob_round_trip() {
        let vector = vec![1.0f32, -2.5, 0.0, 7.25];
        assert_eq!(blob_to_vec(&vec_to_blob(&vector)), vector);
    }

    #[test]
    fn test_orphan_reap_respects_ttl() {
        let store = IndexStore::open_in_memory("/repo").unwrap();
        let mut enrichment = test_enrichment("gone");
        enrichment.created_at = (Utc::now() - ChronoDuration::days(10)).to_rfc3339();
        store.put_enrichment(&enrichment).unwrap();

        let mut fresh = test_enrichment("also-gone");
        fresh.created_at = now_rfc3339();
        store.put_enrichment(&fresh).unwrap();

        assert_eq!(store.reap_orphans(7).unwrap(), 1);
        assert_eq!(store.stats().unwrap().orphan_enrichments, 1);
    }
}
