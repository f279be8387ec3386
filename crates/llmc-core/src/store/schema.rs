//! SQLite schema definitions and forward migrations for the index store.
//!
//! The store is a single file under `<repo>/.llmc/index.db` holding
//! files, spans, enrichments, embeddings, the entity/relation graph,
//! failure records, and the per-repo index status. A contentful FTS5
//! table powers lexical search; vectors live as little-endian f32 blobs.
//!
//! Migrations run forward in order inside one transaction each; a failed
//! migration rolls back and leaves the store untouched.

/// Schema version the code expects on disk.
pub const CURRENT_SCHEMA_VERSION: i64 = 2;

/// Bootstrap table holding schema version, write counter, and markers.
/// Created unconditionally before migrations run.
pub const SCHEMA_CREATE_META: &str = r#"
CREATE TABLE IF NOT EXISTS meta (
    key TEXT PRIMARY KEY NOT NULL,
    value TEXT NOT NULL
)
"#;

/// Version 1: the full base schema.
const SCHEMA_V1: &str = r#"
CREATE TABLE IF NOT EXISTS files (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    path TEXT NOT NULL UNIQUE,
    content_hash TEXT NOT NULL,
    mtime INTEGER NOT NULL,
    language TEXT NOT NULL,
    size INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS spans (
    span_hash TEXT NOT NULL,
    file_id INTEGER NOT NULL REFERENCES files(id) ON DELETE CASCADE,
    kind TEXT NOT NULL,
    symbol_name TEXT,
    start_line INTEGER NOT NULL,
    end_line INTEGER NOT NULL,
    content TEXT NOT NULL,
    content_type TEXT NOT NULL,
    content_language TEXT NOT NULL,
    PRIMARY KEY (file_id, span_hash)
);

CREATE INDEX IF NOT EXISTS idx_spans_hash ON spans(span_hash);
CREATE INDEX IF NOT EXISTS idx_spans_file ON spans(file_id);

-- No foreign key to spans: an enrichment legally outlives its span as an
-- orphan until reconnected or reaped.
CREATE TABLE IF NOT EXISTS enrichments (
    span_hash TEXT PRIMARY KEY NOT NULL,
    summary TEXT NOT NULL,
    inputs_json TEXT NOT NULL,
    outputs_json TEXT NOT NULL,
    side_effects_json TEXT NOT NULL,
    pitfalls_json TEXT NOT NULL,
    usage_snippet TEXT,
    evidence_json TEXT NOT NULL,
    model_id TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS embeddings (
    span_hash TEXT NOT NULL,
    profile TEXT NOT NULL,
    vector BLOB NOT NULL,
    dim INTEGER NOT NULL,
    provider_id TEXT NOT NULL,
    created_at TEXT NOT NULL,
    PRIMARY KEY (span_hash, profile)
);

CREATE INDEX IF NOT EXISTS idx_embeddings_profile ON embeddings(profile);

CREATE TABLE IF NOT EXISTS entities (
    id TEXT PRIMARY KEY NOT NULL,
    kind TEXT NOT NULL,
    path_ref TEXT,
    metadata_json TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS relations (
    src_id TEXT NOT NULL,
    edge_type TEXT NOT NULL,
    dst_id TEXT NOT NULL,
    PRIMARY KEY (src_id, edge_type, dst_id)
);

CREATE INDEX IF NOT EXISTS idx_relations_dst ON relations(dst_id, edge_type);

CREATE TABLE IF NOT EXISTS failures (
    span_hash TEXT NOT NULL,
    tier TEXT NOT NULL,
    reason TEXT NOT NULL,
    attempts INTEGER NOT NULL DEFAULT 0,
    last_seen_at TEXT NOT NULL,
    PRIMARY KEY (span_hash, tier)
);

CREATE TABLE IF NOT EXISTS index_status (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    repo_path TEXT NOT NULL,
    state TEXT NOT NULL,
    last_indexed_at TEXT,
    last_indexed_commit TEXT,
    schema_version INTEGER NOT NULL,
    last_error TEXT
);

CREATE VIRTUAL TABLE IF NOT EXISTS span_fts USING fts5(
    span_hash UNINDEXED,
    file_id UNINDEXED,
    symbol_name,
    content
);
"#;

/// Version 2: per-tier cooldowns on failure records.
const MIGRATION_V2: &str = r#"
ALTER TABLE failures ADD COLUMN cooldown_until TEXT;
"#;

/// Forward migrations in order. Each entry is `(target_version, sql)`.
pub const MIGRATIONS: &[(i64, &str)] = &[(1, SCHEMA_V1), (2, MIGRATION_V2)];

/// Column list for span row mapping.
pub const SPAN_COLUMNS: &str =
    "span_hash, file_id, kind, symbol_name, start_line, end_line, content, content_type, content_language";

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn test_migrations_apply_in_order() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(SCHEMA_CREATE_META).unwrap();
        for (_, sql) in MIGRATIONS {
            conn.execute_batch(sql).unwrap();
        }

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();

        for expected in [
            "files",
            "spans",
            "enrichments",
            "embeddings",
            "entities",
            "relations",
            "failures",
            "index_status",
            "meta",
        ] {
            assert!(tables.contains(&expected.to_string()), "missing {expected}");
        }
    }

    #[test]
    fn test_v2_adds_cooldown_column() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(SCHEMA_CREATE_META).unwrap();
        for (_, sql) in MIGRATIONS {
            conn.execute_batch(sql).unwrap();
        }
        // Insert exercises the migrated column.
        conn.execute(
            "INSERT INTO failures (span_hash, tier, reason, attempts, last_seen_at, cooldown_until)
             VALUES ('h', 'local', 'timeout', 1, '2026-01-01T00:00:00Z', NULL)",
            [],
        )
        .unwrap();
    }

    #[test]
    fn test_fts_table_usable() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(SCHEMA_CREATE_META).unwrap();
        for (_, sql) in MIGRATIONS {
            conn.execute_batch(sql).unwrap();
        }
        conn.execute(
            "INSERT INTO span_fts (span_hash, file_id, symbol_name, content) VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params!["h1", 1, "login", "def login(): authenticate user"],
        )
        .unwrap();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM span_fts WHERE span_fts MATCH 'authenticate'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }
}
