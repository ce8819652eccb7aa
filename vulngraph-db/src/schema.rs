use crate::error::DbError;

const SCHEMA_SQL: &str = r#"
-- Named values shared between pipeline stages
CREATE TABLE IF NOT EXISTS job_data (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

-- Graph entities in insertion order
CREATE TABLE IF NOT EXISTS entities (
    seq         INTEGER PRIMARY KEY AUTOINCREMENT,
    key         TEXT NOT NULL UNIQUE,
    entity_type TEXT NOT NULL,
    body        TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_entities_type ON entities(entity_type);

-- Direct and mapped relationships in insertion order
CREATE TABLE IF NOT EXISTS relationships (
    seq               INTEGER PRIMARY KEY AUTOINCREMENT,
    key               TEXT NOT NULL UNIQUE,
    relationship_type TEXT NOT NULL,
    body              TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_relationships_type ON relationships(relationship_type);
"#;

pub fn initialize(conn: &rusqlite::Connection) -> Result<(), DbError> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}
