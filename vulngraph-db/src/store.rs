use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension, params};
use serde_json::Value;
use tracing::debug;
use vulngraph_types::{Entity, Relationship};

use crate::error::DbError;
use crate::schema;
use crate::state::{JobState, check_new_keys};

/// `~/.vulngraph/jobstate.db`, or `%APPDATA%\vulngraph\jobstate.db` on Windows.
pub fn default_db_path() -> PathBuf {
    if cfg!(windows) {
        let appdata = std::env::var("APPDATA").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(appdata).join("vulngraph").join("jobstate.db")
    } else {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home).join(".vulngraph").join("jobstate.db")
    }
}

/// Job state persisted to SQLite, so a finished run can be exported later.
pub struct SqliteJobState {
    conn: Mutex<Connection>,
}

impl SqliteJobState {
    /// Open (or create) the database at `path`.
    pub fn open(path: &Path) -> Result<Self, DbError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                DbError::Other(format!(
                    "failed to create db directory {}: {e}",
                    parent.display()
                ))
            })?;
        }
        let conn = Connection::open(path)?;
        schema::initialize(&conn)?;
        debug!(path = %path.display(), "job state database opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self, DbError> {
        let conn = Connection::open_in_memory()?;
        schema::initialize(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Drop everything left by a previous run.
    pub fn clear(&self) -> Result<(), DbError> {
        self.lock()?.execute_batch(
            "DELETE FROM job_data; DELETE FROM entities; DELETE FROM relationships;",
        )?;
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, DbError> {
        self.conn.lock().map_err(|_| DbError::Poisoned)
    }
}

fn key_exists(conn: &Connection, key: &str) -> Result<bool, DbError> {
    let found: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM entities WHERE key = ?1)
             OR EXISTS(SELECT 1 FROM relationships WHERE key = ?1)",
        params![key],
        |row| row.get(0),
    )?;
    Ok(found)
}

fn decode_rows<T: serde::de::DeserializeOwned>(
    conn: &Connection,
    sql: &str,
    args: impl rusqlite::Params,
) -> Result<Vec<T>, DbError> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(args, |row| row.get::<_, String>(0))?;
    let mut out = Vec::new();
    for body in rows {
        out.push(serde_json::from_str(&body?)?);
    }
    Ok(out)
}

#[async_trait]
impl JobState for SqliteJobState {
    async fn get_data(&self, key: &str) -> Result<Option<Value>, DbError> {
        let conn = self.lock()?;
        let raw: Option<String> = conn
            .query_row(
                "SELECT value FROM job_data WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(match raw {
            Some(text) => Some(serde_json::from_str(&text)?),
            None => None,
        })
    }

    async fn set_data(&self, key: &str, value: Value) -> Result<(), DbError> {
        let text = serde_json::to_string(&value)?;
        self.lock()?.execute(
            "INSERT INTO job_data (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = ?2",
            params![key, text],
        )?;
        Ok(())
    }

    async fn has_key(&self, key: &str) -> Result<bool, DbError> {
        let conn = self.lock()?;
        key_exists(&conn, key)
    }

    async fn add_entities(&self, entities: Vec<Entity>) -> Result<(), DbError> {
        let conn = self.lock()?;
        check_new_keys(entities.iter().map(|e| e.key.as_str()), |k| {
            key_exists(&conn, k)
        })?;
        let tx = conn.unchecked_transaction()?;
        for entity in &entities {
            tx.execute(
                "INSERT INTO entities (key, entity_type, body) VALUES (?1, ?2, ?3)",
                params![entity.key, entity.entity_type, serde_json::to_string(entity)?],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    async fn add_relationships(&self, relationships: Vec<Relationship>) -> Result<(), DbError> {
        let conn = self.lock()?;
        check_new_keys(relationships.iter().map(Relationship::key), |k| {
            key_exists(&conn, k)
        })?;
        let tx = conn.unchecked_transaction()?;
        for relationship in &relationships {
            tx.execute(
                "INSERT INTO relationships (key, relationship_type, body) VALUES (?1, ?2, ?3)",
                params![
                    relationship.key(),
                    relationship.relationship_type(),
                    serde_json::to_string(relationship)?
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    async fn find_entity(&self, key: &str) -> Result<Option<Entity>, DbError> {
        let conn = self.lock()?;
        let found = decode_rows(
            &conn,
            "SELECT body FROM entities WHERE key = ?1",
            params![key],
        )?;
        Ok(found.into_iter().next())
    }

    async fn entities_of_type(&self, entity_type: &str) -> Result<Vec<Entity>, DbError> {
        let conn = self.lock()?;
        decode_rows(
            &conn,
            "SELECT body FROM entities WHERE entity_type = ?1 ORDER BY seq",
            params![entity_type],
        )
    }

    async fn entities(&self) -> Result<Vec<Entity>, DbError> {
        let conn = self.lock()?;
        decode_rows(&conn, "SELECT body FROM entities ORDER BY seq", [])
    }

    async fn relationships(&self) -> Result<Vec<Relationship>, DbError> {
        let conn = self.lock()?;
        decode_rows(&conn, "SELECT body FROM relationships ORDER BY seq", [])
    }
}
