//! Schema migrations
//!
//! One record namespace per store: a single `records` table created at
//! schema version 1.

use crate::Result;
use rusqlite::{Connection, OptionalExtension};

pub const SCHEMA_VERSION: i32 = 1;

pub fn run_migrations(conn: &Connection) -> Result<()> {
    let current_version = get_schema_version(conn)?;

    if current_version >= SCHEMA_VERSION {
        return Ok(());
    }

    if current_version < 1 {
        migrate_v1(conn)?;
    }

    set_schema_version(conn, SCHEMA_VERSION)?;
    Ok(())
}

pub fn get_schema_version(conn: &Connection) -> Result<i32> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)",
        [],
    )?;

    let version = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
            row.get(0)
        })
        .optional()?;

    Ok(version.unwrap_or(0))
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute("DELETE FROM schema_version", [])?;
    conn.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])?;
    Ok(())
}

fn migrate_v1(conn: &Connection) -> Result<()> {
    tracing::info!("Running migration v1: record namespace");

    // Untyped key column so text and integer keys keep their own identity
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS records (
            key PRIMARY KEY,
            value TEXT NOT NULL
        ) WITHOUT ROWID;
    "#,
    )?;

    Ok(())
}

/// Drops the namespace and version bookkeeping so the next opener starts
/// from an empty container.
pub fn drop_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        DROP TABLE IF EXISTS records;
        DROP TABLE IF EXISTS schema_version;
    "#,
    )?;
    Ok(())
}
