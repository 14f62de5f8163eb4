mod versioned_schema;

pub use versioned_schema::*;

use anyhow::{bail, Context, Result};
use rusqlite::Connection;
use tracing::info;

/// Brings `conn` to the latest schema in `schemas`.
///
/// An empty database is created at the latest version. An existing one is
/// validated against the version recorded in `PRAGMA user_version` and then
/// migrated forward inside a single transaction.
pub fn migrate_to_latest(
    conn: &mut Connection,
    schemas: &[VersionedSchema],
    label: &str,
) -> Result<usize> {
    let latest = match schemas.last() {
        Some(schema) => schema,
        None => bail!("No schema versions defined for {} database", label),
    };

    let table_count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%'",
        [],
        |r| r.get(0),
    )?;

    if table_count == 0 {
        info!("Creating {} database schema at version {}", label, latest.version);
        let tx = conn.transaction()?;
        latest.create(&tx)?;
        tx.commit()?;
        return Ok(latest.version);
    }

    let raw_version: i64 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    let db_version = raw_version - BASE_DB_VERSION as i64;
    if db_version < 1 {
        bail!(
            "{} database version {} is invalid (expected >= 1)",
            label,
            db_version
        );
    }
    let db_version = db_version as usize;

    let current = schemas
        .iter()
        .find(|s| s.version == db_version)
        .with_context(|| format!("Unknown {} database version {}", label, db_version))?;
    current.validate(conn).with_context(|| {
        format!(
            "{} database schema validation failed for version {}",
            label, db_version
        )
    })?;

    if db_version < latest.version {
        let tx = conn.transaction()?;
        for schema in schemas.iter().filter(|s| s.version > db_version) {
            info!(
                "Migrating {} database to version {}",
                label, schema.version
            );
            if let Some(migration) = schema.migration {
                migration(&tx).with_context(|| {
                    format!("Failed to run migration to version {}", schema.version)
                })?;
            }
        }
        tx.execute(
            &format!("PRAGMA user_version = {}", BASE_DB_VERSION + latest.version),
            [],
        )?;
        tx.commit()?;
    }

    Ok(latest.version)
}
