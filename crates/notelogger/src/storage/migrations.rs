//! Database schema versioning.
//!
//! The schema version lives in `PRAGMA user_version`. Each migration runs in
//! its own transaction together with the version bump.

use rusqlite::Connection;
use tracing::info;

use crate::error::{Error, Result};

use super::schema::V1_STATEMENTS;

/// A single schema migration.
#[derive(Debug)]
struct Migration {
    version: i32,
    description: &'static str,
    statements: &'static [&'static str],
}

/// Known migrations, in ascending version order.
const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    description: "create notifications table",
    statements: V1_STATEMENTS,
}];

/// The schema version this build expects.
pub const CURRENT_VERSION: i32 = 1;

/// Bring the database schema up to [`CURRENT_VERSION`].
///
/// # Errors
///
/// Returns an error if the database is newer than this build or a
/// migration fails.
pub fn initialize_schema(conn: &mut Connection) -> Result<()> {
    let version = get_schema_version(conn)?;
    if version > CURRENT_VERSION {
        return Err(Error::DatabaseMigration {
            message: format!(
                "database schema version {version} is newer than supported version {CURRENT_VERSION}"
            ),
        });
    }

    for migration in MIGRATIONS.iter().filter(|m| m.version > version) {
        let tx = conn.transaction()?;
        for statement in migration.statements {
            tx.execute_batch(statement)?;
        }
        tx.pragma_update(None, "user_version", migration.version)?;
        tx.commit()?;
        info!(
            version = migration.version,
            "Applied migration: {}", migration.description
        );
    }

    Ok(())
}

/// Read the schema version (0 for a fresh database).
fn get_schema_version(conn: &Connection) -> Result<i32> {
    let version = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    Ok(version)
}
