//! Typed key-value preference store.
//!
//! Holds the user's rules between runs. Values are kept as JSON so a single
//! table can hold booleans, integers, strings and ordered string lists.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use rusqlite::{Connection, OptionalExtension};
use serde_json::Value;
use tracing::debug;

use crate::error::{Error, Result};

/// SQL statement to create the preferences table.
const CREATE_PREFERENCES_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS preferences (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
)
";

/// A durable key-value store with typed accessors.
///
/// Writes are synchronous: when a setter returns `Ok`, the value has been
/// persisted.
pub trait PreferenceStore: Send + Sync + std::fmt::Debug {
    /// Read the raw value for `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store cannot be read.
    fn get_value(&self, key: &str) -> Result<Option<Value>>;

    /// Persist several raw values at once. Either all are written or none.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store cannot be written.
    fn set_values(&self, entries: &[(&str, Value)]) -> Result<()>;

    /// Persist the raw value for `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store cannot be written.
    fn set_value(&self, key: &str, value: Value) -> Result<()> {
        self.set_values(&[(key, value)])
    }

    /// Read a boolean, falling back to `default` when unset.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored value is not a boolean.
    fn get_bool(&self, key: &str, default: bool) -> Result<bool> {
        match self.get_value(key)? {
            None => Ok(default),
            Some(Value::Bool(b)) => Ok(b),
            Some(other) => Err(Error::preference_decode(
                key,
                format!("expected boolean, found {other}"),
            )),
        }
    }

    /// Persist a boolean.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store cannot be written.
    fn set_bool(&self, key: &str, value: bool) -> Result<()> {
        self.set_value(key, Value::Bool(value))
    }

    /// Read an integer, falling back to `default` when unset.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored value is not an integer.
    fn get_int(&self, key: &str, default: i64) -> Result<i64> {
        match self.get_value(key)? {
            None => Ok(default),
            Some(value) => value.as_i64().ok_or_else(|| {
                Error::preference_decode(key, format!("expected integer, found {value}"))
            }),
        }
    }

    /// Persist an integer.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store cannot be written.
    fn set_int(&self, key: &str, value: i64) -> Result<()> {
        self.set_value(key, Value::from(value))
    }

    /// Read a string.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored value is not a string.
    fn get_string(&self, key: &str) -> Result<Option<String>> {
        match self.get_value(key)? {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(s)),
            Some(other) => Err(Error::preference_decode(
                key,
                format!("expected string, found {other}"),
            )),
        }
    }

    /// Persist a string.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store cannot be written.
    fn set_string(&self, key: &str, value: &str) -> Result<()> {
        self.set_value(key, Value::String(value.to_string()))
    }

    /// Read a string collection in stored order (empty when unset).
    ///
    /// # Errors
    ///
    /// Returns an error if the stored value is not a list of strings.
    fn get_strings(&self, key: &str) -> Result<Vec<String>> {
        match self.get_value(key)? {
            None => Ok(Vec::new()),
            Some(value) => serde_json::from_value(value).map_err(|e| {
                Error::preference_decode(key, format!("expected list of strings: {e}"))
            }),
        }
    }

    /// Persist a string collection, preserving its order.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store cannot be written.
    fn set_strings(&self, key: &str, values: &[String]) -> Result<()> {
        self.set_value(key, Value::from(values.to_vec()))
    }
}

/// Preference store kept in a `SQLite` database.
#[derive(Debug)]
pub struct SqlitePreferences {
    path: PathBuf,
    conn: Mutex<Connection>,
}

impl SqlitePreferences {
    /// Open or create the preference database at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or initialized.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|source| Error::DirectoryCreate {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        let conn = Connection::open(&path).map_err(|source| Error::DatabaseOpen {
            path: path.clone(),
            source,
        })?;
        conn.execute_batch(CREATE_PREFERENCES_TABLE)?;

        debug!("Preferences opened at {}", path.display());
        Ok(Self {
            path,
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory preference database for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be created.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|source| Error::DatabaseOpen {
            path: PathBuf::from(":memory:"),
            source,
        })?;
        conn.execute_batch(CREATE_PREFERENCES_TABLE)?;

        Ok(Self {
            path: PathBuf::from(":memory:"),
            conn: Mutex::new(conn),
        })
    }

    /// Get the path to the preference database.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::internal("preferences mutex poisoned"))
    }
}

impl PreferenceStore for SqlitePreferences {
    fn get_value(&self, key: &str) -> Result<Option<Value>> {
        let raw: Option<String> = self
            .lock()?
            .query_row(
                "SELECT value FROM preferences WHERE key = ?1",
                [key],
                |row| row.get(0),
            )
            .optional()?;

        raw.map(|s| {
            serde_json::from_str(&s).map_err(|e| Error::preference_decode(key, e.to_string()))
        })
        .transpose()
    }

    fn set_values(&self, entries: &[(&str, Value)]) -> Result<()> {
        let encoded = entries
            .iter()
            .map(|(key, value)| -> Result<(String, String)> {
                Ok(((*key).to_string(), serde_json::to_string(value)?))
            })
            .collect::<Result<Vec<_>>>()?;

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        for (key, value) in &encoded {
            tx.execute(
                "INSERT OR REPLACE INTO preferences (key, value) VALUES (?1, ?2)",
                (key, value),
            )?;
        }
        tx.commit()?;

        for (key, _) in &encoded {
            debug!(key = key.as_str(), "Preference saved");
        }
        Ok(())
    }
}

/// Preference store held in memory only.
#[derive(Debug, Default)]
pub struct MemoryPreferences {
    values: Mutex<BTreeMap<String, Value>>,
}

impl MemoryPreferences {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl PreferenceStore for MemoryPreferences {
    fn get_value(&self, key: &str) -> Result<Option<Value>> {
        let values = self
            .values
            .lock()
            .map_err(|_| Error::internal("preferences mutex poisoned"))?;
        Ok(values.get(key).cloned())
    }

    fn set_values(&self, entries: &[(&str, Value)]) -> Result<()> {
        let mut values = self
            .values
            .lock()
            .map_err(|_| Error::internal("preferences mutex poisoned"))?;
        for (key, value) in entries {
            values.insert((*key).to_string(), value.clone());
        }
        Ok(())
    }
}
