//! Persistent state: user credentials and per-service resource mappings.
//!
//! Backed by a single redb file with one table per record family. Records are
//! stored as JSON strings so the schema can grow without a redb migration.
//! Every mutation runs in its own write transaction, which gives the
//! read-modify-write atomicity the rest of the bot relies on; cross-key
//! operations need no coordination.
//!
//! Pending flows are deliberately *not* stored here — they are in-memory only
//! and a process restart cancels them.

use crate::error::StoreError;
use redb::{Database, TableDefinition};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// User id → JSON [`UserSession`].
const CREDENTIALS_TABLE: TableDefinition<&str, &str> = TableDefinition::new("credentials");

/// Service id → JSON [`ResourceMapping`].
const MAPPINGS_TABLE: TableDefinition<&str, &str> = TableDefinition::new("resource_mappings");

/// Per-user session: the API credential plus the lazily resolved default
/// workspace. Created on first successful login, overwritten on re-login,
/// never deleted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserSession {
    pub api_key: String,
    /// Owning workspace used for service creation. Resolved on first use and
    /// cached here so creation does not re-query the workspace list.
    #[serde(default)]
    pub default_workspace: Option<String>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl UserSession {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            default_workspace: None,
            updated_at: chrono::Utc::now(),
        }
    }
}

/// Locally persisted service metadata the remote API does not retain in the
/// shape the bot needs: source repository, branch, and start command.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceMapping {
    pub repository: String,
    #[serde(default = "default_branch")]
    pub branch: String,
    #[serde(default)]
    pub start_command: Option<String>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

pub fn default_branch() -> String {
    "main".to_string()
}

impl ResourceMapping {
    pub fn new(repository: impl Into<String>, branch: impl Into<String>) -> Self {
        Self {
            repository: repository.into(),
            branch: branch.into(),
            start_command: None,
            updated_at: chrono::Utc::now(),
        }
    }
}

/// Store handle. Cheap to share behind an `Arc`; redb serializes writers
/// internally.
pub struct StateStore {
    db: Database,
}

impl std::fmt::Debug for StateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateStore").finish_non_exhaustive()
    }
}

impl StateStore {
    /// Open or create the store at the given path and ensure both tables
    /// exist, so later read transactions never hit a missing table.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db = Database::create(path.as_ref()).map_err(StoreError::database)?;

        let write_txn = db.begin_write().map_err(StoreError::database)?;
        {
            write_txn
                .open_table(CREDENTIALS_TABLE)
                .map_err(StoreError::database)?;
            write_txn
                .open_table(MAPPINGS_TABLE)
                .map_err(StoreError::database)?;
        }
        write_txn.commit().map_err(StoreError::database)?;

        Ok(Self { db })
    }

    /// Fetch the session for a user, if one exists.
    pub fn session(&self, user_id: i64) -> Result<Option<UserSession>, StoreError> {
        self.read_json(CREDENTIALS_TABLE, &user_id.to_string())
    }

    /// Create or overwrite a user's session.
    pub fn set_session(&self, user_id: i64, session: &UserSession) -> Result<(), StoreError> {
        self.write_json(CREDENTIALS_TABLE, &user_id.to_string(), session)
    }

    /// Fetch the mapping for a service, if one exists.
    pub fn mapping(&self, service_id: &str) -> Result<Option<ResourceMapping>, StoreError> {
        self.read_json(MAPPINGS_TABLE, service_id)
    }

    /// Create or overwrite a service's mapping.
    pub fn set_mapping(
        &self,
        service_id: &str,
        mapping: &ResourceMapping,
    ) -> Result<(), StoreError> {
        self.write_json(MAPPINGS_TABLE, service_id, mapping)
    }

    fn read_json<T: for<'de> Deserialize<'de>>(
        &self,
        table: TableDefinition<&str, &str>,
        key: &str,
    ) -> Result<Option<T>, StoreError> {
        let read_txn = self.db.begin_read().map_err(StoreError::database)?;
        let table = read_txn.open_table(table).map_err(StoreError::database)?;
        let Some(raw) = table.get(key).map_err(StoreError::database)? else {
            return Ok(None);
        };
        let record = serde_json::from_str(raw.value()).map_err(|error| StoreError::Corrupt {
            key: key.to_string(),
            reason: error.to_string(),
        })?;
        Ok(Some(record))
    }

    fn write_json<T: Serialize>(
        &self,
        table: TableDefinition<&str, &str>,
        key: &str,
        record: &T,
    ) -> Result<(), StoreError> {
        let json = serde_json::to_string(record).map_err(|error| StoreError::Corrupt {
            key: key.to_string(),
            reason: error.to_string(),
        })?;

        let write_txn = self.db.begin_write().map_err(StoreError::database)?;
        {
            let mut table = write_txn.open_table(table).map_err(StoreError::database)?;
            table
                .insert(key, json.as_str())
                .map_err(StoreError::database)?;
        }
        write_txn.commit().map_err(StoreError::database)?;
        Ok(())
    }
}
