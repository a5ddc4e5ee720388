use std::collections::HashSet;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::model::{normalize_for_search, SourceType};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("preference store lock poisoned")]
    Poisoned,
}

/// Exclusion lists are kept per purpose and never consulted across purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExclusionPurpose {
    Results,
    Suggestions,
}

impl ExclusionPurpose {
    fn as_str(self) -> &'static str {
        match self {
            Self::Results => "results",
            Self::Suggestions => "suggestions",
        }
    }
}

/// Read side of the user's per-item customization.
///
/// Implementations are read concurrently from worker threads. The engine never
/// writes through this trait.
pub trait PreferenceStore: Send + Sync {
    /// Pinned identities in pin order.
    fn pinned(&self, source: SourceType) -> Result<Vec<String>, StoreError>;
    fn excluded(
        &self,
        source: SourceType,
        purpose: ExclusionPurpose,
    ) -> Result<HashSet<String>, StoreError>;
    fn nickname(&self, source: SourceType, id: &str) -> Result<Option<String>, StoreError>;
    /// Identities whose nickname contains `query` (case-insensitive).
    fn find_by_nickname_match(
        &self,
        source: SourceType,
        query: &str,
    ) -> Result<Vec<String>, StoreError>;
    /// Stored section order; empty when the user never reordered.
    fn section_order(&self) -> Result<Vec<SourceType>, StoreError>;
    fn disabled_sections(&self) -> Result<HashSet<SourceType>, StoreError>;
}

/// Mutation entry points used by the surrounding application.
pub trait PreferenceEditor {
    fn pin(&self, source: SourceType, id: &str) -> Result<(), StoreError>;
    fn unpin(&self, source: SourceType, id: &str) -> Result<(), StoreError>;
    fn exclude(
        &self,
        source: SourceType,
        id: &str,
        purpose: ExclusionPurpose,
    ) -> Result<(), StoreError>;
    fn include(
        &self,
        source: SourceType,
        id: &str,
        purpose: ExclusionPurpose,
    ) -> Result<(), StoreError>;
    fn set_nickname(&self, source: SourceType, id: &str, nickname: &str) -> Result<(), StoreError>;
    fn clear_nickname(&self, source: SourceType, id: &str) -> Result<(), StoreError>;
    fn set_section_order(&self, order: &[SourceType]) -> Result<(), StoreError>;
    fn set_section_disabled(&self, source: SourceType, disabled: bool) -> Result<(), StoreError>;
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS pin (
    source TEXT NOT NULL,
    id TEXT NOT NULL,
    position INTEGER NOT NULL,
    PRIMARY KEY (source, id)
);
CREATE TABLE IF NOT EXISTS exclusion (
    source TEXT NOT NULL,
    id TEXT NOT NULL,
    purpose TEXT NOT NULL,
    PRIMARY KEY (source, id, purpose)
);
CREATE TABLE IF NOT EXISTS nickname (
    source TEXT NOT NULL,
    id TEXT NOT NULL,
    nickname TEXT NOT NULL,
    normalized TEXT NOT NULL,
    PRIMARY KEY (source, id)
);
CREATE TABLE IF NOT EXISTS section_order (
    source TEXT PRIMARY KEY,
    position INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS section_disabled (
    source TEXT PRIMARY KEY
);
";

pub struct SqlitePreferenceStore {
    conn: Mutex<Connection>,
}

impl SqlitePreferenceStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Self::from_connection(Connection::open(path)?)
    }

    pub fn open_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    fn query_ids(&self, sql: &str, source: SourceType, arg: &str) -> Result<Vec<String>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params![source.as_str(), arg], |row| row.get::<_, String>(0))?;
        let ids = rows.collect::<Result<Vec<String>, _>>()?;
        Ok(ids)
    }

    fn query_sources(&self, sql: &str) -> Result<Vec<SourceType>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let raw = rows.collect::<Result<Vec<String>, _>>()?;
        Ok(raw
            .iter()
            .filter_map(|value| SourceType::parse(value))
            .collect())
    }
}

impl PreferenceStore for SqlitePreferenceStore {
    fn pinned(&self, source: SourceType) -> Result<Vec<String>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT id FROM pin WHERE source = ?1 ORDER BY position, id")?;
        let rows = stmt.query_map(params![source.as_str()], |row| row.get::<_, String>(0))?;
        let ids = rows.collect::<Result<Vec<String>, _>>()?;
        Ok(ids)
    }

    fn excluded(
        &self,
        source: SourceType,
        purpose: ExclusionPurpose,
    ) -> Result<HashSet<String>, StoreError> {
        let ids = self.query_ids(
            "SELECT id FROM exclusion WHERE source = ?1 AND purpose = ?2",
            source,
            purpose.as_str(),
        )?;
        Ok(ids.into_iter().collect())
    }

    fn nickname(&self, source: SourceType, id: &str) -> Result<Option<String>, StoreError> {
        let conn = self.conn()?;
        let nickname = conn
            .query_row(
                "SELECT nickname FROM nickname WHERE source = ?1 AND id = ?2",
                params![source.as_str(), id],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(nickname)
    }

    fn find_by_nickname_match(
        &self,
        source: SourceType,
        query: &str,
    ) -> Result<Vec<String>, StoreError> {
        let normalized = normalize_for_search(query);
        if normalized.is_empty() {
            return Ok(Vec::new());
        }
        self.query_ids(
            "SELECT id FROM nickname WHERE source = ?1 AND instr(normalized, ?2) > 0 ORDER BY id",
            source,
            &normalized,
        )
    }

    fn section_order(&self) -> Result<Vec<SourceType>, StoreError> {
        self.query_sources("SELECT source FROM section_order ORDER BY position")
    }

    fn disabled_sections(&self) -> Result<HashSet<SourceType>, StoreError> {
        Ok(self
            .query_sources("SELECT source FROM section_disabled")?
            .into_iter()
            .collect())
    }
}

impl PreferenceEditor for SqlitePreferenceStore {
    fn pin(&self, source: SourceType, id: &str) -> Result<(), StoreError> {
        self.conn()?.execute(
            "INSERT OR IGNORE INTO pin (source, id, position)
             VALUES (?1, ?2, (SELECT COALESCE(MAX(position), 0) + 1 FROM pin WHERE source = ?1))",
            params![source.as_str(), id],
        )?;
        Ok(())
    }

    fn unpin(&self, source: SourceType, id: &str) -> Result<(), StoreError> {
        self.conn()?.execute(
            "DELETE FROM pin WHERE source = ?1 AND id = ?2",
            params![source.as_str(), id],
        )?;
        Ok(())
    }

    fn exclude(
        &self,
        source: SourceType,
        id: &str,
        purpose: ExclusionPurpose,
    ) -> Result<(), StoreError> {
        self.conn()?.execute(
            "INSERT OR IGNORE INTO exclusion (source, id, purpose) VALUES (?1, ?2, ?3)",
            params![source.as_str(), id, purpose.as_str()],
        )?;
        Ok(())
    }

    fn include(
        &self,
        source: SourceType,
        id: &str,
        purpose: ExclusionPurpose,
    ) -> Result<(), StoreError> {
        self.conn()?.execute(
            "DELETE FROM exclusion WHERE source = ?1 AND id = ?2 AND purpose = ?3",
            params![source.as_str(), id, purpose.as_str()],
        )?;
        Ok(())
    }

    fn set_nickname(&self, source: SourceType, id: &str, nickname: &str) -> Result<(), StoreError> {
        let trimmed = nickname.trim();
        if trimmed.is_empty() {
            return self.clear_nickname(source, id);
        }
        self.conn()?.execute(
            "INSERT INTO nickname (source, id, nickname, normalized) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(source, id) DO UPDATE SET nickname=excluded.nickname, normalized=excluded.normalized",
            params![source.as_str(), id, trimmed, normalize_for_search(trimmed)],
        )?;
        Ok(())
    }

    fn clear_nickname(&self, source: SourceType, id: &str) -> Result<(), StoreError> {
        self.conn()?.execute(
            "DELETE FROM nickname WHERE source = ?1 AND id = ?2",
            params![source.as_str(), id],
        )?;
        Ok(())
    }

    fn set_section_order(&self, order: &[SourceType]) -> Result<(), StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM section_order", [])?;
        for (position, source) in order.iter().enumerate() {
            tx.execute(
                "INSERT OR IGNORE INTO section_order (source, position) VALUES (?1, ?2)",
                params![source.as_str(), position as i64],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn set_section_disabled(&self, source: SourceType, disabled: bool) -> Result<(), StoreError> {
        let conn = self.conn()?;
        if disabled {
            conn.execute(
                "INSERT OR IGNORE INTO section_disabled (source) VALUES (?1)",
                params![source.as_str()],
            )?;
        } else {
            conn.execute(
                "DELETE FROM section_disabled WHERE source = ?1",
                params![source.as_str()],
            )?;
        }
        Ok(())
    }
}
