//! SQLite-backed session and membership storage.
//!
//! Provides persistent storage for:
//! - Timer sessions (serialized as JSON next to their CAS version)
//! - Timer membership with activity and confirmation flags

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use super::data_dir;
use super::traits::{MemberRecord, MembershipStore, SessionStore, StoreResult};
use crate::error::StoreError;
use crate::timer::{Session, TimerId, UserId};

/// SQLite database for timer sessions and membership.
///
/// The connection sits behind a mutex so one `Database` can be shared by
/// every engine operation.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open the database at `~/.config/cotimer/cotimer.db`.
    ///
    /// Creates the database file and schema if they don't exist.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open() -> StoreResult<Self> {
        let path = data_dir()?.join("cotimer.db");
        Self::open_at(&path)
    }

    pub fn open_at(path: &Path) -> StoreResult<Self> {
        let conn = Connection::open(path).map_err(|source| StoreError::OpenFailed {
            path: path.to_path_buf(),
            source,
        })?;
        Self::with_connection(conn)
    }

    /// Open an in-memory database.
    pub fn open_memory() -> StoreResult<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> StoreResult<Self> {
        migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }
}

fn migrate(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS timers (
            id          TEXT PRIMARY KEY,
            owner_id    INTEGER NOT NULL,
            name        TEXT NOT NULL,
            version     INTEGER NOT NULL,
            session     TEXT NOT NULL,
            created_at  TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS timer_members (
            timer_id      TEXT NOT NULL,
            user_id       INTEGER NOT NULL,
            joined_at     INTEGER NOT NULL,
            last_activity INTEGER NOT NULL,
            is_confirmed  INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (timer_id, user_id)
        );

        -- Active-member lookups filter on recent activity per timer
        CREATE INDEX IF NOT EXISTS idx_timer_members_activity ON timer_members(timer_id, last_activity);
        CREATE INDEX IF NOT EXISTS idx_timers_owner ON timers(owner_id);",
    )
}

fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn from_millis(ms: i64, column: usize) -> Result<DateTime<Utc>, rusqlite::Error> {
    DateTime::<Utc>::from_timestamp_millis(ms).ok_or(rusqlite::Error::IntegralValueOutOfRange(column, ms))
}

fn member_from_row(row: &Row<'_>) -> Result<MemberRecord, rusqlite::Error> {
    Ok(MemberRecord {
        user_id: UserId(row.get(0)?),
        joined_at: from_millis(row.get(1)?, 1)?,
        last_activity: from_millis(row.get(2)?, 2)?,
        is_confirmed: row.get(3)?,
    })
}

impl SessionStore for Database {
    fn create(&self, session: &Session) -> StoreResult<()> {
        let json = serde_json::to_string(session)?;
        let inserted = self.conn()?.execute(
            "INSERT OR IGNORE INTO timers (id, owner_id, name, version, session, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                session.timer_id().to_string(),
                session.owner_id().0,
                session.name().as_str(),
                session.version(),
                json,
                session.created_at().to_rfc3339(),
            ],
        )?;
        if inserted == 0 {
            return Err(StoreError::AlreadyExists(session.timer_id()));
        }
        Ok(())
    }

    fn load(&self, timer_id: TimerId) -> StoreResult<Option<Session>> {
        let json: Option<String> = self
            .conn()?
            .query_row(
                "SELECT session FROM timers WHERE id = ?1",
                params![timer_id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        match json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    fn save(&self, session: &Session, expected_version: u64) -> StoreResult<()> {
        let json = serde_json::to_string(session)?;
        let id = session.timer_id().to_string();
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE timers SET session = ?1, version = ?2, name = ?3
             WHERE id = ?4 AND version = ?5",
            params![json, session.version(), session.name().as_str(), id, expected_version],
        )?;
        if updated == 0 {
            let found: Option<u64> = conn
                .query_row("SELECT version FROM timers WHERE id = ?1", params![id], |row| row.get(0))
                .optional()?;
            return Err(match found {
                Some(found) => StoreError::VersionMismatch {
                    timer_id: session.timer_id(),
                    expected: expected_version,
                    found,
                },
                None => StoreError::NotFound(session.timer_id()),
            });
        }
        Ok(())
    }

    fn delete(&self, timer_id: TimerId) -> StoreResult<bool> {
        let deleted = self
            .conn()?
            .execute("DELETE FROM timers WHERE id = ?1", params![timer_id.to_string()])?;
        Ok(deleted > 0)
    }

    fn timer_ids(&self) -> StoreResult<Vec<TimerId>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT id FROM timers ORDER BY id")?;
        let rows = stmt.query_map([], |row| {
            let raw: String = row.get(0)?;
            raw.parse::<TimerId>()
                .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e)))
        })?;
        let mut ids = Vec::new();
        for id in rows {
            ids.push(id?);
        }
        Ok(ids)
    }
}

impl MembershipStore for Database {
    fn add_member(&self, timer_id: TimerId, user_id: UserId, joined_at: DateTime<Utc>) -> StoreResult<bool> {
        let inserted = self.conn()?.execute(
            "INSERT OR IGNORE INTO timer_members (timer_id, user_id, joined_at, last_activity, is_confirmed)
             VALUES (?1, ?2, ?3, ?3, 0)",
            params![timer_id.to_string(), user_id.0, to_millis(joined_at)],
        )?;
        Ok(inserted > 0)
    }

    fn remove_member(&self, timer_id: TimerId, user_id: UserId) -> StoreResult<bool> {
        let deleted = self.conn()?.execute(
            "DELETE FROM timer_members WHERE timer_id = ?1 AND user_id = ?2",
            params![timer_id.to_string(), user_id.0],
        )?;
        Ok(deleted > 0)
    }

    fn remove_timer(&self, timer_id: TimerId) -> StoreResult<()> {
        self.conn()?.execute(
            "DELETE FROM timer_members WHERE timer_id = ?1",
            params![timer_id.to_string()],
        )?;
        Ok(())
    }

    fn is_member(&self, timer_id: TimerId, user_id: UserId) -> StoreResult<bool> {
        let found: Option<i64> = self
            .conn()?
            .query_row(
                "SELECT 1 FROM timer_members WHERE timer_id = ?1 AND user_id = ?2",
                params![timer_id.to_string(), user_id.0],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn list_members(
        &self,
        timer_id: TimerId,
        after: Option<UserId>,
        count: usize,
    ) -> StoreResult<Vec<MemberRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT user_id, joined_at, last_activity, is_confirmed
             FROM timer_members
             WHERE timer_id = ?1 AND user_id > ?2
             ORDER BY user_id
             LIMIT ?3",
        )?;
        let rows = stmt.query_map(
            params![
                timer_id.to_string(),
                after.map_or(i64::MIN, |u| u.0),
                i64::try_from(count).unwrap_or(i64::MAX),
            ],
            member_from_row,
        )?;
        let mut members = Vec::new();
        for member in rows {
            members.push(member?);
        }
        Ok(members)
    }

    fn list_active_members(
        &self,
        timer_id: TimerId,
        active_since: DateTime<Utc>,
    ) -> StoreResult<BTreeSet<UserId>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT user_id FROM timer_members
             WHERE timer_id = ?1 AND last_activity > ?2",
        )?;
        let rows = stmt.query_map(params![timer_id.to_string(), to_millis(active_since)], |row| {
            row.get::<_, i64>(0)
        })?;
        let mut active = BTreeSet::new();
        for user in rows {
            active.insert(UserId(user?));
        }
        Ok(active)
    }

    fn record_activity(&self, timer_id: TimerId, user_id: UserId, at: DateTime<Utc>) -> StoreResult<()> {
        self.conn()?.execute(
            "UPDATE timer_members SET last_activity = MAX(last_activity, ?3)
             WHERE timer_id = ?1 AND user_id = ?2",
            params![timer_id.to_string(), user_id.0, to_millis(at)],
        )?;
        Ok(())
    }

    fn set_confirmed(&self, timer_id: TimerId, user_id: UserId, confirmed: bool) -> StoreResult<()> {
        self.conn()?.execute(
            "UPDATE timer_members SET is_confirmed = ?3 WHERE timer_id = ?1 AND user_id = ?2",
            params![timer_id.to_string(), user_id.0, confirmed],
        )?;
        Ok(())
    }

    fn reset_confirmations(&self, timer_id: TimerId) -> StoreResult<()> {
        self.conn()?.execute(
            "UPDATE timer_members SET is_confirmed = 0 WHERE timer_id = ?1",
            params![timer_id.to_string()],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timer::{TimerName, TimerSettings};
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn session() -> Session {
        Session::new(
            TimerId::new(),
            UserId(7),
            TimerName::new("reading club").unwrap(),
            TimerSettings::default(),
            t0(),
        )
    }

    #[test]
    fn session_roundtrip_and_cas() {
        let db = Database::open_memory().unwrap();
        let mut s = session();
        db.create(&s).unwrap();
        assert!(matches!(db.create(&s), Err(StoreError::AlreadyExists(_))));
        assert_eq!(db.load(s.timer_id()).unwrap().as_ref(), Some(&s));

        s.start(t0()).unwrap();
        s.bump_version();
        db.save(&s, 0).unwrap();
        assert_eq!(db.load(s.timer_id()).unwrap().unwrap().state(), s.state());

        let err = db.save(&s, 0).unwrap_err();
        assert!(matches!(err, StoreError::VersionMismatch { found: 1, .. }));
        assert_eq!(db.timer_ids().unwrap(), vec![s.timer_id()]);

        assert!(db.delete(s.timer_id()).unwrap());
        assert!(matches!(db.save(&s, 1), Err(StoreError::NotFound(_))));
        assert!(db.load(s.timer_id()).unwrap().is_none());
    }

    #[test]
    fn membership_queries() {
        let db = Database::open_memory().unwrap();
        let id = TimerId::new();
        assert!(db.add_member(id, UserId(2), t0()).unwrap());
        assert!(db.add_member(id, UserId(1), t0()).unwrap());
        assert!(!db.add_member(id, UserId(1), t0()).unwrap());
        assert!(db.is_member(id, UserId(2)).unwrap());
        assert!(!db.is_member(id, UserId(3)).unwrap());

        db.record_activity(id, UserId(2), t0() + Duration::minutes(3)).unwrap();
        // Older activity never moves the record backwards.
        db.record_activity(id, UserId(2), t0()).unwrap();
        let active = db.list_active_members(id, t0() + Duration::minutes(1)).unwrap();
        assert_eq!(active.into_iter().collect::<Vec<_>>(), vec![UserId(2)]);

        db.set_confirmed(id, UserId(1), true).unwrap();
        let members = db.list_members(id, None, 10).unwrap();
        assert_eq!(members.len(), 2);
        assert_eq!(members[0].user_id, UserId(1));
        assert!(members[0].is_confirmed);
        assert_eq!(members[1].last_activity, t0() + Duration::minutes(3));

        db.reset_confirmations(id).unwrap();
        assert!(db.list_members(id, None, 10).unwrap().iter().all(|m| !m.is_confirmed));

        let page = db.list_members(id, Some(UserId(1)), 10).unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].user_id, UserId(2));

        assert!(db.remove_member(id, UserId(1)).unwrap());
        db.remove_timer(id).unwrap();
        assert!(db.list_members(id, None, 10).unwrap().is_empty());
    }

    #[test]
    fn data_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cotimer.db");
        let s = session();
        {
            let db = Database::open_at(&path).unwrap();
            db.create(&s).unwrap();
            db.add_member(s.timer_id(), s.owner_id(), t0()).unwrap();
        }
        let db = Database::open_at(&path).unwrap();
        assert_eq!(db.load(s.timer_id()).unwrap(), Some(s.clone()));
        assert!(db.is_member(s.timer_id(), s.owner_id()).unwrap());
    }
}
