// SPDX-License-Identifier: Apache-2.0

//! Relational store behind the access gate.
//!
//! One lazily-initialized, explicitly-closable handle wraps the rusqlite
//! connection; handlers receive it through `AppState`, never through a
//! module-level singleton. Every authorization check is a fresh point
//! lookup with no derived state and no caching. Referential integrity is an
//! ordering discipline here: children are always deleted before parents
//! within the same request.

use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use rusqlite::{params, Connection, OptionalExtension, Row};
use tokio::sync::Mutex;

use caseroom_model::{
    AdminCaseAccess, Assistant, AssistantId, Case, CaseAccess, CaseId, Email, Role, User,
};

use crate::StoreError;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    email TEXT NOT NULL UNIQUE,
    username TEXT,
    is_admin INTEGER NOT NULL DEFAULT 0,
    is_super_admin INTEGER NOT NULL DEFAULT 0,
    can_create_cases INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS sessions (
    token TEXT PRIMARY KEY,
    user_id INTEGER NOT NULL REFERENCES users(id),
    created_at INTEGER NOT NULL,
    expires_at INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS cases (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    created_by INTEGER NOT NULL REFERENCES users(id),
    created_at INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS case_access (
    user_id INTEGER NOT NULL REFERENCES users(id),
    case_id TEXT NOT NULL REFERENCES cases(id),
    role TEXT NOT NULL CHECK (role IN ('STUDENT','PROFESSOR')),
    added_by INTEGER NOT NULL,
    added_at INTEGER NOT NULL,
    UNIQUE (user_id, case_id)
);
CREATE TABLE IF NOT EXISTS admin_case_access (
    user_id INTEGER NOT NULL REFERENCES users(id),
    case_id TEXT NOT NULL REFERENCES cases(id),
    added_by INTEGER NOT NULL,
    added_at INTEGER NOT NULL,
    UNIQUE (user_id, case_id)
);
CREATE TABLE IF NOT EXISTS assistants (
    id TEXT NOT NULL,
    case_id TEXT NOT NULL REFERENCES cases(id),
    name TEXT NOT NULL,
    password_sha256 TEXT,
    created_at INTEGER NOT NULL,
    UNIQUE (case_id, id)
);
";

#[must_use]
pub fn unix_seconds() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs() as i64)
}

pub struct Database {
    path: PathBuf,
    conn: Mutex<Option<Connection>>,
}

impl Database {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            conn: Mutex::new(None),
        }
    }

    /// Closes the underlying connection. Subsequent calls reopen lazily;
    /// callers that want a hard stop drop the handle after this.
    pub async fn close(&self) -> Result<(), StoreError> {
        let mut guard = self.conn.lock().await;
        if let Some(conn) = guard.take() {
            conn.close()
                .map_err(|(_, e)| StoreError(format!("close failed: {e}")))?;
        }
        Ok(())
    }

    async fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, rusqlite::Error>,
    ) -> Result<T, StoreError> {
        let mut guard = self.conn.lock().await;
        if guard.is_none() {
            let conn = Connection::open(&self.path)
                .map_err(|e| StoreError(format!("open failed: {e}")))?;
            conn.execute_batch(SCHEMA)
                .map_err(|e| StoreError(format!("schema init failed: {e}")))?;
            *guard = Some(conn);
        }
        let conn = guard
            .as_ref()
            .ok_or_else(|| StoreError("connection missing after init".to_string()))?;
        f(conn).map_err(|e| StoreError(format!("query failed: {e}")))
    }

    pub async fn ping(&self) -> Result<(), StoreError> {
        self.with_conn(|conn| conn.query_row("SELECT 1", [], |_| Ok(())))
            .await
    }

    pub async fn upsert_user_by_email(
        &self,
        email: &Email,
        username: Option<&str>,
    ) -> Result<User, StoreError> {
        let email = email.clone();
        let username = username.map(ToString::to_string);
        let now = unix_seconds();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO users (email, username, created_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(email) DO UPDATE SET
                     username = COALESCE(excluded.username, users.username)",
                params![email.as_str(), username, now],
            )?;
            conn.query_row(
                "SELECT id, email, username, is_admin, is_super_admin, can_create_cases, created_at
                 FROM users WHERE email = ?1",
                params![email.as_str()],
                user_from_row,
            )
        })
        .await
    }

    pub async fn find_user_by_email(&self, email: &Email) -> Result<Option<User>, StoreError> {
        let email = email.clone();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT id, email, username, is_admin, is_super_admin, can_create_cases, created_at
                 FROM users WHERE email = ?1",
                params![email.as_str()],
                user_from_row,
            )
            .optional()
        })
        .await
    }

    pub async fn find_user_by_id(&self, user_id: i64) -> Result<Option<User>, StoreError> {
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT id, email, username, is_admin, is_super_admin, can_create_cases, created_at
                 FROM users WHERE id = ?1",
                params![user_id],
                user_from_row,
            )
            .optional()
        })
        .await
    }

    pub async fn set_user_flags(
        &self,
        user_id: i64,
        is_admin: bool,
        is_super_admin: bool,
        can_create_cases: bool,
    ) -> Result<bool, StoreError> {
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "UPDATE users SET is_admin = ?2, is_super_admin = ?3, can_create_cases = ?4
                 WHERE id = ?1",
                params![user_id, is_admin, is_super_admin, can_create_cases],
            )?;
            Ok(changed > 0)
        })
        .await
    }

    pub async fn list_users(&self) -> Result<Vec<User>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, email, username, is_admin, is_super_admin, can_create_cases, created_at
                 FROM users ORDER BY id",
            )?;
            let rows = stmt.query_map([], user_from_row)?;
            rows.collect()
        })
        .await
    }

    /// Children first, then the user row. Returns false when the user did
    /// not exist, so a repeated delete maps to 404.
    pub async fn delete_user_cascade(&self, user_id: i64) -> Result<bool, StoreError> {
        self.with_conn(move |conn| {
            conn.execute("DELETE FROM case_access WHERE user_id = ?1", params![user_id])?;
            conn.execute(
                "DELETE FROM admin_case_access WHERE user_id = ?1",
                params![user_id],
            )?;
            conn.execute("DELETE FROM sessions WHERE user_id = ?1", params![user_id])?;
            let deleted = conn.execute("DELETE FROM users WHERE id = ?1", params![user_id])?;
            Ok(deleted > 0)
        })
        .await
    }

    pub async fn access_rows_for_user(&self, user_id: i64) -> Result<i64, StoreError> {
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT (SELECT COUNT(*) FROM case_access WHERE user_id = ?1)
                      + (SELECT COUNT(*) FROM admin_case_access WHERE user_id = ?1)",
                params![user_id],
                |row| row.get(0),
            )
        })
        .await
    }

    pub async fn create_session(
        &self,
        token: &str,
        user_id: i64,
        ttl_secs: i64,
    ) -> Result<(), StoreError> {
        let token = token.to_string();
        let now = unix_seconds();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO sessions (token, user_id, created_at, expires_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![token, user_id, now, now + ttl_secs],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn resolve_session(&self, token: &str) -> Result<Option<User>, StoreError> {
        let token = token.to_string();
        let now = unix_seconds();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT u.id, u.email, u.username, u.is_admin, u.is_super_admin,
                        u.can_create_cases, u.created_at
                 FROM sessions s JOIN users u ON u.id = s.user_id
                 WHERE s.token = ?1 AND s.expires_at > ?2",
                params![token, now],
                user_from_row,
            )
            .optional()
        })
        .await
    }

    /// Returns false when the id is already taken.
    pub async fn create_case(&self, case: &Case) -> Result<bool, StoreError> {
        let case = case.clone();
        self.with_conn(move |conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO cases (id, name, created_by, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    case.id.as_str(),
                    case.name,
                    case.created_by,
                    case.created_at
                ],
            )?;
            Ok(inserted > 0)
        })
        .await
    }

    pub async fn get_case(&self, case_id: &CaseId) -> Result<Option<Case>, StoreError> {
        let case_id = case_id.clone();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT id, name, created_by, created_at FROM cases WHERE id = ?1",
                params![case_id.as_str()],
                case_from_row,
            )
            .optional()
        })
        .await
    }

    pub async fn list_cases_for(&self, user: &User) -> Result<Vec<Case>, StoreError> {
        let all = user.is_admin || user.is_super_admin;
        let user_id = user.id;
        self.with_conn(move |conn| {
            if all {
                let mut stmt = conn
                    .prepare("SELECT id, name, created_by, created_at FROM cases ORDER BY id")?;
                let rows = stmt.query_map([], case_from_row)?;
                rows.collect()
            } else {
                let mut stmt = conn.prepare(
                    "SELECT c.id, c.name, c.created_by, c.created_at
                     FROM cases c JOIN case_access a ON a.case_id = c.id
                     WHERE a.user_id = ?1 ORDER BY c.id",
                )?;
                let rows = stmt.query_map(params![user_id], case_from_row)?;
                rows.collect()
            }
        })
        .await
    }

    pub async fn delete_case(&self, case_id: &CaseId) -> Result<bool, StoreError> {
        let case_id = case_id.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "DELETE FROM case_access WHERE case_id = ?1",
                params![case_id.as_str()],
            )?;
            conn.execute(
                "DELETE FROM admin_case_access WHERE case_id = ?1",
                params![case_id.as_str()],
            )?;
            conn.execute(
                "DELETE FROM assistants WHERE case_id = ?1",
                params![case_id.as_str()],
            )?;
            let deleted = conn.execute(
                "DELETE FROM cases WHERE id = ?1",
                params![case_id.as_str()],
            )?;
            Ok(deleted > 0)
        })
        .await
    }

    pub async fn case_grant(
        &self,
        user_id: i64,
        case_id: &CaseId,
    ) -> Result<Option<Role>, StoreError> {
        let case_id = case_id.clone();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT role FROM case_access WHERE user_id = ?1 AND case_id = ?2",
                params![user_id, case_id.as_str()],
                |row| role_from_column(row, 0),
            )
            .optional()
        })
        .await
    }

    /// Role-overwriting upsert: at most one row per (user, case). Racing
    /// duplicates resolve through SQLite's ON CONFLICT, not application
    /// logic.
    pub async fn upsert_case_access(
        &self,
        user_id: i64,
        case_id: &CaseId,
        role: Role,
        added_by: i64,
    ) -> Result<(), StoreError> {
        let case_id = case_id.clone();
        let now = unix_seconds();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO case_access (user_id, case_id, role, added_by, added_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(user_id, case_id) DO UPDATE SET
                     role = excluded.role,
                     added_by = excluded.added_by,
                     added_at = excluded.added_at",
                params![user_id, case_id.as_str(), role.as_str(), added_by, now],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn list_case_access(&self, case_id: &CaseId) -> Result<Vec<CaseAccess>, StoreError> {
        let case_id = case_id.clone();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT user_id, case_id, role, added_by, added_at
                 FROM case_access WHERE case_id = ?1 ORDER BY user_id",
            )?;
            let rows = stmt.query_map(params![case_id.as_str()], case_access_from_row)?;
            rows.collect()
        })
        .await
    }

    pub async fn revoke_case_access(
        &self,
        user_id: i64,
        case_id: &CaseId,
    ) -> Result<bool, StoreError> {
        let case_id = case_id.clone();
        self.with_conn(move |conn| {
            let deleted = conn.execute(
                "DELETE FROM case_access WHERE user_id = ?1 AND case_id = ?2",
                params![user_id, case_id.as_str()],
            )?;
            Ok(deleted > 0)
        })
        .await
    }

    pub async fn has_admin_assignment(
        &self,
        user_id: i64,
        case_id: &CaseId,
    ) -> Result<bool, StoreError> {
        let case_id = case_id.clone();
        self.with_conn(move |conn| {
            let found: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM admin_case_access WHERE user_id = ?1 AND case_id = ?2",
                    params![user_id, case_id.as_str()],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        })
        .await
    }

    pub async fn upsert_admin_assignment(
        &self,
        user_id: i64,
        case_id: &CaseId,
        added_by: i64,
    ) -> Result<(), StoreError> {
        let case_id = case_id.clone();
        let now = unix_seconds();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO admin_case_access (user_id, case_id, added_by, added_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(user_id, case_id) DO UPDATE SET
                     added_by = excluded.added_by,
                     added_at = excluded.added_at",
                params![user_id, case_id.as_str(), added_by, now],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn revoke_admin_assignment(
        &self,
        user_id: i64,
        case_id: &CaseId,
    ) -> Result<bool, StoreError> {
        let case_id = case_id.clone();
        self.with_conn(move |conn| {
            let deleted = conn.execute(
                "DELETE FROM admin_case_access WHERE user_id = ?1 AND case_id = ?2",
                params![user_id, case_id.as_str()],
            )?;
            Ok(deleted > 0)
        })
        .await
    }

    pub async fn list_admin_assignments(
        &self,
        case_id: &CaseId,
    ) -> Result<Vec<AdminCaseAccess>, StoreError> {
        let case_id = case_id.clone();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT user_id, case_id, added_by, added_at
                 FROM admin_case_access WHERE case_id = ?1 ORDER BY user_id",
            )?;
            let rows = stmt.query_map(params![case_id.as_str()], admin_access_from_row)?;
            rows.collect()
        })
        .await
    }

    /// Returns false when (case, assistant id) is already taken.
    pub async fn create_assistant(&self, assistant: &Assistant) -> Result<bool, StoreError> {
        let assistant = assistant.clone();
        self.with_conn(move |conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO assistants (id, case_id, name, password_sha256, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    assistant.id.as_str(),
                    assistant.case_id.as_str(),
                    assistant.name,
                    assistant.password_sha256,
                    assistant.created_at
                ],
            )?;
            Ok(inserted > 0)
        })
        .await
    }

    pub async fn get_assistant(
        &self,
        case_id: &CaseId,
        assistant_id: &AssistantId,
    ) -> Result<Option<Assistant>, StoreError> {
        let case_id = case_id.clone();
        let assistant_id = assistant_id.clone();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT id, case_id, name, password_sha256, created_at
                 FROM assistants WHERE case_id = ?1 AND id = ?2",
                params![case_id.as_str(), assistant_id.as_str()],
                assistant_from_row,
            )
            .optional()
        })
        .await
    }

    pub async fn list_assistants(&self, case_id: &CaseId) -> Result<Vec<Assistant>, StoreError> {
        let case_id = case_id.clone();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, case_id, name, password_sha256, created_at
                 FROM assistants WHERE case_id = ?1 ORDER BY id",
            )?;
            let rows = stmt.query_map(params![case_id.as_str()], assistant_from_row)?;
            rows.collect()
        })
        .await
    }
}

fn conversion_error(
    idx: usize,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(err))
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    let email_raw: String = row.get(1)?;
    Ok(User {
        id: row.get(0)?,
        email: Email::parse(&email_raw).map_err(|e| conversion_error(1, e))?,
        username: row.get(2)?,
        is_admin: row.get(3)?,
        is_super_admin: row.get(4)?,
        can_create_cases: row.get(5)?,
        created_at: row.get(6)?,
    })
}

fn case_from_row(row: &Row<'_>) -> rusqlite::Result<Case> {
    let id_raw: String = row.get(0)?;
    Ok(Case {
        id: CaseId::parse(&id_raw).map_err(|e| conversion_error(0, e))?,
        name: row.get(1)?,
        created_by: row.get(2)?,
        created_at: row.get(3)?,
    })
}

fn role_from_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Role> {
    let raw: String = row.get(idx)?;
    Role::parse(&raw).map_err(|e| conversion_error(idx, e))
}

fn case_access_from_row(row: &Row<'_>) -> rusqlite::Result<CaseAccess> {
    let case_raw: String = row.get(1)?;
    Ok(CaseAccess {
        user_id: row.get(0)?,
        case_id: CaseId::parse(&case_raw).map_err(|e| conversion_error(1, e))?,
        role: role_from_column(row, 2)?,
        added_by: row.get(3)?,
        added_at: row.get(4)?,
    })
}

fn admin_access_from_row(row: &Row<'_>) -> rusqlite::Result<AdminCaseAccess> {
    let case_raw: String = row.get(1)?;
    Ok(AdminCaseAccess {
        user_id: row.get(0)?,
        case_id: CaseId::parse(&case_raw).map_err(|e| conversion_error(1, e))?,
        added_by: row.get(2)?,
        added_at: row.get(3)?,
    })
}

fn assistant_from_row(row: &Row<'_>) -> rusqlite::Result<Assistant> {
    let id_raw: String = row.get(0)?;
    let case_raw: String = row.get(1)?;
    Ok(Assistant {
        id: AssistantId::parse(&id_raw).map_err(|e| conversion_error(0, e))?,
        case_id: CaseId::parse(&case_raw).map_err(|e| conversion_error(1, e))?,
        name: row.get(2)?,
        password_sha256: row.get(3)?,
        created_at: row.get(4)?,
    })
}
