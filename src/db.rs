use rusqlite::functions::FunctionFlags;
use rusqlite::{Connection, Row, params_from_iter};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{DbError, DbResult};
use crate::query::Query;

mod auth;
mod jobs;
mod search;
mod users;

pub use jobs::{ApplicationFilter, ApplicationOrder, SavedJobFilter, SavedJobOrder};
pub use users::{UserFilter, UserOrder};

pub struct Database {
    conn: Connection,
    path: PathBuf,
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    name TEXT,
    email TEXT NOT NULL UNIQUE,
    email_verified TEXT,
    image TEXT,
    location TEXT,
    remote_preference INTEGER NOT NULL DEFAULT 0,
    salary_min INTEGER,
    salary_max INTEGER,
    skills TEXT NOT NULL DEFAULT '[]',
    experience_level TEXT,
    email_notifications INTEGER NOT NULL DEFAULT 1,
    job_alerts INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS accounts (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    type TEXT NOT NULL,
    provider TEXT NOT NULL,
    provider_account_id TEXT NOT NULL,
    refresh_token TEXT,
    access_token TEXT,
    expires_at INTEGER,
    token_type TEXT,
    scope TEXT,
    id_token TEXT,
    session_state TEXT,
    UNIQUE (provider, provider_account_id)
);

CREATE TABLE IF NOT EXISTS sessions (
    id TEXT PRIMARY KEY,
    session_token TEXT NOT NULL UNIQUE,
    user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    expires TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS verification_tokens (
    identifier TEXT NOT NULL,
    token TEXT NOT NULL UNIQUE,
    expires TEXT NOT NULL,
    UNIQUE (identifier, token)
);

CREATE TABLE IF NOT EXISTS saved_jobs (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    job_id TEXT NOT NULL,
    title TEXT NOT NULL,
    company TEXT,
    location TEXT,
    salary_min INTEGER,
    salary_max INTEGER,
    url TEXT,
    remote INTEGER NOT NULL DEFAULT 0,
    description TEXT,
    job_data TEXT,
    saved_at TEXT NOT NULL,
    UNIQUE (user_id, job_id)
);

CREATE TABLE IF NOT EXISTS job_applications (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    job_id TEXT NOT NULL,
    job_title TEXT NOT NULL,
    company TEXT,
    status TEXT NOT NULL DEFAULT 'APPLIED'
        CHECK (status IN ('APPLIED', 'VIEWED', 'INTERVIEWING', 'REJECTED', 'HIRED')),
    applied_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    follow_up_at TEXT,
    notes TEXT
);

CREATE TABLE IF NOT EXISTS user_search_history (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    query TEXT NOT NULL,
    location TEXT,
    filters TEXT,
    results_count INTEGER,
    searched_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_accounts_user ON accounts(user_id);
CREATE INDEX IF NOT EXISTS idx_sessions_user ON sessions(user_id);
CREATE INDEX IF NOT EXISTS idx_saved_jobs_user ON saved_jobs(user_id);
CREATE INDEX IF NOT EXISTS idx_applications_user ON job_applications(user_id);
CREATE INDEX IF NOT EXISTS idx_applications_status ON job_applications(status);
CREATE INDEX IF NOT EXISTS idx_search_history_user ON user_search_history(user_id);
"#;

impl Database {
    pub fn open(path: &Path) -> DbResult<Self> {
        let conn = Connection::open(path)?;
        Self::with_connection(conn, path.to_path_buf())
    }

    pub fn open_in_memory() -> DbResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::with_connection(conn, PathBuf::from(":memory:"))
    }

    fn with_connection(conn: Connection, path: PathBuf) -> DbResult<Self> {
        // Cascades and FK checks are off by default in SQLite.
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        // Unicode lowercase; the built-in LOWER only folds ASCII.
        conn.create_scalar_function(
            "casefold",
            1,
            FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
            |ctx| Ok(ctx.get::<Option<String>>(0)?.map(|s| s.to_lowercase())),
        )?;
        debug!(path = %path.display(), "opened database");
        Ok(Self { conn, path })
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    pub fn init(&self) -> DbResult<()> {
        self.conn.execute_batch(SCHEMA)?;
        info!(path = %self.path.display(), "schema initialized");
        Ok(())
    }

    pub fn ensure_initialized(&self) -> anyhow::Result<()> {
        let tables: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='users'",
            [],
            |row| row.get(0),
        )?;
        if tables == 0 {
            anyhow::bail!("Database not initialized. Run 'jobsearch init' first.");
        }
        Ok(())
    }

    /// Runs `f` inside a transaction: committed if it returns `Ok`, rolled
    /// back otherwise. Inside an open transaction this becomes a savepoint,
    /// so operations that batch their own statements compose.
    pub fn transaction<T, F>(&self, f: F) -> DbResult<T>
    where
        F: FnOnce(&Self) -> DbResult<T>,
    {
        if !self.conn.is_autocommit() {
            return self.savepoint(f);
        }
        let tx = self.conn.unchecked_transaction()?;
        match f(self) {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(e) => {
                debug!(error = %e, "rolling back transaction");
                tx.rollback()?;
                Err(e)
            }
        }
    }

    fn savepoint<T, F>(&self, f: F) -> DbResult<T>
    where
        F: FnOnce(&Self) -> DbResult<T>,
    {
        self.conn.execute_batch("SAVEPOINT nested")?;
        match f(self) {
            Ok(value) => {
                self.conn.execute_batch("RELEASE nested")?;
                Ok(value)
            }
            Err(e) => {
                debug!(error = %e, "rolling back to savepoint");
                self.conn.execute_batch("ROLLBACK TO nested; RELEASE nested")?;
                Err(e)
            }
        }
    }

    fn query_all<T, F>(&self, query: &Query, map: F) -> DbResult<Vec<T>>
    where
        F: FnMut(&Row) -> rusqlite::Result<T>,
    {
        let (sql, params) = query.select_sql();
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(params.iter()), map)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }

    fn query_count(&self, query: &Query) -> DbResult<i64> {
        let (sql, params) = query.count_sql();
        let count = self
            .conn
            .query_row(&sql, params_from_iter(params.iter()), |row| row.get(0))?;
        Ok(count)
    }
}

pub(crate) fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

pub(crate) fn json_column(value: Option<String>) -> rusqlite::Result<Option<serde_json::Value>> {
    value
        .map(|text| serde_json::from_str(&text))
        .transpose()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e)))
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::models::{NewAccount, NewSavedJob};

    #[test]
    fn test_init_is_idempotent() {
        let db = db();
        db.init().unwrap();
        db.ensure_initialized().unwrap();
    }

    #[test]
    fn test_ensure_initialized_fails_on_empty_db() {
        let db = Database::open_in_memory().unwrap();
        let err = db.ensure_initialized().unwrap_err();
        assert!(err.to_string().contains("jobsearch init"));
    }

    #[test]
    fn test_transaction_commits_on_ok() {
        let db = db();
        let user = user(&db, "a@example.com");
        db.transaction(|db| {
            db.save_job(&NewSavedJob {
                user_id: user.id.clone(),
                job_id: "j1".to_string(),
                title: "Rust Engineer".to_string(),
                ..NewSavedJob::default()
            })
        })
        .unwrap();
        assert!(db.find_saved_job(&user.id, "j1").unwrap().is_some());
    }

    #[test]
    fn test_transaction_rolls_back_everything_on_error() {
        let db = db();
        let user = user(&db, "a@example.com");
        let account = NewAccount {
            user_id: user.id.clone(),
            account_type: "oauth".to_string(),
            provider: "github".to_string(),
            provider_account_id: "42".to_string(),
            ..NewAccount::default()
        };

        let err = db
            .transaction(|db| {
                db.link_account(&account)?;
                db.link_account(&account)
            })
            .unwrap_err();

        assert!(err.is_unique_violation());
        assert!(db.find_account("github", "42").unwrap().is_none());
    }

    #[test]
    fn test_nested_transaction_rolls_back_only_inner_work() {
        let db = db();
        let user = user(&db, "a@example.com");
        let job = |job_id: &str| NewSavedJob {
            user_id: user.id.clone(),
            job_id: job_id.to_string(),
            title: "Rust Engineer".to_string(),
            ..NewSavedJob::default()
        };

        db.transaction(|db| {
            db.save_job(&job("outer"))?;
            let inner = db.transaction(|db| {
                db.save_job(&job("inner"))?;
                db.save_job(&job("inner"))
            });
            assert!(inner.unwrap_err().is_unique_violation());
            Ok(())
        })
        .unwrap();

        assert!(db.find_saved_job(&user.id, "outer").unwrap().is_some());
        assert!(db.find_saved_job(&user.id, "inner").unwrap().is_none());
    }

    #[test]
    fn test_foreign_keys_are_enforced() {
        let db = db();
        let err = db
            .save_job(&NewSavedJob {
                user_id: "missing".to_string(),
                job_id: "j1".to_string(),
                title: "Ghost".to_string(),
                ..NewSavedJob::default()
            })
            .unwrap_err();
        assert!(matches!(err, DbError::ForeignKeyViolation { .. }));
    }
}
