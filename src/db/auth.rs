use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use rand::distributions::Alphanumeric;
use rusqlite::{OptionalExtension, Row, params};
use tracing::debug;

use super::{Database, new_id};
use crate::error::{DbError, DbResult};
use crate::models::{Account, NewAccount, Session, User, VerificationToken};

const ACCOUNT_COLUMNS: &str = "id, user_id, type, provider, provider_account_id, refresh_token, \
     access_token, expires_at, token_type, scope, id_token, session_state";

const SESSION_COLUMNS: &str = "id, session_token, user_id, expires";

fn expires_in(max_age: Duration) -> DbResult<DateTime<Utc>> {
    Utc::now()
        .checked_add_signed(max_age)
        .ok_or_else(|| DbError::InvalidInput(format!("lifetime of {} seconds is out of range", max_age.num_seconds())))
}

fn random_token(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

impl Database {
    // --- Accounts ---

    pub fn link_account(&self, account: &NewAccount) -> DbResult<Account> {
        let id = new_id();
        self.conn.execute(
            "INSERT INTO accounts (id, user_id, type, provider, provider_account_id, refresh_token,
                                   access_token, expires_at, token_type, scope, id_token, session_state)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                id,
                account.user_id,
                account.account_type,
                account.provider,
                account.provider_account_id,
                account.refresh_token,
                account.access_token,
                account.expires_at,
                account.token_type,
                account.scope,
                account.id_token,
                account.session_state,
            ],
        )?;
        debug!(provider = %account.provider, user_id = %account.user_id, "linked account");
        self.find_account(&account.provider, &account.provider_account_id)?
            .ok_or(DbError::not_found("Account"))
    }

    /// Links the account, or refreshes its tokens when the
    /// (provider, provider_account_id) pair is already known.
    pub fn upsert_account(&self, account: &NewAccount) -> DbResult<Account> {
        self.conn.execute(
            "INSERT INTO accounts (id, user_id, type, provider, provider_account_id, refresh_token,
                                   access_token, expires_at, token_type, scope, id_token, session_state)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
             ON CONFLICT (provider, provider_account_id) DO UPDATE SET
                refresh_token = excluded.refresh_token,
                access_token = excluded.access_token,
                expires_at = excluded.expires_at,
                token_type = excluded.token_type,
                scope = excluded.scope,
                id_token = excluded.id_token,
                session_state = excluded.session_state",
            params![
                new_id(),
                account.user_id,
                account.account_type,
                account.provider,
                account.provider_account_id,
                account.refresh_token,
                account.access_token,
                account.expires_at,
                account.token_type,
                account.scope,
                account.id_token,
                account.session_state,
            ],
        )?;
        self.find_account(&account.provider, &account.provider_account_id)?
            .ok_or(DbError::not_found("Account"))
    }

    pub fn find_account(&self, provider: &str, provider_account_id: &str) -> DbResult<Option<Account>> {
        let sql = format!(
            "SELECT {} FROM accounts WHERE provider = ?1 AND provider_account_id = ?2",
            ACCOUNT_COLUMNS
        );
        self.conn
            .query_row(&sql, params![provider, provider_account_id], Self::row_to_account)
            .optional()
            .map_err(DbError::from)
    }

    pub fn list_accounts(&self, user_id: &str) -> DbResult<Vec<Account>> {
        let sql = format!(
            "SELECT {} FROM accounts WHERE user_id = ?1 ORDER BY provider",
            ACCOUNT_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([user_id], Self::row_to_account)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }

    pub fn unlink_account(&self, provider: &str, provider_account_id: &str) -> DbResult<Account> {
        let account = self
            .find_account(provider, provider_account_id)?
            .ok_or(DbError::not_found("Account"))?;
        self.conn
            .execute("DELETE FROM accounts WHERE id = ?1", [&account.id])?;
        Ok(account)
    }

    fn row_to_account(row: &Row) -> rusqlite::Result<Account> {
        Ok(Account {
            id: row.get(0)?,
            user_id: row.get(1)?,
            account_type: row.get(2)?,
            provider: row.get(3)?,
            provider_account_id: row.get(4)?,
            refresh_token: row.get(5)?,
            access_token: row.get(6)?,
            expires_at: row.get(7)?,
            token_type: row.get(8)?,
            scope: row.get(9)?,
            id_token: row.get(10)?,
            session_state: row.get(11)?,
        })
    }

    // --- Sessions ---

    pub fn create_session(&self, user_id: &str, max_age: Duration) -> DbResult<Session> {
        let session = Session {
            id: new_id(),
            session_token: uuid::Uuid::new_v4().simple().to_string(),
            user_id: user_id.to_string(),
            expires: expires_in(max_age)?,
        };
        self.conn.execute(
            "INSERT INTO sessions (id, session_token, user_id, expires) VALUES (?1, ?2, ?3, ?4)",
            params![session.id, session.session_token, session.user_id, session.expires],
        )?;
        Ok(session)
    }

    pub fn find_session(&self, session_token: &str) -> DbResult<Option<Session>> {
        let sql = format!("SELECT {} FROM sessions WHERE session_token = ?1", SESSION_COLUMNS);
        self.conn
            .query_row(&sql, [session_token], Self::row_to_session)
            .optional()
            .map_err(DbError::from)
    }

    /// Resolves a live session to its user. Expired sessions resolve to `None`.
    pub fn find_session_and_user(&self, session_token: &str, now: DateTime<Utc>) -> DbResult<Option<(Session, User)>> {
        let Some(session) = self.find_session(session_token)? else {
            return Ok(None);
        };
        if session.expires <= now {
            return Ok(None);
        }
        let user = self.get_user(&session.user_id)?;
        Ok(Some((session, user)))
    }

    pub fn update_session_expiry(&self, session_token: &str, expires: DateTime<Utc>) -> DbResult<Session> {
        let changed = self.conn.execute(
            "UPDATE sessions SET expires = ?1 WHERE session_token = ?2",
            params![expires, session_token],
        )?;
        if changed == 0 {
            return Err(DbError::not_found("Session"));
        }
        self.find_session(session_token)?
            .ok_or(DbError::not_found("Session"))
    }

    pub fn delete_session(&self, session_token: &str) -> DbResult<Session> {
        let session = self
            .find_session(session_token)?
            .ok_or(DbError::not_found("Session"))?;
        self.conn
            .execute("DELETE FROM sessions WHERE id = ?1", [&session.id])?;
        Ok(session)
    }

    pub fn list_sessions(&self, user_id: &str) -> DbResult<Vec<Session>> {
        let sql = format!(
            "SELECT {} FROM sessions WHERE user_id = ?1 ORDER BY expires DESC",
            SESSION_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([user_id], Self::row_to_session)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }

    pub fn delete_expired_sessions(&self, now: DateTime<Utc>) -> DbResult<usize> {
        let removed = self
            .conn
            .execute("DELETE FROM sessions WHERE expires <= ?1", [now])?;
        debug!(removed, "purged expired sessions");
        Ok(removed)
    }

    fn row_to_session(row: &Row) -> rusqlite::Result<Session> {
        Ok(Session {
            id: row.get(0)?,
            session_token: row.get(1)?,
            user_id: row.get(2)?,
            expires: row.get(3)?,
        })
    }

    // --- Verification tokens ---

    pub fn create_verification_token(&self, identifier: &str, max_age: Duration) -> DbResult<VerificationToken> {
        let token = VerificationToken {
            identifier: identifier.to_string(),
            token: random_token(48),
            expires: expires_in(max_age)?,
        };
        self.conn.execute(
            "INSERT INTO verification_tokens (identifier, token, expires) VALUES (?1, ?2, ?3)",
            params![token.identifier, token.token, token.expires],
        )?;
        Ok(token)
    }

    /// Consumes a token: it is deleted whether or not it is still valid, and
    /// only a live token is returned.
    pub fn use_verification_token(
        &self,
        identifier: &str,
        token: &str,
        now: DateTime<Utc>,
    ) -> DbResult<Option<VerificationToken>> {
        self.transaction(|db| {
            let found = db
                .conn
                .query_row(
                    "SELECT identifier, token, expires FROM verification_tokens
                     WHERE identifier = ?1 AND token = ?2",
                    params![identifier, token],
                    |row| {
                        Ok(VerificationToken {
                            identifier: row.get(0)?,
                            token: row.get(1)?,
                            expires: row.get(2)?,
                        })
                    },
                )
                .optional()?;

            let Some(found) = found else {
                return Ok(None);
            };
            db.conn.execute(
                "DELETE FROM verification_tokens WHERE identifier = ?1 AND token = ?2",
                params![identifier, token],
            )?;
            Ok((found.expires > now).then_some(found))
        })
    }

    pub fn delete_expired_verification_tokens(&self, now: DateTime<Utc>) -> DbResult<usize> {
        let removed = self
            .conn
            .execute("DELETE FROM verification_tokens WHERE expires <= ?1", [now])?;
        Ok(removed)
    }
}
