use chrono::Utc;
use rusqlite::{OptionalExtension, Row, ToSql, params, params_from_iter};
use tracing::info;

use super::{Database, new_id};
use crate::error::{DbError, DbResult};
use crate::models::{NewUser, User, UserChanges};
use crate::query::{Page, Query, SortOrder};

const USER_COLUMNS: &str = "id, name, email, email_verified, image, location, remote_preference, \
     salary_min, salary_max, skills, experience_level, email_notifications, job_alerts, \
     created_at, updated_at";

#[derive(Debug, Clone, Default)]
pub struct UserFilter {
    pub location: Option<String>,
    pub remote_preference: Option<bool>,
    pub experience_level: Option<String>,
    pub job_alerts: Option<bool>,
    /// Users whose skills list mentions this text.
    pub skill: Option<String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub enum UserOrder {
    #[default]
    CreatedAt,
    Email,
    Name,
}

impl UserOrder {
    fn column(self) -> &'static str {
        match self {
            UserOrder::CreatedAt => "created_at",
            UserOrder::Email => "email",
            UserOrder::Name => "name",
        }
    }
}

impl UserFilter {
    fn apply(&self, query: Query) -> Query {
        let query = match &self.location {
            Some(loc) => query.eq_ignore_case("location", loc.clone()),
            None => query,
        };
        let query = match &self.experience_level {
            Some(level) => query.eq_ignore_case("experience_level", level.clone()),
            None => query,
        };
        query
            .eq_opt("remote_preference", self.remote_preference)
            .eq_opt("job_alerts", self.job_alerts)
            .contains_opt("skills", self.skill.as_deref())
    }
}

impl Database {
    pub fn create_user(&self, user: &NewUser) -> DbResult<User> {
        let id = new_id();
        let now = Utc::now();
        let skills = serde_json::to_string(&user.skills)?;

        self.conn.execute(
            "INSERT INTO users (id, name, email, image, location, remote_preference, salary_min,
                                salary_max, skills, experience_level, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)",
            params![
                id,
                user.name,
                user.email.trim().to_lowercase(),
                user.image,
                user.location,
                user.remote_preference,
                user.salary_min,
                user.salary_max,
                skills,
                user.experience_level,
                now,
            ],
        )?;

        self.get_user(&id)
    }

    pub fn find_user(&self, id: &str) -> DbResult<Option<User>> {
        let sql = format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS);
        self.conn
            .query_row(&sql, [id], Self::row_to_user)
            .optional()
            .map_err(DbError::from)
    }

    pub fn get_user(&self, id: &str) -> DbResult<User> {
        self.find_user(id)?.ok_or(DbError::not_found("User"))
    }

    pub fn find_user_by_email(&self, email: &str) -> DbResult<Option<User>> {
        // Normalized the same way as on insert; SQLite's LOWER only folds ASCII.
        let sql = format!("SELECT {} FROM users WHERE email = ?1", USER_COLUMNS);
        self.conn
            .query_row(&sql, [email.trim().to_lowercase()], Self::row_to_user)
            .optional()
            .map_err(DbError::from)
    }

    /// Looks a user up by email if `key` looks like one, by id otherwise.
    pub fn find_user_by_key(&self, key: &str) -> DbResult<Option<User>> {
        if key.contains('@') {
            self.find_user_by_email(key)
        } else {
            self.find_user(key)
        }
    }

    pub fn find_users(&self, filter: &UserFilter, order: (UserOrder, SortOrder), page: Page) -> DbResult<Vec<User>> {
        let query = filter
            .apply(Query::new("users", USER_COLUMNS))
            .order_by(order.0.column(), order.1)
            .page(page);
        self.query_all(&query, Self::row_to_user)
    }

    pub fn count_users(&self, filter: &UserFilter) -> DbResult<i64> {
        self.query_count(&filter.apply(Query::new("users", USER_COLUMNS)))
    }

    pub fn update_user(&self, id: &str, changes: &UserChanges) -> DbResult<User> {
        let mut columns: Vec<&'static str> = Vec::new();
        let mut values: Vec<Box<dyn ToSql>> = Vec::new();

        let mut set = |column: &'static str, value: Box<dyn ToSql>| {
            columns.push(column);
            values.push(value);
        };

        if let Some(name) = &changes.name {
            set("name", Box::new(name.clone()));
        }
        if let Some(image) = &changes.image {
            set("image", Box::new(image.clone()));
        }
        if let Some(verified) = changes.email_verified {
            set("email_verified", Box::new(verified));
        }
        if let Some(location) = &changes.location {
            set("location", Box::new(location.clone()));
        }
        if let Some(remote) = changes.remote_preference {
            set("remote_preference", Box::new(remote));
        }
        if let Some(min) = changes.salary_min {
            set("salary_min", Box::new(min));
        }
        if let Some(max) = changes.salary_max {
            set("salary_max", Box::new(max));
        }
        if let Some(skills) = &changes.skills {
            set("skills", Box::new(serde_json::to_string(skills)?));
        }
        if let Some(level) = &changes.experience_level {
            set("experience_level", Box::new(level.clone()));
        }
        if let Some(flag) = changes.email_notifications {
            set("email_notifications", Box::new(flag));
        }
        if let Some(flag) = changes.job_alerts {
            set("job_alerts", Box::new(flag));
        }
        set("updated_at", Box::new(Utc::now()));

        let assignments: Vec<String> = columns
            .iter()
            .enumerate()
            .map(|(i, column)| format!("{} = ?{}", column, i + 1))
            .collect();
        values.push(Box::new(id.to_string()));

        let sql = format!(
            "UPDATE users SET {} WHERE id = ?{}",
            assignments.join(", "),
            values.len()
        );
        let changed = self
            .conn
            .execute(&sql, params_from_iter(values.iter()))?;
        if changed == 0 {
            return Err(DbError::not_found("User"));
        }
        self.get_user(id)
    }

    /// Creates the user, or refreshes name and image if the email exists.
    pub fn upsert_user_by_email(&self, user: &NewUser) -> DbResult<User> {
        match self.find_user_by_email(&user.email)? {
            Some(existing) => self.update_user(
                &existing.id,
                &UserChanges {
                    name: user.name.clone().map(Some),
                    image: user.image.clone().map(Some),
                    ..UserChanges::default()
                },
            ),
            None => self.create_user(user),
        }
    }

    /// Deletes the user; accounts, sessions, saved jobs, applications and
    /// search history go with it.
    pub fn delete_user(&self, id: &str) -> DbResult<User> {
        let user = self.get_user(id)?;
        self.conn.execute("DELETE FROM users WHERE id = ?1", [id])?;
        info!(user_id = %id, "deleted user and dependent rows");
        Ok(user)
    }

    fn row_to_user(row: &Row) -> rusqlite::Result<User> {
        let skills: String = row.get(9)?;
        let skills = serde_json::from_str(&skills).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(9, rusqlite::types::Type::Text, Box::new(e))
        })?;
        Ok(User {
            id: row.get(0)?,
            name: row.get(1)?,
            email: row.get(2)?,
            email_verified: row.get(3)?,
            image: row.get(4)?,
            location: row.get(5)?,
            remote_preference: row.get(6)?,
            salary_min: row.get(7)?,
            salary_max: row.get(8)?,
            skills,
            experience_level: row.get(10)?,
            email_notifications: row.get(11)?,
            job_alerts: row.get(12)?,
            created_at: row.get(13)?,
            updated_at: row.get(14)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::{db, user};
    use crate::models::{NewAccount, NewJobApplication, NewSavedJob};

    #[test]
    fn test_create_and_find_user() {
        let db = db();
        let created = db
            .create_user(&NewUser {
                email: "  Jane@Example.com ".to_string(),
                name: Some("Jane".to_string()),
                skills: vec!["rust".to_string(), "sql".to_string()],
                remote_preference: true,
                ..NewUser::default()
            })
            .unwrap();

        assert_eq!(created.email, "jane@example.com");
        assert!(created.email_notifications);
        assert!(created.job_alerts);
        assert_eq!(created.skills, vec!["rust", "sql"]);

        let found = db.find_user_by_email("JANE@example.com").unwrap().unwrap();
        assert_eq!(found.id, created.id);
        assert_eq!(db.find_user_by_key(&created.id).unwrap().unwrap().email, created.email);
        assert!(db.find_user("nope").unwrap().is_none());
        assert!(db.get_user("nope").unwrap_err().is_not_found());
    }

    #[test]
    fn test_duplicate_email_is_unique_violation() {
        let db = db();
        user(&db, "dup@example.com");
        let err = db
            .create_user(&NewUser {
                email: "DUP@example.com".to_string(),
                ..NewUser::default()
            })
            .unwrap_err();
        assert!(matches!(err, DbError::UniqueViolation { ref target } if target == "users.email"));
    }

    #[test]
    fn test_update_user_changes_only_given_fields() {
        let db = db();
        let created = user(&db, "a@example.com");
        let updated = db
            .update_user(
                &created.id,
                &UserChanges {
                    location: Some(Some("Berlin".to_string())),
                    job_alerts: Some(false),
                    ..UserChanges::default()
                },
            )
            .unwrap();

        assert_eq!(updated.location.as_deref(), Some("Berlin"));
        assert!(!updated.job_alerts);
        assert_eq!(updated.name, created.name);
        assert!(updated.updated_at >= created.updated_at);

        let missing = db.update_user("nope", &UserChanges::default()).unwrap_err();
        assert!(missing.is_not_found());
    }

    #[test]
    fn test_update_user_can_clear_nullable_columns() {
        let db = db();
        let created = db
            .create_user(&NewUser {
                email: "a@example.com".to_string(),
                name: Some("Ada".to_string()),
                location: Some("Paris".to_string()),
                salary_min: Some(90_000),
                ..NewUser::default()
            })
            .unwrap();

        let cleared = db
            .update_user(
                &created.id,
                &UserChanges {
                    location: Some(None),
                    salary_min: Some(None),
                    ..UserChanges::default()
                },
            )
            .unwrap();
        assert_eq!(cleared.location, None);
        assert_eq!(cleared.salary_min, None);
        assert_eq!(cleared.name.as_deref(), Some("Ada"));
    }

    #[test]
    fn test_non_ascii_email_round_trips() {
        let db = db();
        let created = db
            .create_user(&NewUser {
                email: "ÉLODIE@example.com".to_string(),
                ..NewUser::default()
            })
            .unwrap();
        assert_eq!(created.email, "élodie@example.com");

        let found = db.find_user_by_email("ÉLODIE@example.com").unwrap().unwrap();
        assert_eq!(found.id, created.id);
        assert_eq!(db.find_user_by_key("Élodie@Example.com").unwrap().unwrap().id, created.id);

        let upserted = db
            .upsert_user_by_email(&NewUser {
                email: "ÉLODIE@example.com".to_string(),
                name: Some("Élodie".to_string()),
                ..NewUser::default()
            })
            .unwrap();
        assert_eq!(upserted.id, created.id);
        assert_eq!(upserted.name.as_deref(), Some("Élodie"));
    }

    #[test]
    fn test_location_filter_folds_non_ascii_case() {
        let db = db();
        db.create_user(&NewUser {
            email: "a@example.com".to_string(),
            location: Some("Île-de-France".to_string()),
            ..NewUser::default()
        })
        .unwrap();

        let filter = UserFilter {
            location: Some("ÎLE-DE-FRANCE".to_string()),
            ..UserFilter::default()
        };
        assert_eq!(db.count_users(&filter).unwrap(), 1);
    }

    #[test]
    fn test_upsert_user_by_email() {
        let db = db();
        let first = db
            .upsert_user_by_email(&NewUser {
                email: "u@example.com".to_string(),
                name: Some("Old".to_string()),
                ..NewUser::default()
            })
            .unwrap();
        let second = db
            .upsert_user_by_email(&NewUser {
                email: "u@example.com".to_string(),
                name: Some("New".to_string()),
                ..NewUser::default()
            })
            .unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.name.as_deref(), Some("New"));
        assert_eq!(db.count_users(&UserFilter::default()).unwrap(), 1);
    }

    #[test]
    fn test_find_users_filters_and_paginates() {
        let db = db();
        for (email, remote) in [("a@x.io", true), ("b@x.io", false), ("c@x.io", true), ("d@x.io", true)] {
            db.create_user(&NewUser {
                email: email.to_string(),
                remote_preference: remote,
                ..NewUser::default()
            })
            .unwrap();
        }

        let remote = UserFilter {
            remote_preference: Some(true),
            ..UserFilter::default()
        };
        assert_eq!(db.count_users(&remote).unwrap(), 3);

        let first = db
            .find_users(&remote, (UserOrder::Email, SortOrder::Asc), Page::take(2))
            .unwrap();
        let emails: Vec<_> = first.iter().map(|u| u.email.as_str()).collect();
        assert_eq!(emails, ["a@x.io", "c@x.io"]);

        let next = db
            .find_users(&remote, (UserOrder::Email, SortOrder::Asc), Page::after(first[1].id.clone(), 2))
            .unwrap();
        let emails: Vec<_> = next.iter().map(|u| u.email.as_str()).collect();
        assert_eq!(emails, ["d@x.io"]);

        let unknown_cursor = db
            .find_users(&remote, (UserOrder::Email, SortOrder::Asc), Page::after("missing", 2))
            .unwrap();
        assert!(unknown_cursor.is_empty());
    }

    #[test]
    fn test_delete_user_cascades() {
        let db = db();
        let owner = user(&db, "owner@example.com");
        let other = user(&db, "other@example.com");

        for u in [&owner, &other] {
            db.link_account(&NewAccount {
                user_id: u.id.clone(),
                account_type: "oauth".to_string(),
                provider: "github".to_string(),
                provider_account_id: u.email.clone(),
                ..NewAccount::default()
            })
            .unwrap();
            db.create_session(&u.id, chrono::Duration::days(30)).unwrap();
            db.save_job(&NewSavedJob {
                user_id: u.id.clone(),
                job_id: "j1".to_string(),
                title: "Engineer".to_string(),
                ..NewSavedJob::default()
            })
            .unwrap();
            db.create_application(&NewJobApplication {
                user_id: u.id.clone(),
                job_id: "j1".to_string(),
                job_title: "Engineer".to_string(),
                ..NewJobApplication::default()
            })
            .unwrap();
            db.record_search(&u.id, "rust", None, None, Some(3)).unwrap();
        }

        db.delete_user(&owner.id).unwrap();

        for table in ["accounts", "sessions", "saved_jobs", "job_applications", "user_search_history"] {
            let sql = format!("SELECT COUNT(*) FROM {} WHERE user_id = ?1", table);
            let owner_rows: i64 = db.conn.query_row(&sql, [&owner.id], |r| r.get(0)).unwrap();
            let other_rows: i64 = db.conn.query_row(&sql, [&other.id], |r| r.get(0)).unwrap();
            assert_eq!(owner_rows, 0, "{} rows left behind", table);
            assert_eq!(other_rows, 1, "{} rows of another user touched", table);
        }
        assert!(db.delete_user(&owner.id).unwrap_err().is_not_found());
    }
}
