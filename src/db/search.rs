use chrono::Utc;
use rusqlite::{Row, params};

use super::{Database, json_column, new_id};
use crate::error::{DbError, DbResult};
use crate::models::SearchRecord;

const SEARCH_COLUMNS: &str = "id, user_id, query, location, filters, results_count, searched_at";

impl Database {
    pub fn record_search(
        &self,
        user_id: &str,
        query: &str,
        location: Option<&str>,
        filters: Option<&serde_json::Value>,
        results_count: Option<i64>,
    ) -> DbResult<SearchRecord> {
        let record = SearchRecord {
            id: new_id(),
            user_id: user_id.to_string(),
            query: query.trim().to_string(),
            location: location.map(str::to_string),
            filters: filters.cloned(),
            results_count,
            searched_at: Utc::now(),
        };
        let filters = filters.map(serde_json::to_string).transpose()?;
        self.conn.execute(
            "INSERT INTO user_search_history (id, user_id, query, location, filters, results_count, searched_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                record.id,
                record.user_id,
                record.query,
                record.location,
                filters,
                record.results_count,
                record.searched_at,
            ],
        )?;
        Ok(record)
    }

    /// Most recent searches first.
    pub fn search_history(&self, user_id: &str, take: usize) -> DbResult<Vec<SearchRecord>> {
        let sql = format!(
            "SELECT {} FROM user_search_history WHERE user_id = ?1
             ORDER BY searched_at DESC, rowid DESC LIMIT ?2",
            SEARCH_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![user_id, take as i64], Self::row_to_search)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }

    pub fn clear_search_history(&self, user_id: &str) -> DbResult<usize> {
        let removed = self
            .conn
            .execute("DELETE FROM user_search_history WHERE user_id = ?1", [user_id])?;
        Ok(removed)
    }

    fn row_to_search(row: &Row) -> rusqlite::Result<SearchRecord> {
        Ok(SearchRecord {
            id: row.get(0)?,
            user_id: row.get(1)?,
            query: row.get(2)?,
            location: row.get(3)?,
            filters: json_column(row.get(4)?)?,
            results_count: row.get(5)?,
            searched_at: row.get(6)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::db::test_support::{db, user};

    #[test]
    fn test_history_is_newest_first_and_limited() {
        let db = db();
        let u = user(&db, "a@example.com");
        for q in ["rust", "  go  ", "zig"] {
            db.record_search(&u.id, q, Some("Remote"), None, Some(10)).unwrap();
        }

        let history = db.search_history(&u.id, 2).unwrap();
        let queries: Vec<_> = history.iter().map(|r| r.query.as_str()).collect();
        assert_eq!(queries, ["zig", "go"]);
        assert_eq!(history[0].location.as_deref(), Some("Remote"));
    }

    #[test]
    fn test_filters_round_trip_and_clear() {
        let db = db();
        let u = user(&db, "a@example.com");
        let filters = serde_json::json!({ "remote": true, "salaryMin": 120000 });
        db.record_search(&u.id, "platform", None, Some(&filters), None).unwrap();

        let history = db.search_history(&u.id, 10).unwrap();
        assert_eq!(history[0].filters.as_ref(), Some(&filters));

        assert_eq!(db.clear_search_history(&u.id).unwrap(), 1);
        assert!(db.search_history(&u.id, 10).unwrap().is_empty());
    }

    #[test]
    fn test_search_requires_existing_user() {
        let db = db();
        let err = db.record_search("ghost", "rust", None, None, None).unwrap_err();
        assert!(matches!(err, crate::error::DbError::ForeignKeyViolation { .. }));
    }
}
