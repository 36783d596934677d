use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, Row, params};
use tracing::debug;

use super::{Database, json_column, new_id};
use crate::error::{DbError, DbResult};
use crate::models::{
    ApplicationStatus, JobApplication, NewJobApplication, NewSavedJob, SalaryStats, SavedJob,
};
use crate::query::{Page, Query, SortOrder};

const SAVED_JOB_COLUMNS: &str = "id, user_id, job_id, title, company, location, salary_min, \
     salary_max, url, remote, description, job_data, saved_at";

const APPLICATION_COLUMNS: &str = "id, user_id, job_id, job_title, company, status, applied_at, \
     updated_at, follow_up_at, notes";

#[derive(Debug, Clone, Default)]
pub struct SavedJobFilter {
    pub user_id: Option<String>,
    pub company: Option<String>,
    pub title_contains: Option<String>,
    pub remote: Option<bool>,
    /// Listings whose upper salary bound reaches at least this much.
    pub min_salary: Option<i64>,
    /// Listings whose lower salary bound is at most this much.
    pub max_salary: Option<i64>,
}

impl SavedJobFilter {
    pub fn for_user(user_id: &str) -> Self {
        Self {
            user_id: Some(user_id.to_string()),
            ..Self::default()
        }
    }

    fn apply(&self, query: Query) -> Query {
        let query = query
            .eq_opt("user_id", self.user_id.clone())
            .eq_opt("remote", self.remote)
            .contains_opt("title", self.title_contains.as_deref());
        let query = match &self.company {
            Some(company) => query.eq_ignore_case("company", company.clone()),
            None => query,
        };
        let query = match self.min_salary {
            Some(min) => query.gte("COALESCE(salary_max, salary_min)", min),
            None => query,
        };
        match self.max_salary {
            Some(max) => query.lte("COALESCE(salary_min, salary_max)", max),
            None => query,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub enum SavedJobOrder {
    #[default]
    SavedAt,
    Title,
    SalaryMax,
}

impl SavedJobOrder {
    fn column(self) -> &'static str {
        match self {
            SavedJobOrder::SavedAt => "saved_at",
            SavedJobOrder::Title => "title",
            SavedJobOrder::SalaryMax => "salary_max",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ApplicationFilter {
    pub user_id: Option<String>,
    pub status: Option<ApplicationStatus>,
    pub company: Option<String>,
}

impl ApplicationFilter {
    pub fn for_user(user_id: &str) -> Self {
        Self {
            user_id: Some(user_id.to_string()),
            ..Self::default()
        }
    }

    fn apply(&self, query: Query) -> Query {
        let query = query
            .eq_opt("user_id", self.user_id.clone())
            .eq_opt("status", self.status.map(|s| s.as_str().to_string()));
        match &self.company {
            Some(company) => query.eq_ignore_case("company", company.clone()),
            None => query,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub enum ApplicationOrder {
    #[default]
    AppliedAt,
    UpdatedAt,
    Status,
}

impl ApplicationOrder {
    fn column(self) -> &'static str {
        match self {
            ApplicationOrder::AppliedAt => "applied_at",
            ApplicationOrder::UpdatedAt => "updated_at",
            ApplicationOrder::Status => "status",
        }
    }
}

impl Database {
    // --- Saved jobs ---

    /// Bookmarks a listing. Saving the same job twice for one user fails
    /// with a unique violation on (user_id, job_id).
    pub fn save_job(&self, job: &NewSavedJob) -> DbResult<SavedJob> {
        let job_data = job.job_data.as_ref().map(serde_json::to_string).transpose()?;
        self.conn.execute(
            "INSERT INTO saved_jobs (id, user_id, job_id, title, company, location, salary_min,
                                     salary_max, url, remote, description, job_data, saved_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                new_id(),
                job.user_id,
                job.job_id,
                job.title,
                job.company,
                job.location,
                job.salary_min,
                job.salary_max,
                job.url,
                job.remote,
                job.description,
                job_data,
                Utc::now(),
            ],
        )?;
        self.get_saved_job(&job.user_id, &job.job_id)
    }

    /// Saves the listing, or refreshes the stored snapshot if already saved.
    pub fn upsert_saved_job(&self, job: &NewSavedJob) -> DbResult<SavedJob> {
        let job_data = job.job_data.as_ref().map(serde_json::to_string).transpose()?;
        self.conn.execute(
            "INSERT INTO saved_jobs (id, user_id, job_id, title, company, location, salary_min,
                                     salary_max, url, remote, description, job_data, saved_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
             ON CONFLICT (user_id, job_id) DO UPDATE SET
                title = excluded.title,
                company = excluded.company,
                location = excluded.location,
                salary_min = excluded.salary_min,
                salary_max = excluded.salary_max,
                url = excluded.url,
                remote = excluded.remote,
                description = excluded.description,
                job_data = excluded.job_data",
            params![
                new_id(),
                job.user_id,
                job.job_id,
                job.title,
                job.company,
                job.location,
                job.salary_min,
                job.salary_max,
                job.url,
                job.remote,
                job.description,
                job_data,
                Utc::now(),
            ],
        )?;
        self.get_saved_job(&job.user_id, &job.job_id)
    }

    pub fn find_saved_job(&self, user_id: &str, job_id: &str) -> DbResult<Option<SavedJob>> {
        let sql = format!(
            "SELECT {} FROM saved_jobs WHERE user_id = ?1 AND job_id = ?2",
            SAVED_JOB_COLUMNS
        );
        self.conn
            .query_row(&sql, params![user_id, job_id], Self::row_to_saved_job)
            .optional()
            .map_err(DbError::from)
    }

    pub fn get_saved_job(&self, user_id: &str, job_id: &str) -> DbResult<SavedJob> {
        self.find_saved_job(user_id, job_id)?
            .ok_or(DbError::not_found("SavedJob"))
    }

    pub fn find_saved_jobs(
        &self,
        filter: &SavedJobFilter,
        order: (SavedJobOrder, SortOrder),
        page: Page,
    ) -> DbResult<Vec<SavedJob>> {
        let query = filter
            .apply(Query::new("saved_jobs", SAVED_JOB_COLUMNS))
            .order_by(order.0.column(), order.1)
            .page(page);
        self.query_all(&query, Self::row_to_saved_job)
    }

    pub fn count_saved_jobs(&self, filter: &SavedJobFilter) -> DbResult<i64> {
        self.query_count(&filter.apply(Query::new("saved_jobs", SAVED_JOB_COLUMNS)))
    }

    pub fn delete_saved_job(&self, user_id: &str, job_id: &str) -> DbResult<SavedJob> {
        let job = self.get_saved_job(user_id, job_id)?;
        self.conn
            .execute("DELETE FROM saved_jobs WHERE id = ?1", [&job.id])?;
        Ok(job)
    }

    pub fn saved_job_salary_stats(&self, user_id: &str) -> DbResult<SalaryStats> {
        let stats = self.conn.query_row(
            "SELECT COUNT(*), MIN(salary_min), MAX(salary_max), AVG(salary_min), AVG(salary_max)
             FROM saved_jobs WHERE user_id = ?1",
            [user_id],
            |row| {
                Ok(SalaryStats {
                    count: row.get(0)?,
                    lowest_min: row.get(1)?,
                    highest_max: row.get(2)?,
                    avg_min: row.get(3)?,
                    avg_max: row.get(4)?,
                })
            },
        )?;
        Ok(stats)
    }

    fn row_to_saved_job(row: &Row) -> rusqlite::Result<SavedJob> {
        Ok(SavedJob {
            id: row.get(0)?,
            user_id: row.get(1)?,
            job_id: row.get(2)?,
            title: row.get(3)?,
            company: row.get(4)?,
            location: row.get(5)?,
            salary_min: row.get(6)?,
            salary_max: row.get(7)?,
            url: row.get(8)?,
            remote: row.get(9)?,
            description: row.get(10)?,
            job_data: json_column(row.get(11)?)?,
            saved_at: row.get(12)?,
        })
    }

    // --- Applications ---

    pub fn create_application(&self, application: &NewJobApplication) -> DbResult<JobApplication> {
        let id = new_id();
        let now = Utc::now();
        self.conn.execute(
            "INSERT INTO job_applications (id, user_id, job_id, job_title, company, status,
                                           applied_at, updated_at, follow_up_at, notes)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7, ?8, ?9)",
            params![
                id,
                application.user_id,
                application.job_id,
                application.job_title,
                application.company,
                application.status.unwrap_or(ApplicationStatus::Applied),
                now,
                application.follow_up_at,
                application.notes,
            ],
        )?;
        self.get_application(&id)
    }

    pub fn find_application(&self, id: &str) -> DbResult<Option<JobApplication>> {
        let sql = format!("SELECT {} FROM job_applications WHERE id = ?1", APPLICATION_COLUMNS);
        self.conn
            .query_row(&sql, [id], Self::row_to_application)
            .optional()
            .map_err(DbError::from)
    }

    pub fn get_application(&self, id: &str) -> DbResult<JobApplication> {
        self.find_application(id)?
            .ok_or(DbError::not_found("JobApplication"))
    }

    pub fn find_applications(
        &self,
        filter: &ApplicationFilter,
        order: (ApplicationOrder, SortOrder),
        page: Page,
    ) -> DbResult<Vec<JobApplication>> {
        let query = filter
            .apply(Query::new("job_applications", APPLICATION_COLUMNS))
            .order_by(order.0.column(), order.1)
            .page(page);
        self.query_all(&query, Self::row_to_application)
    }

    pub fn count_applications(&self, filter: &ApplicationFilter) -> DbResult<i64> {
        self.query_count(&filter.apply(Query::new("job_applications", APPLICATION_COLUMNS)))
    }

    /// Any status may follow any other; only the value itself is checked.
    pub fn update_application_status(&self, id: &str, status: ApplicationStatus) -> DbResult<JobApplication> {
        let changed = self.conn.execute(
            "UPDATE job_applications SET status = ?1, updated_at = ?2 WHERE id = ?3",
            params![status, Utc::now(), id],
        )?;
        if changed == 0 {
            return Err(DbError::not_found("JobApplication"));
        }
        debug!(application_id = %id, %status, "application status changed");
        self.get_application(id)
    }

    pub fn set_follow_up(&self, id: &str, follow_up_at: Option<DateTime<Utc>>) -> DbResult<JobApplication> {
        let changed = self.conn.execute(
            "UPDATE job_applications SET follow_up_at = ?1, updated_at = ?2 WHERE id = ?3",
            params![follow_up_at, Utc::now(), id],
        )?;
        if changed == 0 {
            return Err(DbError::not_found("JobApplication"));
        }
        self.get_application(id)
    }

    pub fn update_application_notes(&self, id: &str, notes: Option<&str>) -> DbResult<JobApplication> {
        let changed = self.conn.execute(
            "UPDATE job_applications SET notes = ?1, updated_at = ?2 WHERE id = ?3",
            params![notes, Utc::now(), id],
        )?;
        if changed == 0 {
            return Err(DbError::not_found("JobApplication"));
        }
        self.get_application(id)
    }

    pub fn delete_application(&self, id: &str) -> DbResult<JobApplication> {
        let application = self.get_application(id)?;
        self.conn
            .execute("DELETE FROM job_applications WHERE id = ?1", [id])?;
        Ok(application)
    }

    /// Number of applications per status for one user; statuses with no
    /// applications are left out.
    pub fn application_status_counts(&self, user_id: &str) -> DbResult<Vec<(ApplicationStatus, i64)>> {
        let mut stmt = self.conn.prepare(
            "SELECT status, COUNT(*) FROM job_applications
             WHERE user_id = ?1 GROUP BY status",
        )?;
        let rows = stmt.query_map([user_id], |row| Ok((row.get(0)?, row.get(1)?)))?;
        let mut counts = rows.collect::<Result<Vec<(ApplicationStatus, i64)>, _>>()?;
        counts.sort_by_key(|(status, _)| *status);
        Ok(counts)
    }

    /// Open applications whose follow-up date has passed.
    pub fn due_follow_ups(&self, user_id: &str, now: DateTime<Utc>) -> DbResult<Vec<JobApplication>> {
        let sql = format!(
            "SELECT {} FROM job_applications
             WHERE user_id = ?1 AND follow_up_at IS NOT NULL AND follow_up_at <= ?2
               AND status NOT IN ('REJECTED', 'HIRED')
             ORDER BY follow_up_at",
            APPLICATION_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![user_id, now], Self::row_to_application)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }

    fn row_to_application(row: &Row) -> rusqlite::Result<JobApplication> {
        Ok(JobApplication {
            id: row.get(0)?,
            user_id: row.get(1)?,
            job_id: row.get(2)?,
            job_title: row.get(3)?,
            company: row.get(4)?,
            status: row.get(5)?,
            applied_at: row.get(6)?,
            updated_at: row.get(7)?,
            follow_up_at: row.get(8)?,
            notes: row.get(9)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::{db, user};
    use chrono::Duration;

    fn listing(user_id: &str, job_id: &str, title: &str, salary: Option<(i64, i64)>) -> NewSavedJob {
        NewSavedJob {
            user_id: user_id.to_string(),
            job_id: job_id.to_string(),
            title: title.to_string(),
            company: Some("Acme".to_string()),
            salary_min: salary.map(|s| s.0),
            salary_max: salary.map(|s| s.1),
            ..NewSavedJob::default()
        }
    }

    fn application(user_id: &str, job_id: &str) -> NewJobApplication {
        NewJobApplication {
            user_id: user_id.to_string(),
            job_id: job_id.to_string(),
            job_title: format!("Job {}", job_id),
            ..NewJobApplication::default()
        }
    }

    #[test]
    fn test_duplicate_saved_job_is_unique_violation() {
        let db = db();
        let u = user(&db, "a@example.com");
        db.save_job(&listing(&u.id, "j1", "Rust Engineer", None)).unwrap();

        let err = db.save_job(&listing(&u.id, "j1", "Rust Engineer", None)).unwrap_err();
        assert!(err.is_known());
        assert!(matches!(
            err,
            DbError::UniqueViolation { ref target }
                if target == "saved_jobs.user_id, saved_jobs.job_id"
        ));

        // Another user may save the same listing.
        let other = user(&db, "b@example.com");
        db.save_job(&listing(&other.id, "j1", "Rust Engineer", None)).unwrap();
    }

    #[test]
    fn test_upsert_saved_job_refreshes_snapshot() {
        let db = db();
        let u = user(&db, "a@example.com");
        let first = db.upsert_saved_job(&listing(&u.id, "j1", "Old title", None)).unwrap();

        let mut newer = listing(&u.id, "j1", "New title", Some((100_000, 150_000)));
        newer.job_data = Some(serde_json::json!({ "source": "board", "tags": ["rust"] }));
        let second = db.upsert_saved_job(&newer).unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.title, "New title");
        assert_eq!(second.job_data.unwrap()["tags"][0], "rust");
        assert_eq!(db.count_saved_jobs(&SavedJobFilter::for_user(&u.id)).unwrap(), 1);
    }

    #[test]
    fn test_find_saved_jobs_filters_and_orders() {
        let db = db();
        let u = user(&db, "a@example.com");
        db.save_job(&listing(&u.id, "j1", "Rust Engineer", Some((120_000, 160_000)))).unwrap();
        db.save_job(&listing(&u.id, "j2", "Go Engineer", Some((90_000, 110_000)))).unwrap();
        db.save_job(&listing(&u.id, "j3", "Staff Rust Engineer", None)).unwrap();

        let rust = SavedJobFilter {
            title_contains: Some("rust".to_string()),
            ..SavedJobFilter::for_user(&u.id)
        };
        let titles: Vec<String> = db
            .find_saved_jobs(&rust, (SavedJobOrder::Title, SortOrder::Asc), Page::default())
            .unwrap()
            .into_iter()
            .map(|j| j.title)
            .collect();
        assert_eq!(titles, ["Rust Engineer", "Staff Rust Engineer"]);

        let well_paid = SavedJobFilter {
            min_salary: Some(150_000),
            ..SavedJobFilter::for_user(&u.id)
        };
        assert_eq!(db.count_saved_jobs(&well_paid).unwrap(), 1);

        let affordable = SavedJobFilter {
            max_salary: Some(100_000),
            ..SavedJobFilter::for_user(&u.id)
        };
        let titles: Vec<String> = db
            .find_saved_jobs(&affordable, (SavedJobOrder::SalaryMax, SortOrder::Desc), Page::default())
            .unwrap()
            .into_iter()
            .map(|j| j.title)
            .collect();
        assert_eq!(titles, ["Go Engineer"]);

        let by_company = SavedJobFilter {
            company: Some("ACME".to_string()),
            ..SavedJobFilter::for_user(&u.id)
        };
        assert_eq!(db.count_saved_jobs(&by_company).unwrap(), 3);
    }

    #[test]
    fn test_salary_stats_aggregate() {
        let db = db();
        let u = user(&db, "a@example.com");
        assert_eq!(db.saved_job_salary_stats(&u.id).unwrap(), SalaryStats::default());

        db.save_job(&listing(&u.id, "j1", "A", Some((100_000, 140_000)))).unwrap();
        db.save_job(&listing(&u.id, "j2", "B", Some((80_000, 120_000)))).unwrap();
        db.save_job(&listing(&u.id, "j3", "C", None)).unwrap();

        let stats = db.saved_job_salary_stats(&u.id).unwrap();
        assert_eq!(stats.count, 3);
        assert_eq!(stats.lowest_min, Some(80_000));
        assert_eq!(stats.highest_max, Some(140_000));
        assert_eq!(stats.avg_min, Some(90_000.0));
        assert_eq!(stats.avg_max, Some(130_000.0));
    }

    #[test]
    fn test_delete_saved_job() {
        let db = db();
        let u = user(&db, "a@example.com");
        db.save_job(&listing(&u.id, "j1", "A", None)).unwrap();
        db.delete_saved_job(&u.id, "j1").unwrap();
        assert!(db.find_saved_job(&u.id, "j1").unwrap().is_none());
        assert!(db.delete_saved_job(&u.id, "j1").unwrap_err().is_not_found());
    }

    #[test]
    fn test_application_defaults_to_applied_and_moves_freely() {
        let db = db();
        let u = user(&db, "a@example.com");
        let created = db.create_application(&application(&u.id, "j1")).unwrap();
        assert_eq!(created.status, ApplicationStatus::Applied);
        assert_eq!(created.applied_at, created.updated_at);

        // No enforced state machine: HIRED straight back to VIEWED is allowed.
        let hired = db.update_application_status(&created.id, ApplicationStatus::Hired).unwrap();
        assert_eq!(hired.status, ApplicationStatus::Hired);
        let viewed = db.update_application_status(&created.id, ApplicationStatus::Viewed).unwrap();
        assert_eq!(viewed.status, ApplicationStatus::Viewed);
        assert!(viewed.updated_at >= created.updated_at);

        let missing = db.update_application_status("nope", ApplicationStatus::Hired).unwrap_err();
        assert!(missing.is_not_found());
    }

    #[test]
    fn test_status_outside_enum_is_rejected_by_schema() {
        let db = db();
        let u = user(&db, "a@example.com");
        let err: DbError = db
            .conn
            .execute(
                "INSERT INTO job_applications (id, user_id, job_id, job_title, status, applied_at, updated_at)
                 VALUES ('x', ?1, 'j1', 'Job', 'PENDING', '2024-01-01', '2024-01-01')",
                [&u.id],
            )
            .unwrap_err()
            .into();
        assert!(matches!(err, DbError::CheckViolation { .. }));
    }

    #[test]
    fn test_status_counts_group_by() {
        let db = db();
        let u = user(&db, "a@example.com");
        let other = user(&db, "b@example.com");
        for job in ["j1", "j2", "j3"] {
            db.create_application(&application(&u.id, job)).unwrap();
        }
        let interviewing = db.create_application(&application(&u.id, "j4")).unwrap();
        db.update_application_status(&interviewing.id, ApplicationStatus::Interviewing)
            .unwrap();
        db.create_application(&application(&other.id, "j1")).unwrap();

        assert_eq!(
            db.application_status_counts(&u.id).unwrap(),
            vec![(ApplicationStatus::Applied, 3), (ApplicationStatus::Interviewing, 1)]
        );

        let filter = ApplicationFilter {
            status: Some(ApplicationStatus::Applied),
            ..ApplicationFilter::for_user(&u.id)
        };
        assert_eq!(db.count_applications(&filter).unwrap(), 3);
        let page = db
            .find_applications(&filter, (ApplicationOrder::AppliedAt, SortOrder::Desc), Page::take(2))
            .unwrap();
        assert_eq!(page.len(), 2);

        let by_status: Vec<ApplicationStatus> = db
            .find_applications(
                &ApplicationFilter::for_user(&u.id),
                (ApplicationOrder::Status, SortOrder::Desc),
                Page::default(),
            )
            .unwrap()
            .into_iter()
            .map(|a| a.status)
            .collect();
        assert_eq!(by_status[0], ApplicationStatus::Interviewing);
        assert_eq!(by_status.len(), 4);
    }

    #[test]
    fn test_follow_ups_and_notes() {
        let db = db();
        let u = user(&db, "a@example.com");
        let now = Utc::now();
        let due = db.create_application(&application(&u.id, "j1")).unwrap();
        let later = db.create_application(&application(&u.id, "j2")).unwrap();
        let closed = db.create_application(&application(&u.id, "j3")).unwrap();

        db.set_follow_up(&due.id, Some(now - Duration::days(1))).unwrap();
        db.set_follow_up(&later.id, Some(now + Duration::days(7))).unwrap();
        db.set_follow_up(&closed.id, Some(now - Duration::days(2))).unwrap();
        db.update_application_status(&closed.id, ApplicationStatus::Rejected).unwrap();

        let ids: Vec<String> = db.due_follow_ups(&u.id, now).unwrap().into_iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![due.id.clone()]);

        let cleared = db.set_follow_up(&due.id, None).unwrap();
        assert!(cleared.follow_up_at.is_none());

        let noted = db.update_application_notes(&due.id, Some("called recruiter")).unwrap();
        assert_eq!(noted.notes.as_deref(), Some("called recruiter"));

        db.delete_application(&due.id).unwrap();
        assert!(db.find_application(&due.id).unwrap().is_none());
    }
}
