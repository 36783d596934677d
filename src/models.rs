use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub name: Option<String>,
    pub email: String,
    pub email_verified: Option<DateTime<Utc>>,
    pub image: Option<String>,
    pub location: Option<String>,
    pub remote_preference: bool,
    pub salary_min: Option<i64>,
    pub salary_max: Option<i64>,
    pub skills: Vec<String>,
    pub experience_level: Option<String>, // "entry", "mid", "senior", ...
    pub email_notifications: bool,
    pub job_alerts: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct NewUser {
    pub name: Option<String>,
    pub email: String,
    pub image: Option<String>,
    pub location: Option<String>,
    pub remote_preference: bool,
    pub salary_min: Option<i64>,
    pub salary_max: Option<i64>,
    pub skills: Vec<String>,
    pub experience_level: Option<String>,
}

/// Partial update of a user. `None` leaves a column untouched; for nullable
/// columns `Some(None)` clears it.
#[derive(Debug, Clone, Default)]
pub struct UserChanges {
    pub name: Option<Option<String>>,
    pub image: Option<Option<String>>,
    pub email_verified: Option<Option<DateTime<Utc>>>,
    pub location: Option<Option<String>>,
    pub remote_preference: Option<bool>,
    pub salary_min: Option<Option<i64>>,
    pub salary_max: Option<Option<i64>>,
    pub skills: Option<Vec<String>>,
    pub experience_level: Option<Option<String>>,
    pub email_notifications: Option<bool>,
    pub job_alerts: Option<bool>,
}

/// External auth-provider linkage (OAuth).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub user_id: String,
    pub account_type: String, // "oauth", "email", "credentials"
    pub provider: String,
    pub provider_account_id: String,
    pub refresh_token: Option<String>,
    pub access_token: Option<String>,
    pub expires_at: Option<i64>, // epoch seconds, as providers report it
    pub token_type: Option<String>,
    pub scope: Option<String>,
    pub id_token: Option<String>,
    pub session_state: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct NewAccount {
    pub user_id: String,
    pub account_type: String,
    pub provider: String,
    pub provider_account_id: String,
    pub refresh_token: Option<String>,
    pub access_token: Option<String>,
    pub expires_at: Option<i64>,
    pub token_type: Option<String>,
    pub scope: Option<String>,
    pub id_token: Option<String>,
    pub session_state: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub session_token: String,
    pub user_id: String,
    pub expires: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VerificationToken {
    pub identifier: String,
    pub token: String,
    pub expires: DateTime<Utc>,
}

/// A bookmarked listing with a denormalized snapshot of the job data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavedJob {
    pub id: String,
    pub user_id: String,
    pub job_id: String,
    pub title: String,
    pub company: Option<String>,
    pub location: Option<String>,
    pub salary_min: Option<i64>,
    pub salary_max: Option<i64>,
    pub url: Option<String>,
    pub remote: bool,
    pub description: Option<String>,
    pub job_data: Option<serde_json::Value>,
    pub saved_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct NewSavedJob {
    pub user_id: String,
    pub job_id: String,
    pub title: String,
    pub company: Option<String>,
    pub location: Option<String>,
    pub salary_min: Option<i64>,
    pub salary_max: Option<i64>,
    pub url: Option<String>,
    pub remote: bool,
    pub description: Option<String>,
    pub job_data: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SalaryStats {
    pub count: i64,
    pub lowest_min: Option<i64>,
    pub highest_max: Option<i64>,
    pub avg_min: Option<f64>,
    pub avg_max: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApplicationStatus {
    Applied,
    Viewed,
    Interviewing,
    Rejected,
    Hired,
}

#[derive(Debug, Error, PartialEq)]
#[error("unknown application status '{0}' (expected one of APPLIED, VIEWED, INTERVIEWING, REJECTED, HIRED)")]
pub struct UnknownStatus(pub String);

impl ApplicationStatus {
    pub const ALL: [ApplicationStatus; 5] = [
        ApplicationStatus::Applied,
        ApplicationStatus::Viewed,
        ApplicationStatus::Interviewing,
        ApplicationStatus::Rejected,
        ApplicationStatus::Hired,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ApplicationStatus::Applied => "APPLIED",
            ApplicationStatus::Viewed => "VIEWED",
            ApplicationStatus::Interviewing => "INTERVIEWING",
            ApplicationStatus::Rejected => "REJECTED",
            ApplicationStatus::Hired => "HIRED",
        }
    }
}

impl fmt::Display for ApplicationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for ApplicationStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        ApplicationStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == upper)
            .ok_or_else(|| UnknownStatus(s.to_string()))
    }
}

impl ToSql for ApplicationStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for ApplicationStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: UnknownStatus| FromSqlError::Other(Box::new(e)))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobApplication {
    pub id: String,
    pub user_id: String,
    pub job_id: String,
    pub job_title: String,
    pub company: Option<String>,
    pub status: ApplicationStatus,
    pub applied_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub follow_up_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct NewJobApplication {
    pub user_id: String,
    pub job_id: String,
    pub job_title: String,
    pub company: Option<String>,
    pub status: Option<ApplicationStatus>, // defaults to APPLIED
    pub follow_up_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRecord {
    pub id: String,
    pub user_id: String,
    pub query: String,
    pub location: Option<String>,
    pub filters: Option<serde_json::Value>,
    pub results_count: Option<i64>,
    pub searched_at: DateTime<Utc>,
}
