use std::fmt;
use std::io::Write;
use std::str::FromStr;

use chrono::NaiveDateTime;
use diesel::deserialize::{self, FromSql, FromSqlRow};
use diesel::expression::AsExpression;
use diesel::pg::{Pg, PgValue};
use diesel::prelude::*;
use diesel::serialize::{self, IsNull, Output, ToSql};
use diesel::sql_types::Text;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::schema::*;

pub const VACANCY_STATUS_ACTIVE: &str = "ACTIVE";
pub const RESUME_STATUS_ACTIVE: &str = "ACTIVE";

/// Lifecycle of an application. Transitions only move forward:
/// `Queued -> Processing -> {Completed | Failed}`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsExpression, FromSqlRow,
)]
#[diesel(sql_type = Text)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApplicationStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl ApplicationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApplicationStatus::Queued => "QUEUED",
            ApplicationStatus::Processing => "PROCESSING",
            ApplicationStatus::Completed => "COMPLETED",
            ApplicationStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ApplicationStatus::Completed | ApplicationStatus::Failed
        )
    }
}

impl fmt::Display for ApplicationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ApplicationStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "QUEUED" => Ok(ApplicationStatus::Queued),
            "PROCESSING" => Ok(ApplicationStatus::Processing),
            "COMPLETED" => Ok(ApplicationStatus::Completed),
            "FAILED" => Ok(ApplicationStatus::Failed),
            other => Err(format!("unknown application status: {other}")),
        }
    }
}

impl ToSql<Text, Pg> for ApplicationStatus {
    fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, Pg>) -> serialize::Result {
        out.write_all(self.as_str().as_bytes())?;
        Ok(IsNull::No)
    }
}

impl FromSql<Text, Pg> for ApplicationStatus {
    fn from_sql(bytes: PgValue<'_>) -> deserialize::Result<Self> {
        let raw = <String as FromSql<Text, Pg>>::from_sql(bytes)?;
        raw.parse().map_err(Into::into)
    }
}

#[derive(Debug, Clone, Queryable, Selectable, Identifiable)]
#[diesel(table_name = users)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Serialize, Queryable, Selectable, Identifiable)]
#[diesel(table_name = vacancies)]
pub struct Vacancy {
    pub id: Uuid,
    pub title: String,
    pub company: String,
    pub city: Option<String>,
    pub description: String,
    pub requirements: Option<String>,
    pub responsibilities: Option<String>,
    pub skills: Vec<String>,
    pub status: String,
    pub hh_vacancy_id: Option<String>,
}

impl Vacancy {
    pub fn is_active(&self) -> bool {
        self.status == VACANCY_STATUS_ACTIVE
    }
}

/// Missing fields deserialize empty; the job-board payload fills them in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Experience {
    #[serde(default)]
    pub company: String,
    #[serde(default)]
    pub position: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub start: String,
    #[serde(default)]
    pub end: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Education {
    #[serde(default)]
    pub level: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub organization: String,
    /// `0` when unknown.
    #[serde(default, deserialize_with = "lenient_year")]
    pub year: i32,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum YearRepr {
    Number(i64),
    Text(String),
}

/// Accepts `2019`, `"2019"` or `null`. Anything unparsable becomes `0`.
fn lenient_year<'de, D>(deserializer: D) -> Result<i32, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let year = match Option::<YearRepr>::deserialize(deserializer)? {
        Some(YearRepr::Number(year)) => i32::try_from(year).unwrap_or_default(),
        Some(YearRepr::Text(text)) => text.trim().parse().unwrap_or_default(),
        None => 0,
    };
    Ok(year)
}

#[derive(Debug, Clone, Default)]
pub struct UserProfile {
    pub experience: Vec<Experience>,
    pub education: Option<Education>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Resume {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
    pub position: String,
    pub skills: Vec<String>,
    pub experience: Vec<Experience>,
    pub education: Option<Education>,
    pub status: String,
    pub hh_resume_id: Option<String>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone)]
pub struct NewResume {
    pub user_id: Uuid,
    pub title: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
    pub position: String,
    pub skills: Vec<String>,
    pub experience: Vec<Experience>,
    pub education: Option<Education>,
    pub hh_resume_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Queryable, Selectable, Identifiable)]
#[diesel(table_name = applications)]
pub struct Application {
    pub id: Uuid,
    pub user_id: Uuid,
    pub vacancy_id: Uuid,
    pub resume_id: Option<Uuid>,
    pub cover_letter: Option<String>,
    pub status: ApplicationStatus,
    pub job_id: Option<Uuid>,
    pub failed_reason: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = applications)]
pub struct NewApplication {
    pub id: Uuid,
    pub user_id: Uuid,
    pub vacancy_id: Uuid,
    pub resume_id: Option<Uuid>,
    pub cover_letter: Option<String>,
    pub status: ApplicationStatus,
}

impl NewApplication {
    pub fn queued(user_id: Uuid, vacancy_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            vacancy_id,
            resume_id: None,
            cover_letter: None,
            status: ApplicationStatus::Queued,
        }
    }
}

/// Partial update of an application record. `None` leaves a column untouched;
/// `failed_reason: Some(None)` clears it.
#[derive(Debug, Clone, Default, AsChangeset)]
#[diesel(table_name = applications)]
pub struct ApplicationChanges {
    pub status: Option<ApplicationStatus>,
    pub resume_id: Option<Uuid>,
    pub cover_letter: Option<String>,
    pub job_id: Option<Uuid>,
    pub failed_reason: Option<Option<String>>,
}

impl ApplicationChanges {
    pub fn status(status: ApplicationStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn apply_to(&self, application: &mut Application) {
        if let Some(status) = self.status {
            application.status = status;
        }
        if let Some(resume_id) = self.resume_id {
            application.resume_id = Some(resume_id);
        }
        if let Some(cover_letter) = &self.cover_letter {
            application.cover_letter = Some(cover_letter.clone());
        }
        if let Some(job_id) = self.job_id {
            application.job_id = Some(job_id);
        }
        if let Some(failed_reason) = &self.failed_reason {
            application.failed_reason = failed_reason.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_its_wire_name() {
        for status in [
            ApplicationStatus::Queued,
            ApplicationStatus::Processing,
            ApplicationStatus::Completed,
            ApplicationStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<ApplicationStatus>(), Ok(status));
        }
        assert!("DONE".parse::<ApplicationStatus>().is_err());
    }

    #[test]
    fn only_completed_and_failed_are_terminal() {
        assert!(!ApplicationStatus::Queued.is_terminal());
        assert!(!ApplicationStatus::Processing.is_terminal());
        assert!(ApplicationStatus::Completed.is_terminal());
        assert!(ApplicationStatus::Failed.is_terminal());
    }

    #[test]
    fn changes_clear_failed_reason_only_when_asked() {
        let now = chrono::Utc::now().naive_utc();
        let mut application = Application {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            vacancy_id: Uuid::new_v4(),
            resume_id: None,
            cover_letter: None,
            status: ApplicationStatus::Processing,
            job_id: None,
            failed_reason: Some("timeout".into()),
            created_at: now,
            updated_at: now,
        };

        ApplicationChanges::status(ApplicationStatus::Processing).apply_to(&mut application);
        assert_eq!(application.failed_reason.as_deref(), Some("timeout"));

        ApplicationChanges {
            status: Some(ApplicationStatus::Completed),
            failed_reason: Some(None),
            ..ApplicationChanges::default()
        }
        .apply_to(&mut application);
        assert_eq!(application.status, ApplicationStatus::Completed);
        assert!(application.failed_reason.is_none());
    }

    #[test]
    fn experience_tolerates_missing_fields() {
        let entry: Experience =
            serde_json::from_str(r#"{"company": "Kaspi", "position": "Dev", "start": "2021-01-01"}"#)
                .unwrap();
        assert_eq!(entry.company, "Kaspi");
        assert!(entry.description.is_empty());
        assert!(entry.end.is_none());
    }

    #[test]
    fn education_year_accepts_numbers_and_numeric_strings() {
        let parse = |raw: &str| serde_json::from_str::<Education>(raw).unwrap().year;
        assert_eq!(parse(r#"{"name": "CS", "year": 2019}"#), 2019);
        assert_eq!(parse(r#"{"name": "CS", "year": " 2019 "}"#), 2019);
        assert_eq!(parse(r#"{"name": "CS", "year": "soon"}"#), 0);
        assert_eq!(parse(r#"{"name": "CS", "year": null}"#), 0);
        assert_eq!(parse(r#"{"name": "CS"}"#), 0);
    }

    #[test]
    fn status_serializes_in_upper_case() {
        let json = serde_json::to_string(&ApplicationStatus::Processing).unwrap();
        assert_eq!(json, "\"PROCESSING\"");
    }
}
