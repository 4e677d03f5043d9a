use async_trait::async_trait;
use chrono::{NaiveDateTime, Utc};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use serde_json::Value;
use tokio::task;
use uuid::Uuid;

use super::{RecordStore, StoreError, StoreResult};
use crate::db::PgPool;
use crate::models::{
    Application, ApplicationChanges, Education, Experience, NewApplication, NewResume, Resume,
    User, UserProfile, Vacancy, RESUME_STATUS_ACTIVE,
};
use crate::schema::{applications, resumes, user_profiles, users, vacancies};

#[derive(Debug, Queryable, Selectable)]
#[diesel(table_name = resumes)]
struct ResumeRow {
    id: Uuid,
    user_id: Uuid,
    title: String,
    first_name: String,
    last_name: String,
    email: String,
    phone: String,
    position: String,
    skills: Vec<String>,
    experience: Option<Value>,
    education: Option<Value>,
    status: String,
    hh_resume_id: Option<String>,
    created_at: NaiveDateTime,
}

impl TryFrom<ResumeRow> for Resume {
    type Error = StoreError;

    fn try_from(row: ResumeRow) -> Result<Self, Self::Error> {
        let experience: Vec<Experience> = match row.experience {
            Some(value) => decode_experience(value)?,
            None => Vec::new(),
        };
        let education: Option<Education> = row.education.map(serde_json::from_value).transpose()?;

        Ok(Resume {
            id: row.id,
            user_id: row.user_id,
            title: row.title,
            first_name: row.first_name,
            last_name: row.last_name,
            email: row.email,
            phone: row.phone,
            position: row.position,
            skills: row.skills,
            experience,
            education,
            status: row.status,
            hh_resume_id: row.hh_resume_id,
            created_at: row.created_at,
        })
    }
}

/// Older rows hold experience as a JSON-encoded string rather than an array.
fn decode_experience(value: Value) -> Result<Vec<Experience>, serde_json::Error> {
    match value {
        Value::String(raw) => serde_json::from_str(&raw),
        Value::Null => Ok(Vec::new()),
        other => serde_json::from_value(other),
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = resumes)]
struct NewResumeRow {
    id: Uuid,
    user_id: Uuid,
    title: String,
    first_name: String,
    last_name: String,
    email: String,
    phone: String,
    position: String,
    skills: Vec<String>,
    experience: Option<Value>,
    education: Option<Value>,
    status: String,
    hh_resume_id: Option<String>,
}

#[derive(Debug, Queryable, Selectable)]
#[diesel(table_name = user_profiles)]
struct ProfileRow {
    experience: Option<Value>,
    education: Option<Value>,
}

/// Record store over the PostgreSQL schema.
#[derive(Clone)]
pub struct PgRecordStore {
    pool: PgPool,
}

impl PgRecordStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn with_conn<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&mut PgConnection) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool.clone();
        task::spawn_blocking(move || {
            let mut conn = pool.get().map_err(|err| StoreError::Pool(err.to_string()))?;
            f(&mut conn)
        })
        .await
        .map_err(|err| StoreError::Task(err.to_string()))?
    }
}

#[async_trait]
impl RecordStore for PgRecordStore {
    async fn find_vacancy(&self, vacancy_id: Uuid) -> StoreResult<Option<Vacancy>> {
        self.with_conn(move |conn| {
            Ok(vacancies::table
                .find(vacancy_id)
                .select(Vacancy::as_select())
                .first(conn)
                .optional()?)
        })
        .await
    }

    async fn find_user(&self, user_id: Uuid) -> StoreResult<Option<User>> {
        self.with_conn(move |conn| {
            Ok(users::table
                .find(user_id)
                .select(User::as_select())
                .first(conn)
                .optional()?)
        })
        .await
    }

    async fn find_profile(&self, user_id: Uuid) -> StoreResult<Option<UserProfile>> {
        self.with_conn(move |conn| {
            let row: Option<ProfileRow> = user_profiles::table
                .find(user_id)
                .select(ProfileRow::as_select())
                .first(conn)
                .optional()?;

            let Some(row) = row else {
                return Ok(None);
            };

            let experience = match row.experience {
                Some(value) => decode_experience(value)?,
                None => Vec::new(),
            };
            let education = match row.education {
                Some(Value::Null) | None => None,
                Some(value) => Some(serde_json::from_value(value)?),
            };

            Ok(Some(UserProfile {
                experience,
                education,
            }))
        })
        .await
    }

    async fn hh_access_token(&self, user_id: Uuid) -> StoreResult<Option<String>> {
        self.with_conn(move |conn| {
            let row: Option<(Option<String>, Option<NaiveDateTime>)> = users::table
                .find(user_id)
                .select((users::hh_access_token, users::hh_expires_at))
                .first(conn)
                .optional()?;

            let now = Utc::now().naive_utc();
            Ok(row.and_then(|(token, expires_at)| match expires_at {
                Some(expires_at) if expires_at <= now => None,
                _ => token.filter(|token| !token.is_empty()),
            }))
        })
        .await
    }

    async fn find_resume_by_ref(
        &self,
        user_id: Uuid,
        resume_ref: &str,
    ) -> StoreResult<Option<Resume>> {
        let resume_ref = resume_ref.to_string();
        self.with_conn(move |conn| {
            let mut query = resumes::table
                .filter(resumes::user_id.eq(user_id))
                .select(ResumeRow::as_select())
                .into_boxed();

            query = match Uuid::parse_str(&resume_ref) {
                Ok(local_id) => query.filter(
                    resumes::id
                        .eq(local_id)
                        .or(resumes::hh_resume_id.eq(resume_ref.clone())),
                ),
                Err(_) => query.filter(resumes::hh_resume_id.eq(resume_ref.clone())),
            };

            let row: Option<ResumeRow> = query.first(conn).optional()?;
            row.map(Resume::try_from).transpose()
        })
        .await
    }

    async fn create_resume(&self, resume: NewResume) -> StoreResult<Resume> {
        self.with_conn(move |conn| {
            let experience = if resume.experience.is_empty() {
                None
            } else {
                Some(serde_json::to_value(&resume.experience)?)
            };
            let education = resume
                .education
                .as_ref()
                .map(serde_json::to_value)
                .transpose()?;

            let row = NewResumeRow {
                id: Uuid::new_v4(),
                user_id: resume.user_id,
                title: resume.title,
                first_name: resume.first_name,
                last_name: resume.last_name,
                email: resume.email,
                phone: resume.phone,
                position: resume.position,
                skills: resume.skills,
                experience,
                education,
                status: RESUME_STATUS_ACTIVE.to_string(),
                hh_resume_id: resume.hh_resume_id,
            };

            diesel::insert_into(resumes::table)
                .values(&row)
                .execute(conn)?;

            let stored: ResumeRow = resumes::table
                .find(row.id)
                .select(ResumeRow::as_select())
                .first(conn)?;
            Resume::try_from(stored)
        })
        .await
    }

    async fn delete_resume(&self, resume_id: Uuid) -> StoreResult<bool> {
        self.with_conn(move |conn| {
            let deleted = diesel::delete(resumes::table.find(resume_id)).execute(conn)?;
            Ok(deleted > 0)
        })
        .await
    }

    async fn create_application(&self, application: NewApplication) -> StoreResult<Application> {
        self.with_conn(move |conn| {
            diesel::insert_into(applications::table)
                .values(&application)
                .execute(conn)?;

            Ok(applications::table
                .find(application.id)
                .select(Application::as_select())
                .first(conn)?)
        })
        .await
    }

    async fn find_application(&self, application_id: Uuid) -> StoreResult<Option<Application>> {
        self.with_conn(move |conn| {
            Ok(applications::table
                .find(application_id)
                .select(Application::as_select())
                .first(conn)
                .optional()?)
        })
        .await
    }

    async fn find_application_for(
        &self,
        user_id: Uuid,
        vacancy_id: Uuid,
    ) -> StoreResult<Option<Application>> {
        self.with_conn(move |conn| {
            Ok(applications::table
                .filter(applications::user_id.eq(user_id))
                .filter(applications::vacancy_id.eq(vacancy_id))
                .select(Application::as_select())
                .first(conn)
                .optional()?)
        })
        .await
    }

    async fn list_applications(&self, user_id: Uuid) -> StoreResult<Vec<Application>> {
        self.with_conn(move |conn| {
            Ok(applications::table
                .filter(applications::user_id.eq(user_id))
                .order(applications::created_at.desc())
                .select(Application::as_select())
                .load(conn)?)
        })
        .await
    }

    async fn update_application(
        &self,
        application_id: Uuid,
        changes: ApplicationChanges,
    ) -> StoreResult<bool> {
        self.with_conn(move |conn| {
            let updated = diesel::update(applications::table.find(application_id))
                .set((
                    &changes,
                    applications::updated_at.eq(Utc::now().naive_utc()),
                ))
                .execute(conn)?;
            Ok(updated > 0)
        })
        .await
    }

    async fn delete_application(&self, application_id: Uuid) -> StoreResult<bool> {
        self.with_conn(move |conn| {
            let deleted = diesel::delete(applications::table.find(application_id)).execute(conn)?;
            Ok(deleted > 0)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::decode_experience;
    use serde_json::json;

    #[test]
    fn decodes_experience_stored_as_array_or_string() {
        let entry = json!({
            "company": "Kaspi.kz",
            "position": "Backend Developer",
            "description": "Payments",
            "start": "2021-01-01",
            "end": null
        });

        let from_array = decode_experience(json!([entry.clone()])).unwrap();
        let from_string = decode_experience(json!(json!([entry]).to_string())).unwrap();

        assert_eq!(from_array, from_string);
        assert_eq!(from_array[0].company, "Kaspi.kz");
        assert!(decode_experience(json!(null)).unwrap().is_empty());
    }
}
