use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{NaiveDateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{RecordStore, StoreError, StoreResult};
use crate::models::{
    Application, ApplicationChanges, NewApplication, NewResume, Resume, User, UserProfile, Vacancy,
    RESUME_STATUS_ACTIVE,
};

#[derive(Debug, Clone)]
struct StoredToken {
    token: String,
    expires_at: Option<NaiveDateTime>,
}

#[derive(Default)]
struct Tables {
    users: HashMap<Uuid, User>,
    profiles: HashMap<Uuid, UserProfile>,
    tokens: HashMap<Uuid, StoredToken>,
    vacancies: HashMap<Uuid, Vacancy>,
    resumes: Vec<Resume>,
    applications: Vec<Application>,
}

/// Record store kept in process memory, for tests and local experiments.
#[derive(Default)]
pub struct MemoryRecordStore {
    tables: RwLock<Tables>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_user(&self, user: User) {
        self.tables.write().await.users.insert(user.id, user);
    }

    pub async fn insert_profile(&self, user_id: Uuid, profile: UserProfile) {
        self.tables.write().await.profiles.insert(user_id, profile);
    }

    pub async fn set_hh_token(
        &self,
        user_id: Uuid,
        token: impl Into<String>,
        expires_at: Option<NaiveDateTime>,
    ) {
        self.tables.write().await.tokens.insert(
            user_id,
            StoredToken {
                token: token.into(),
                expires_at,
            },
        );
    }

    pub async fn insert_vacancy(&self, vacancy: Vacancy) {
        self.tables.write().await.vacancies.insert(vacancy.id, vacancy);
    }

    pub async fn resumes_for(&self, user_id: Uuid) -> Vec<Resume> {
        self.tables
            .read()
            .await
            .resumes
            .iter()
            .filter(|resume| resume.user_id == user_id)
            .cloned()
            .collect()
    }

    pub async fn find_resume(&self, resume_id: Uuid) -> Option<Resume> {
        self.tables
            .read()
            .await
            .resumes
            .iter()
            .find(|resume| resume.id == resume_id)
            .cloned()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn find_vacancy(&self, vacancy_id: Uuid) -> StoreResult<Option<Vacancy>> {
        Ok(self.tables.read().await.vacancies.get(&vacancy_id).cloned())
    }

    async fn find_user(&self, user_id: Uuid) -> StoreResult<Option<User>> {
        Ok(self.tables.read().await.users.get(&user_id).cloned())
    }

    async fn find_profile(&self, user_id: Uuid) -> StoreResult<Option<UserProfile>> {
        Ok(self.tables.read().await.profiles.get(&user_id).cloned())
    }

    async fn hh_access_token(&self, user_id: Uuid) -> StoreResult<Option<String>> {
        let now = Utc::now().naive_utc();
        Ok(self
            .tables
            .read()
            .await
            .tokens
            .get(&user_id)
            .filter(|stored| stored.expires_at.map_or(true, |expires| expires > now))
            .map(|stored| stored.token.clone()))
    }

    async fn find_resume_by_ref(
        &self,
        user_id: Uuid,
        resume_ref: &str,
    ) -> StoreResult<Option<Resume>> {
        let local_id = Uuid::parse_str(resume_ref).ok();
        Ok(self
            .tables
            .read()
            .await
            .resumes
            .iter()
            .find(|resume| {
                resume.user_id == user_id
                    && (Some(resume.id) == local_id
                        || resume.hh_resume_id.as_deref() == Some(resume_ref))
            })
            .cloned())
    }

    async fn create_resume(&self, resume: NewResume) -> StoreResult<Resume> {
        let stored = Resume {
            id: Uuid::new_v4(),
            user_id: resume.user_id,
            title: resume.title,
            first_name: resume.first_name,
            last_name: resume.last_name,
            email: resume.email,
            phone: resume.phone,
            position: resume.position,
            skills: resume.skills,
            experience: resume.experience,
            education: resume.education,
            status: RESUME_STATUS_ACTIVE.to_string(),
            hh_resume_id: resume.hh_resume_id,
            created_at: Utc::now().naive_utc(),
        };
        self.tables.write().await.resumes.push(stored.clone());
        Ok(stored)
    }

    async fn delete_resume(&self, resume_id: Uuid) -> StoreResult<bool> {
        let mut tables = self.tables.write().await;
        let before = tables.resumes.len();
        tables.resumes.retain(|resume| resume.id != resume_id);
        Ok(tables.resumes.len() < before)
    }

    async fn create_application(&self, application: NewApplication) -> StoreResult<Application> {
        let mut tables = self.tables.write().await;
        let duplicate = tables.applications.iter().any(|existing| {
            existing.id == application.id
                || (existing.user_id == application.user_id
                    && existing.vacancy_id == application.vacancy_id)
        });
        if duplicate {
            return Err(StoreError::Duplicate);
        }

        let now = Utc::now().naive_utc();
        let stored = Application {
            id: application.id,
            user_id: application.user_id,
            vacancy_id: application.vacancy_id,
            resume_id: application.resume_id,
            cover_letter: application.cover_letter,
            status: application.status,
            job_id: None,
            failed_reason: None,
            created_at: now,
            updated_at: now,
        };
        tables.applications.push(stored.clone());
        Ok(stored)
    }

    async fn find_application(&self, application_id: Uuid) -> StoreResult<Option<Application>> {
        Ok(self
            .tables
            .read()
            .await
            .applications
            .iter()
            .find(|application| application.id == application_id)
            .cloned())
    }

    async fn find_application_for(
        &self,
        user_id: Uuid,
        vacancy_id: Uuid,
    ) -> StoreResult<Option<Application>> {
        Ok(self
            .tables
            .read()
            .await
            .applications
            .iter()
            .find(|application| {
                application.user_id == user_id && application.vacancy_id == vacancy_id
            })
            .cloned())
    }

    async fn list_applications(&self, user_id: Uuid) -> StoreResult<Vec<Application>> {
        let tables = self.tables.read().await;
        // Insertion order breaks ties between records created in the same instant.
        let mut owned: Vec<(usize, Application)> = tables
            .applications
            .iter()
            .enumerate()
            .filter(|(_, application)| application.user_id == user_id)
            .map(|(index, application)| (index, application.clone()))
            .collect();
        owned.sort_by(|(a_index, a), (b_index, b)| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b_index.cmp(a_index))
        });
        Ok(owned.into_iter().map(|(_, application)| application).collect())
    }

    async fn update_application(
        &self,
        application_id: Uuid,
        changes: ApplicationChanges,
    ) -> StoreResult<bool> {
        let mut tables = self.tables.write().await;
        let Some(application) = tables
            .applications
            .iter_mut()
            .find(|application| application.id == application_id)
        else {
            return Ok(false);
        };
        changes.apply_to(application);
        application.updated_at = Utc::now().naive_utc();
        Ok(true)
    }

    async fn delete_application(&self, application_id: Uuid) -> StoreResult<bool> {
        let mut tables = self.tables.write().await;
        let before = tables.applications.len();
        tables
            .applications
            .retain(|application| application.id != application_id);
        Ok(tables.applications.len() < before)
    }
}
