use crate::{entities::user_profile, errors::ServiceError};
use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, Set, SqlErr};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::ToSchema;
use validator::Validate;

pub const DEFAULT_ROLE: &str = "citizen";
pub const PROFILE_NOT_FOUND: &str = "No profile data found.";

#[derive(Debug, Clone, Deserialize, Serialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateProfile {
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 11, max = 11))]
    pub nin: Option<String>,
    /// YYYY-MM-DD
    pub date_of_birth: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate, ToSchema)]
pub struct UpdateProfileName {
    #[validate(length(min = 1, max = 200))]
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub user_id: String,
    pub name: String,
    pub email: String,
    pub role: String,
    pub nin: Option<String>,
    pub date_of_birth: Option<String>,
}

impl From<user_profile::Model> for Profile {
    fn from(model: user_profile::Model) -> Self {
        Self {
            user_id: model.user_id,
            name: model.name,
            email: model.email,
            role: model.role,
            nin: model.nin,
            date_of_birth: model.date_of_birth,
        }
    }
}

#[derive(Clone)]
pub struct ProfileService {
    db: Arc<DatabaseConnection>,
}

impl ProfileService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    #[instrument(skip(self))]
    pub async fn get(&self, user_id: &str) -> Result<Profile, ServiceError> {
        user_profile::Entity::find_by_id(user_id.to_string())
            .one(&*self.db)
            .await
            .map_err(|e| ServiceError::read_failed("profile", e))?
            .map(Profile::from)
            .ok_or_else(|| ServiceError::NotFound(PROFILE_NOT_FOUND.to_string()))
    }

    /// Called once at registration. The role is always the default.
    #[instrument(skip(self, input))]
    pub async fn create(&self, user_id: &str, input: CreateProfile) -> Result<Profile, ServiceError> {
        input
            .validate()
            .map_err(|e| ServiceError::ValidationError(e.to_string()))?;
        if let Some(dob) = input.date_of_birth.as_deref() {
            chrono::NaiveDate::parse_from_str(dob, "%Y-%m-%d").map_err(|_| {
                ServiceError::InvalidInput("Date of birth must be YYYY-MM-DD".to_string())
            })?;
        }

        let model = user_profile::ActiveModel {
            user_id: Set(user_id.to_string()),
            name: Set(input.name.trim().to_string()),
            email: Set(input.email),
            role: Set(DEFAULT_ROLE.to_string()),
            nin: Set(input.nin),
            date_of_birth: Set(input.date_of_birth),
            ..Default::default()
        };

        match model.insert(&*self.db).await {
            Ok(saved) => {
                info!("profile created");
                Ok(saved.into())
            }
            Err(e) if matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => Err(
                ServiceError::Conflict("A profile already exists for this account".to_string()),
            ),
            Err(e) => Err(ServiceError::db_error(e)),
        }
    }

    /// Only the display name is editable.
    #[instrument(skip(self, input))]
    pub async fn update_name(
        &self,
        user_id: &str,
        input: UpdateProfileName,
    ) -> Result<Profile, ServiceError> {
        input
            .validate()
            .map_err(|e| ServiceError::ValidationError(e.to_string()))?;

        let existing = user_profile::Entity::find_by_id(user_id.to_string())
            .one(&*self.db)
            .await
            .map_err(|e| ServiceError::read_failed("profile", e))?
            .ok_or_else(|| ServiceError::NotFound(PROFILE_NOT_FOUND.to_string()))?;

        let mut active: user_profile::ActiveModel = existing.into();
        active.name = Set(input.name.trim().to_string());
        let saved = active.update(&*self.db).await.map_err(ServiceError::db_error)?;
        info!("profile name updated");
        Ok(saved.into())
    }
}
