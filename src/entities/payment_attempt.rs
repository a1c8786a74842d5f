use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::{entity::prelude::*, ActiveValue::Set};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// One checkout attempt, keyed by its payment reference.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "payment_attempts")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub reference: String,
    pub user_id: String,
    pub service_type: String,
    #[sea_orm(column_type = "Json")]
    pub form_data: Json,
    pub price: i64,
    pub amount_minor: i64,
    pub currency: String,
    pub email: String,
    pub status: AttemptStatus,
    pub failure_reason: Option<String>,
    pub request_id: Option<i32>,
    pub provider_confirmed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize, ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::None)")]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    #[sea_orm(string_value = "initiated")]
    Initiated,
    #[sea_orm(string_value = "cancelled")]
    Cancelled,
    #[sea_orm(string_value = "verification_failed")]
    VerificationFailed,
    #[sea_orm(string_value = "verified")]
    Verified,
    #[sea_orm(string_value = "persisted")]
    Persisted,
    #[sea_orm(string_value = "persist_failed")]
    PersistFailed,
}

impl AttemptStatus {
    /// Attempts in these states can never be confirmed again; the user needs a fresh reference.
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Cancelled | Self::VerificationFailed)
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

#[async_trait]
impl ActiveModelBehavior for ActiveModel {
    async fn before_save<C>(self, _db: &C, insert: bool) -> Result<Self, DbErr>
    where
        C: ConnectionTrait,
    {
        let mut active_model = self;
        let now = Utc::now();

        if insert {
            active_model.created_at = Set(now);
        }
        active_model.updated_at = Set(Some(now));

        Ok(active_model)
    }
}
