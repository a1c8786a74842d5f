use crate::{
    catalog::FormData,
    entities::request::{self, PaymentStatus},
    errors::ServiceError,
    services::payments::VerifiedPayment,
};
use chrono::Utc;
use metrics::counter;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, QueryOrder,
    Set, SqlErr,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

/// Fields of a request that is about to be recorded. Price comes from the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRequest {
    pub user_id: String,
    pub service_type: String,
    pub form_data: FormData,
    pub price: i64,
}

/// Append-only writer for paid requests.
#[derive(Clone)]
pub struct RequestWriter {
    db: Arc<DatabaseConnection>,
}

impl RequestWriter {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Records a verified request. Keyed by payment reference: a retry for a
    /// reference that is already recorded returns the existing row.
    #[instrument(skip(self, payment, new), fields(reference = %payment.reference(), user_id = %new.user_id))]
    pub async fn persist(
        &self,
        payment: &VerifiedPayment,
        new: NewRequest,
    ) -> Result<request::Model, ServiceError> {
        let reference = payment.reference().as_str();

        if let Some(existing) = self
            .find_by_reference(reference)
            .await
            .map_err(|e| persist_error(reference, e))?
        {
            info!(request_id = existing.id, "request already recorded for reference");
            return Ok(existing);
        }

        let form_data = serde_json::to_value(&new.form_data)
            .map_err(|e| ServiceError::persistence_failed(reference, e.to_string()))?;

        let model = request::ActiveModel {
            user_id: Set(new.user_id),
            service_type: Set(new.service_type),
            form_data: Set(form_data),
            price: Set(new.price),
            payment_status: Set(PaymentStatus::Paid),
            payment_reference: Set(reference.to_string()),
            timestamp: Set(Utc::now()),
            ..Default::default()
        };

        match model.insert(&*self.db).await {
            Ok(saved) => {
                counter!("egov_requests.persisted", 1);
                info!(request_id = saved.id, "request recorded");
                Ok(saved)
            }
            Err(e) if matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => {
                // Concurrent writer won the race for this reference
                warn!("unique violation on payment reference, re-reading");
                self.find_by_reference(reference)
                    .await
                    .map_err(|e| persist_error(reference, e))?
                    .ok_or_else(|| {
                        ServiceError::persistence_failed(reference, "record vanished after conflict")
                    })
            }
            Err(e) => Err(persist_error(reference, e)),
        }
    }

    pub async fn find_by_reference(
        &self,
        reference: &str,
    ) -> Result<Option<request::Model>, DbErr> {
        request::Entity::find()
            .filter(request::Column::PaymentReference.eq(reference))
            .one(&*self.db)
            .await
    }
}

fn persist_error(reference: &str, e: DbErr) -> ServiceError {
    counter!("egov_requests.persist_failed", 1);
    error!(reference, error = %e, "failed to record verified request");
    ServiceError::persistence_failed(reference, e.to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestFilter {
    /// Dashboard
    #[default]
    All,
    /// Payment history
    Paid,
}

impl RequestFilter {
    fn context(&self) -> &'static str {
        match self {
            Self::All => "dashboard",
            Self::Paid => "payment history",
        }
    }
}

/// Owner-scoped queries over recorded requests.
#[derive(Clone)]
pub struct RequestReader {
    db: Arc<DatabaseConnection>,
}

impl RequestReader {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Newest first; same-instant records fall back to insertion order.
    #[instrument(skip(self))]
    pub async fn list_for_user(
        &self,
        user_id: &str,
        filter: RequestFilter,
    ) -> Result<Vec<request::Model>, ServiceError> {
        let mut query = request::Entity::find().filter(request::Column::UserId.eq(user_id));

        if filter == RequestFilter::Paid {
            query = query.filter(request::Column::PaymentStatus.eq(PaymentStatus::Paid));
        }

        query
            .order_by_desc(request::Column::Timestamp)
            .order_by_desc(request::Column::Id)
            .all(&*self.db)
            .await
            .map_err(|e| ServiceError::read_failed(filter.context(), e))
    }

    /// Records owned by someone else are reported as missing.
    #[instrument(skip(self))]
    pub async fn get_for_user(&self, user_id: &str, id: i32) -> Result<request::Model, ServiceError> {
        request::Entity::find_by_id(id)
            .filter(request::Column::UserId.eq(user_id))
            .one(&*self.db)
            .await
            .map_err(|e| ServiceError::read_failed("request", e))?
            .ok_or_else(|| ServiceError::NotFound(format!("Request {} not found", id)))
    }
}
