use crate::{
    catalog::{FormData, ServiceCatalog},
    entities::{
        payment_attempt::{self, AttemptStatus},
        request,
    },
    errors::ServiceError,
    events::{outbox, Event, EventSender},
    services::{
        payments::{
            to_minor_units, PaymentReference, PaymentVerifier, VerifiedPayment,
            WebhookNotification,
        },
        requests::{NewRequest, RequestWriter},
    },
};
use chrono::Utc;
use metrics::counter;
use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, Set, SqlErr};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;

pub const CHARGE_SUCCESS: &str = "charge.success";

/// Parameters the browser needs to open the hosted checkout.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CheckoutSession {
    pub reference: PaymentReference,
    #[schema(example = "tax-receipt")]
    pub service_type: String,
    #[schema(example = "Tax Receipt")]
    pub service_name: String,
    /// Whole Naira, from the catalog
    #[schema(example = 2000)]
    pub price: i64,
    /// Kobo
    #[schema(example = 200000)]
    pub amount_minor: i64,
    #[schema(example = "NGN")]
    pub currency: String,
    pub email: String,
    /// Provider public key for the checkout widget
    pub public_key: Option<String>,
}

/// Server side of the checkout handshake. The client callback only triggers
/// verification; records are written only after the provider confirms.
#[derive(Clone)]
pub struct CheckoutService {
    db: Arc<DatabaseConnection>,
    catalog: Arc<ServiceCatalog>,
    verifier: PaymentVerifier,
    writer: RequestWriter,
    events: EventSender,
    currency: String,
    public_key: Option<String>,
}

impl CheckoutService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        catalog: Arc<ServiceCatalog>,
        verifier: PaymentVerifier,
        writer: RequestWriter,
        events: EventSender,
        currency: impl Into<String>,
        public_key: Option<String>,
    ) -> Self {
        Self {
            db,
            catalog,
            verifier,
            writer,
            events,
            currency: currency.into(),
            public_key,
        }
    }

    /// Validates the submission and opens a checkout attempt under a fresh reference.
    pub async fn initiate(
        &self,
        user_id: &str,
        email: &str,
        service_type: &str,
        form_data: &FormData,
    ) -> Result<CheckoutSession, ServiceError> {
        self.initiate_with_reference(
            user_id,
            email,
            service_type,
            form_data,
            PaymentReference::generate(),
        )
        .await
    }

    /// A reference backs exactly one attempt; reuse is a conflict.
    #[instrument(skip(self, form_data), fields(reference = %reference))]
    pub async fn initiate_with_reference(
        &self,
        user_id: &str,
        email: &str,
        service_type: &str,
        form_data: &FormData,
        reference: PaymentReference,
    ) -> Result<CheckoutSession, ServiceError> {
        let email = email.trim();
        if email.is_empty() || !email.contains('@') {
            return Err(ServiceError::InvalidInput(
                "A valid email address is required for payment".to_string(),
            ));
        }

        let normalised = self.catalog.validate_submission(service_type, form_data)?;
        let service = self
            .catalog
            .lookup(service_type)
            .ok_or_else(|| ServiceError::UnknownService(service_type.to_string()))?;
        let amount_minor = to_minor_units(service.unit_price);

        let attempt = payment_attempt::ActiveModel {
            reference: Set(reference.as_str().to_string()),
            user_id: Set(user_id.to_string()),
            service_type: Set(service.key.clone()),
            form_data: Set(serde_json::to_value(&normalised)?),
            price: Set(service.unit_price),
            amount_minor: Set(amount_minor),
            currency: Set(self.currency.clone()),
            email: Set(email.to_string()),
            status: Set(AttemptStatus::Initiated),
            failure_reason: Set(None),
            request_id: Set(None),
            provider_confirmed_at: Set(None),
            ..Default::default()
        };

        match attempt.insert(&*self.db).await {
            Ok(_) => {}
            Err(e) if matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => {
                return Err(ServiceError::Conflict(format!(
                    "Payment reference {} has already been used",
                    reference
                )));
            }
            Err(e) => return Err(ServiceError::db_error(e)),
        }

        counter!("egov_checkout.initiated", 1);
        info!(%user_id, service_type = %service.key, amount_minor, "checkout initiated");
        self.events
            .emit(Event::CheckoutInitiated {
                reference: reference.as_str().to_string(),
                user_id: user_id.to_string(),
                service_type: service.key.clone(),
                amount_minor,
            })
            .await;

        Ok(CheckoutSession {
            reference,
            service_type: service.key.clone(),
            service_name: service.display_name.clone(),
            price: service.unit_price,
            amount_minor,
            currency: self.currency.clone(),
            email: email.to_string(),
            public_key: self.public_key.clone(),
        })
    }

    /// Client success callback: verify with the provider, then record the request.
    #[instrument(skip(self), fields(reference = %reference))]
    pub async fn confirm(
        &self,
        user_id: &str,
        reference: &PaymentReference,
    ) -> Result<request::Model, ServiceError> {
        let attempt = self.load_owned(user_id, reference).await?;

        let payment = match attempt.status {
            AttemptStatus::Persisted => {
                if let Some(existing) = self
                    .writer
                    .find_by_reference(reference.as_str())
                    .await
                    .map_err(ServiceError::db_error)?
                {
                    return Ok(existing);
                }
                VerifiedPayment::from_recorded(reference.clone(), attempt.amount_minor)
            }
            status if status.is_closed() => {
                return Err(ServiceError::Conflict(format!(
                    "Payment reference {} is closed; submit the request again",
                    reference
                )));
            }
            AttemptStatus::Verified | AttemptStatus::PersistFailed => {
                VerifiedPayment::from_recorded(reference.clone(), attempt.amount_minor)
            }
            _ => match self.verifier.verify(reference, attempt.amount_minor).await {
                Ok(payment) => {
                    self.transition(reference, AttemptStatus::Verified, None, None)
                        .await;
                    self.events
                        .emit(Event::PaymentVerified {
                            reference: reference.as_str().to_string(),
                        })
                        .await;
                    payment
                }
                Err(e) => {
                    let reason = e.to_string();
                    self.transition(
                        reference,
                        AttemptStatus::VerificationFailed,
                        Some(reason.clone()),
                        None,
                    )
                    .await;
                    self.events
                        .emit(Event::VerificationFailed {
                            reference: reference.as_str().to_string(),
                            reason,
                        })
                        .await;
                    return Err(e);
                }
            },
        };

        let form_data: FormData = serde_json::from_value(attempt.form_data.clone())
            .map_err(|e| ServiceError::persistence_failed(reference.as_str(), e.to_string()))?;
        let new = NewRequest {
            user_id: attempt.user_id.clone(),
            service_type: attempt.service_type.clone(),
            form_data,
            price: attempt.price,
        };

        match self.writer.persist(&payment, new.clone()).await {
            Ok(record) => {
                self.transition(reference, AttemptStatus::Persisted, None, Some(record.id))
                    .await;
                self.events
                    .emit(Event::RequestRecorded {
                        reference: reference.as_str().to_string(),
                        request_id: record.id,
                    })
                    .await;
                Ok(record)
            }
            Err(e) => {
                let reason = e.to_string();
                self.transition(
                    reference,
                    AttemptStatus::PersistFailed,
                    Some(reason.clone()),
                    None,
                )
                .await;

                let pending = outbox::PendingRequestWrite {
                    reference: reference.as_str().to_string(),
                    amount_minor: attempt.amount_minor,
                    request: new,
                };
                if let Err(enqueue_err) = outbox::enqueue(&*self.db, &pending).await {
                    error!(
                        reference = %reference,
                        user_id = %attempt.user_id,
                        error = %enqueue_err,
                        "verified payment could not be recorded or queued; manual reconciliation required"
                    );
                }

                self.events
                    .emit(Event::PersistenceDeferred {
                        reference: reference.as_str().to_string(),
                        reason: reason.clone(),
                    })
                    .await;
                Err(ServiceError::persistence_failed(reference.as_str(), reason))
            }
        }
    }

    /// User closed the checkout. No provider call is made.
    #[instrument(skip(self), fields(reference = %reference))]
    pub async fn cancel(
        &self,
        user_id: &str,
        reference: &PaymentReference,
    ) -> Result<payment_attempt::Model, ServiceError> {
        let attempt = self.load_owned(user_id, reference).await?;

        match attempt.status {
            AttemptStatus::Initiated => {}
            status if status.is_closed() => return Ok(attempt),
            _ => {
                return Err(ServiceError::Conflict(format!(
                    "Payment {} has already been verified",
                    reference
                )))
            }
        }

        let updated = payment_attempt::ActiveModel {
            reference: Set(reference.as_str().to_string()),
            status: Set(AttemptStatus::Cancelled),
            ..Default::default()
        }
        .update(&*self.db)
        .await
        .map_err(ServiceError::db_error)?;

        counter!("egov_checkout.cancelled", 1);
        info!("checkout cancelled by user");
        self.events
            .emit(Event::CheckoutCancelled {
                reference: reference.as_str().to_string(),
            })
            .await;
        Ok(updated)
    }

    /// Stamps a provider-side confirmation on the matching attempt. Never creates requests.
    /// Returns false when the notification matches no attempt, or reports a
    /// different amount or currency than the attempt was opened with.
    #[instrument(skip(self, notification), fields(reference = %notification.data.reference, event = %notification.event))]
    pub async fn record_provider_confirmation(
        &self,
        notification: &WebhookNotification,
    ) -> Result<bool, ServiceError> {
        if notification.event != CHARGE_SUCCESS {
            info!("ignoring provider notification");
            return Ok(false);
        }

        let reference = notification.data.reference.as_str();
        let Some(attempt) = payment_attempt::Entity::find_by_id(reference.to_string())
            .one(&*self.db)
            .await
            .map_err(ServiceError::db_error)?
        else {
            warn!("provider confirmed a charge with no matching checkout attempt");
            return Ok(false);
        };

        let amount_differs = notification
            .data
            .amount
            .is_some_and(|amount| amount != attempt.amount_minor);
        let currency_differs = notification
            .data
            .currency
            .as_deref()
            .is_some_and(|currency| !currency.eq_ignore_ascii_case(&attempt.currency));
        if amount_differs || currency_differs {
            counter!("egov_webhooks.mismatched", 1);
            error!(
                amount = ?notification.data.amount,
                expected_amount = attempt.amount_minor,
                currency = ?notification.data.currency,
                expected_currency = %attempt.currency,
                "provider confirmation does not match the checkout; not recorded"
            );
            return Ok(false);
        }

        payment_attempt::ActiveModel {
            reference: Set(attempt.reference.clone()),
            provider_confirmed_at: Set(Some(Utc::now())),
            ..Default::default()
        }
        .update(&*self.db)
        .await
        .map_err(ServiceError::db_error)?;

        self.events
            .emit(Event::ProviderConfirmed {
                reference: attempt.reference,
                event: notification.event.clone(),
            })
            .await;
        Ok(true)
    }

    async fn load_owned(
        &self,
        user_id: &str,
        reference: &PaymentReference,
    ) -> Result<payment_attempt::Model, ServiceError> {
        payment_attempt::Entity::find_by_id(reference.as_str().to_string())
            .one(&*self.db)
            .await
            .map_err(ServiceError::db_error)?
            .filter(|a| a.user_id == user_id)
            .ok_or_else(|| ServiceError::NotFound(format!("Checkout {} not found", reference)))
    }

    async fn transition(
        &self,
        reference: &PaymentReference,
        status: AttemptStatus,
        failure_reason: Option<String>,
        request_id: Option<i32>,
    ) {
        let mut update = payment_attempt::ActiveModel {
            reference: Set(reference.as_str().to_string()),
            status: Set(status),
            failure_reason: Set(failure_reason),
            ..Default::default()
        };
        if request_id.is_some() {
            update.request_id = Set(request_id);
        }

        match update.update(&*self.db).await {
            Ok(_) => info!(reference = %reference, ?status, "checkout attempt transitioned"),
            Err(e) => {
                warn!(reference = %reference, ?status, error = %e, "failed to record checkout transition")
            }
        }
    }
}
