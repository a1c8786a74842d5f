//! Request form controller: collects values for one service and walks the
//! submission through checkout, verification and recording.

use crate::{
    catalog::{missing_required, FormData, ServiceCatalog},
    entities::request,
    errors::ServiceError,
    services::{
        payments::{CheckoutOutcome, CheckoutRequest, CheckoutWidget, PaymentReference, PaymentVerifier},
        requests::{NewRequest, RequestWriter},
    },
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FormState {
    ServiceUnselected,
    FieldsIncomplete,
    ReadyToSubmit,
    Submitting,
    AwaitingPayment,
    VerifyingPayment,
    Done,
    Failed,
}

impl FormState {
    fn is_in_flight(&self) -> bool {
        matches!(
            self,
            Self::Submitting | Self::AwaitingPayment | Self::VerifyingPayment
        )
    }
}

#[derive(Debug, Clone)]
struct Submission {
    service_type: String,
    form_data: FormData,
    price: i64,
}

pub struct RequestForm {
    catalog: Arc<ServiceCatalog>,
    service: Option<String>,
    values: FormData,
    state: FormState,
    reference: Option<PaymentReference>,
    submission: Option<Submission>,
    message: Option<String>,
    record_id: Option<i32>,
}

impl RequestForm {
    pub fn new(catalog: Arc<ServiceCatalog>) -> Self {
        Self {
            catalog,
            service: None,
            values: FormData::new(),
            state: FormState::ServiceUnselected,
            reference: None,
            submission: None,
            message: None,
            record_id: None,
        }
    }

    pub fn state(&self) -> FormState {
        self.state
    }

    pub fn service(&self) -> Option<&str> {
        self.service.as_deref()
    }

    pub fn values(&self) -> &FormData {
        &self.values
    }

    pub fn reference(&self) -> Option<&PaymentReference> {
        self.reference.as_ref()
    }

    /// User-visible message of the last failure.
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn record_id(&self) -> Option<i32> {
        self.record_id
    }

    /// Switches service and clears every collected value. After `Done` this
    /// is the only way to start a new request.
    pub fn select_service(&mut self, key: &str) -> Result<(), ServiceError> {
        self.ensure_not_in_flight()?;
        if self.catalog.lookup(key).is_none() {
            return Err(ServiceError::UnknownService(key.to_string()));
        }
        self.service = Some(key.to_string());
        self.values.clear();
        self.message = None;
        self.reference = None;
        self.submission = None;
        self.record_id = None;
        self.refresh();
        Ok(())
    }

    pub fn set_field(&mut self, name: &str, value: impl Into<String>) -> Result<(), ServiceError> {
        self.ensure_not_in_flight()?;
        if self.state == FormState::Done {
            return Err(ServiceError::Conflict(
                "This request has already been recorded. Select a service to start a new one."
                    .to_string(),
            ));
        }
        let service = self
            .service
            .as_deref()
            .and_then(|key| self.catalog.lookup(key))
            .ok_or_else(|| ServiceError::InvalidInput("Please select a service".to_string()))?;
        if service.field(name).is_none() {
            return Err(ServiceError::InvalidInput(format!(
                "Unknown field '{}' for {}",
                name, service.display_name
            )));
        }
        self.values.insert(name.to_string(), value.into());
        self.refresh();
        Ok(())
    }

    pub fn can_submit(&self) -> bool {
        self.service.is_some() && !self.state.is_in_flight() && self.state != FormState::Done
    }

    /// Validates the form and prepares checkout under a fresh reference.
    pub fn begin_submit(
        &mut self,
        email: &str,
        currency: &str,
    ) -> Result<CheckoutRequest, ServiceError> {
        self.begin_submit_with_reference(email, currency, PaymentReference::generate())
    }

    pub fn begin_submit_with_reference(
        &mut self,
        email: &str,
        currency: &str,
        reference: PaymentReference,
    ) -> Result<CheckoutRequest, ServiceError> {
        if !self.can_submit() {
            return Err(if self.service.is_none() {
                ServiceError::InvalidInput("Please select a service".to_string())
            } else {
                ServiceError::Conflict("A submission is already in progress".to_string())
            });
        }

        let key = self.service.clone().unwrap_or_default();
        let normalised = match self.catalog.validate_submission(&key, &self.values) {
            Ok(values) => values,
            Err(e) => {
                self.fail(&e);
                return Err(e);
            }
        };
        let Some(service) = self.catalog.lookup(&key) else {
            let e = ServiceError::UnknownService(key);
            self.fail(&e);
            return Err(e);
        };

        let request = CheckoutRequest::for_service(service, email, currency, reference.clone());
        self.submission = Some(Submission {
            service_type: service.key.clone(),
            form_data: normalised,
            price: service.unit_price,
        });
        self.reference = Some(reference);
        self.message = None;
        self.state = FormState::Submitting;
        Ok(request)
    }

    /// The hosted checkout is open; waiting on the user.
    pub fn checkout_opened(&mut self) {
        if self.state == FormState::Submitting {
            self.state = FormState::AwaitingPayment;
        }
    }

    /// Returns the reference to verify. A cancelled checkout or a mismatched
    /// reference fails the form.
    pub fn checkout_returned(
        &mut self,
        outcome: CheckoutOutcome,
    ) -> Result<PaymentReference, ServiceError> {
        let expected = self
            .reference
            .clone()
            .filter(|_| self.state == FormState::AwaitingPayment)
            .ok_or_else(|| ServiceError::Conflict("No checkout is awaiting payment".to_string()))?;

        match outcome {
            CheckoutOutcome::Cancelled => {
                let e = ServiceError::PaymentCancelled(expected.into_inner());
                self.fail(&e);
                Err(e)
            }
            CheckoutOutcome::Success { reference } if reference != expected => {
                let e = ServiceError::verification_failed(
                    expected.as_str(),
                    format!("checkout reported reference {}", reference),
                );
                self.fail(&e);
                Err(e)
            }
            CheckoutOutcome::Success { reference } => Ok(reference),
        }
    }

    pub fn verification_started(&mut self) {
        if self.state == FormState::AwaitingPayment {
            self.state = FormState::VerifyingPayment;
        }
    }

    /// The record to persist, built from the values captured at submit time.
    fn new_request(&self, user_id: &str) -> Result<NewRequest, ServiceError> {
        let submission = self
            .submission
            .as_ref()
            .ok_or_else(|| ServiceError::Conflict("Nothing has been submitted".to_string()))?;
        Ok(NewRequest {
            user_id: user_id.to_string(),
            service_type: submission.service_type.clone(),
            form_data: submission.form_data.clone(),
            price: submission.price,
        })
    }

    pub fn complete(&mut self, record_id: i32) {
        self.state = FormState::Done;
        self.record_id = Some(record_id);
        self.message = None;
    }

    /// Any failure re-enables submission; the next attempt gets a fresh reference.
    pub fn fail(&mut self, error: &ServiceError) {
        self.message = Some(error.response_message());
        self.reference = None;
        self.submission = None;
        self.state = FormState::Failed;
    }

    fn ensure_not_in_flight(&self) -> Result<(), ServiceError> {
        if self.state.is_in_flight() {
            Err(ServiceError::Conflict(
                "The form cannot change while payment is in progress".to_string(),
            ))
        } else {
            Ok(())
        }
    }

    fn refresh(&mut self) {
        let Some(service) = self.service.as_deref().and_then(|k| self.catalog.lookup(k)) else {
            self.state = FormState::ServiceUnselected;
            return;
        };
        self.state = if missing_required(service, &self.values).is_empty() {
            FormState::ReadyToSubmit
        } else {
            FormState::FieldsIncomplete
        };
    }
}

/// Drives a form end to end: checkout widget, provider verification, record write.
/// Persistence is only reachable with a [`VerifiedPayment`](crate::services::payments::VerifiedPayment).
#[derive(Clone)]
pub struct RequestFlow {
    widget: Arc<dyn CheckoutWidget>,
    verifier: PaymentVerifier,
    writer: RequestWriter,
    currency: String,
}

impl RequestFlow {
    pub fn new(
        widget: Arc<dyn CheckoutWidget>,
        verifier: PaymentVerifier,
        writer: RequestWriter,
        currency: impl Into<String>,
    ) -> Self {
        let currency = currency.into();
        Self {
            widget,
            verifier: verifier.with_currency(currency.clone()),
            writer,
            currency,
        }
    }

    pub async fn submit(
        &self,
        form: &mut RequestForm,
        user_id: &str,
        email: &str,
    ) -> Result<request::Model, ServiceError> {
        let checkout = form.begin_submit(email, &self.currency)?;
        self.run(form, user_id, checkout).await
    }

    pub async fn submit_with_reference(
        &self,
        form: &mut RequestForm,
        user_id: &str,
        email: &str,
        reference: PaymentReference,
    ) -> Result<request::Model, ServiceError> {
        let checkout = form.begin_submit_with_reference(email, &self.currency, reference)?;
        self.run(form, user_id, checkout).await
    }

    async fn run(
        &self,
        form: &mut RequestForm,
        user_id: &str,
        checkout: CheckoutRequest,
    ) -> Result<request::Model, ServiceError> {
        form.checkout_opened();
        let outcome = match self.widget.open(&checkout).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(reference = %checkout.reference, error = %e, "checkout could not be opened");
                form.fail(&e);
                return Err(e);
            }
        };

        let reference = form.checkout_returned(outcome)?;
        form.verification_started();

        let payment = match self.verifier.verify(&reference, checkout.amount_minor).await {
            Ok(payment) => payment,
            Err(e) => {
                form.fail(&e);
                return Err(e);
            }
        };

        let new = form.new_request(user_id)?;
        match self.writer.persist(&payment, new).await {
            Ok(record) => {
                info!(reference = %reference, request_id = record.id, "request flow completed");
                form.complete(record.id);
                Ok(record)
            }
            Err(e) => {
                form.fail(&e);
                Err(e)
            }
        }
    }
}
