//! Paystack adapter: checkout parameters, server-side transaction verification and
//! webhook authentication.
//!
//! The client-side success callback is never trusted on its own. A request can only
//! be recorded with a [`VerifiedPayment`], which this module hands out after the
//! provider confirms the transaction.

use crate::catalog::ServiceDefinition;
use crate::errors::ServiceError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use metrics::counter;
use once_cell::sync::Lazy;
use rand::Rng;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::Sha512;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;

#[cfg(test)]
use mockall::automock;

pub const PAYSTACK_SIGNATURE_HEADER: &str = "x-paystack-signature";

const REFERENCE_PREFIX: &str = "EGOV";
const REFERENCE_SUFFIX_LEN: usize = 9;
const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

static REFERENCE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^EGOV-[0-9]{1,20}-[a-z0-9]{1,16}$").unwrap());

type HmacSha512 = Hmac<Sha512>;

/// Provider-facing idempotency key for a single checkout attempt.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(transparent)]
#[schema(value_type = String, example = "EGOV-1718012345678-k3j9x0a2b")]
pub struct PaymentReference(String);

impl PaymentReference {
    /// `EGOV-<unix millis>-<9 base36 chars>`. Every call yields a fresh value.
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let suffix: String = (0..REFERENCE_SUFFIX_LEN)
            .map(|_| BASE36[rng.gen_range(0..BASE36.len())] as char)
            .collect();
        Self(format!(
            "{}-{}-{}",
            REFERENCE_PREFIX,
            Utc::now().timestamp_millis(),
            suffix
        ))
    }

    pub fn parse(value: &str) -> Result<Self, ServiceError> {
        if REFERENCE_PATTERN.is_match(value) {
            Ok(Self(value.to_string()))
        } else {
            Err(ServiceError::InvalidInput(format!(
                "Malformed payment reference: {}",
                value
            )))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for PaymentReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for PaymentReference {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Parameters handed to the hosted checkout widget.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct CheckoutRequest {
    /// Kobo
    #[schema(example = 200000)]
    pub amount_minor: i64,
    #[schema(example = "NGN")]
    pub currency: String,
    pub email: String,
    pub reference: PaymentReference,
}

impl CheckoutRequest {
    pub fn for_service(
        service: &ServiceDefinition,
        email: impl Into<String>,
        currency: impl Into<String>,
        reference: PaymentReference,
    ) -> Self {
        Self {
            amount_minor: to_minor_units(service.unit_price),
            currency: currency.into(),
            email: email.into(),
            reference,
        }
    }
}

pub fn to_minor_units(price: i64) -> i64 {
    price.saturating_mul(100)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckoutOutcome {
    /// Client-reported success. Untrusted until verified.
    Success { reference: PaymentReference },
    /// The user closed the checkout without paying.
    Cancelled,
}

/// The hosted checkout session. Suspends until the user pays or closes it.
#[async_trait]
pub trait CheckoutWidget: Send + Sync {
    async fn open(&self, request: &CheckoutRequest) -> Result<CheckoutOutcome, ServiceError>;
}

/// What the provider says about a transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionVerification {
    /// Top-level `status` of the provider envelope
    pub confirmed: bool,
    /// `data.status`, e.g. `success`, `failed`, `abandoned`
    pub status: String,
    pub reference: Option<String>,
    pub amount: Option<i64>,
    pub currency: Option<String>,
    pub message: Option<String>,
}

impl TransactionVerification {
    pub fn is_success(&self) -> bool {
        self.confirmed && self.status == "success"
    }
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait TransactionVerifier: Send + Sync {
    async fn verify_transaction(
        &self,
        reference: &PaymentReference,
    ) -> Result<TransactionVerification, ServiceError>;
}

#[derive(Debug, Deserialize)]
struct PaystackEnvelope {
    status: bool,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: Option<PaystackTransaction>,
}

#[derive(Debug, Deserialize)]
struct PaystackTransaction {
    #[serde(default)]
    status: String,
    #[serde(default)]
    reference: Option<String>,
    #[serde(default)]
    amount: Option<i64>,
    #[serde(default)]
    currency: Option<String>,
}

/// Paystack REST client. Holds the secret key; never exposed to clients.
#[derive(Clone)]
pub struct PaystackClient {
    client: reqwest::Client,
    base_url: String,
    secret_key: String,
}

impl fmt::Debug for PaystackClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PaystackClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl PaystackClient {
    pub fn new(
        base_url: impl Into<String>,
        secret_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ServiceError::InternalError(format!("http client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            secret_key: secret_key.into(),
        })
    }
}

#[async_trait]
impl TransactionVerifier for PaystackClient {
    #[instrument(skip(self), fields(reference = %reference))]
    async fn verify_transaction(
        &self,
        reference: &PaymentReference,
    ) -> Result<TransactionVerification, ServiceError> {
        let url = format!("{}/transaction/verify/{}", self.base_url, reference);

        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.secret_key)
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "paystack verify request failed");
                ServiceError::ExternalServiceError(format!("paystack unreachable: {}", e))
            })?;

        let http_status = response.status();
        let envelope: PaystackEnvelope = response.json().await.map_err(|e| {
            warn!(%http_status, error = %e, "paystack returned an unreadable body");
            ServiceError::ExternalServiceError(format!(
                "unexpected paystack response ({}): {}",
                http_status, e
            ))
        })?;

        let data = envelope.data;
        Ok(TransactionVerification {
            confirmed: envelope.status,
            status: data
                .as_ref()
                .map(|d| d.status.clone())
                .unwrap_or_else(|| "unknown".to_string()),
            reference: data.as_ref().and_then(|d| d.reference.clone()),
            amount: data.as_ref().and_then(|d| d.amount),
            currency: data.and_then(|d| d.currency),
            message: envelope.message,
        })
    }
}

/// Proof that the provider confirmed a payment. Only [`PaymentVerifier`] creates these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedPayment {
    reference: PaymentReference,
    amount_minor: Option<i64>,
    verified_at: DateTime<Utc>,
}

impl VerifiedPayment {
    fn new(reference: PaymentReference, amount_minor: Option<i64>) -> Self {
        Self {
            reference,
            amount_minor,
            verified_at: Utc::now(),
        }
    }

    /// Rebuilds the proof for a payment whose verification was already recorded
    /// on a checkout attempt (outbox replay, idempotent confirm).
    pub(crate) fn from_recorded(reference: PaymentReference, amount_minor: i64) -> Self {
        Self::new(reference, Some(amount_minor))
    }

    pub fn reference(&self) -> &PaymentReference {
        &self.reference
    }

    pub fn amount_minor(&self) -> Option<i64> {
        self.amount_minor
    }

    pub fn verified_at(&self) -> DateTime<Utc> {
        self.verified_at
    }
}

/// Currency every checkout is charged in unless configured otherwise.
pub const DEFAULT_CURRENCY: &str = "NGN";

/// Bounded, authoritative verification of a client-reported success.
#[derive(Clone)]
pub struct PaymentVerifier {
    verifier: Arc<dyn TransactionVerifier>,
    timeout: Duration,
    currency: String,
}

impl PaymentVerifier {
    pub fn new(verifier: Arc<dyn TransactionVerifier>, timeout: Duration) -> Self {
        Self {
            verifier,
            timeout,
            currency: DEFAULT_CURRENCY.to_string(),
        }
    }

    /// Currency the provider must report for a payment to count.
    pub fn with_currency(mut self, currency: impl Into<String>) -> Self {
        self.currency = currency.into();
        self
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    /// Every failure mode (timeout, transport error, non-success, amount or
    /// currency mismatch) comes back as `VerificationFailed` carrying the reference.
    #[instrument(skip(self), fields(reference = %reference))]
    pub async fn verify(
        &self,
        reference: &PaymentReference,
        expected_amount_minor: i64,
    ) -> Result<VerifiedPayment, ServiceError> {
        let outcome = tokio::time::timeout(self.timeout, self.verifier.verify_transaction(reference))
            .await;

        let verification = match outcome {
            Err(_) => {
                return Err(self.reject(
                    reference,
                    format!("verification timed out after {:?}", self.timeout),
                ))
            }
            Ok(Err(e)) => return Err(self.reject(reference, e.to_string())),
            Ok(Ok(v)) => v,
        };

        if !verification.is_success() {
            return Err(self.reject(
                reference,
                format!(
                    "provider status={} confirmed={}",
                    verification.status, verification.confirmed
                ),
            ));
        }

        if let Some(reported) = verification.reference.as_deref() {
            if reported != reference.as_str() {
                return Err(self.reject(
                    reference,
                    format!("provider reported reference {}", reported),
                ));
            }
        }

        if let Some(amount) = verification.amount {
            if amount != expected_amount_minor {
                return Err(self.reject(
                    reference,
                    format!(
                        "amount mismatch: expected {} got {}",
                        expected_amount_minor, amount
                    ),
                ));
            }
        }

        if let Some(currency) = verification.currency.as_deref() {
            if !currency.eq_ignore_ascii_case(&self.currency) {
                return Err(self.reject(
                    reference,
                    format!("currency mismatch: expected {} got {}", self.currency, currency),
                ));
            }
        }

        counter!("egov_payments.verification.succeeded", 1);
        info!("payment verified");
        Ok(VerifiedPayment::new(
            reference.clone(),
            verification.amount,
        ))
    }

    fn reject(&self, reference: &PaymentReference, reason: String) -> ServiceError {
        counter!("egov_payments.verification.failed", 1);
        error!(reference = %reference, %reason, "payment verification failed");
        ServiceError::verification_failed(reference.as_str(), reason)
    }
}

/// Paystack webhook notification. Only the fields used for reconciliation.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookNotification {
    pub event: String,
    pub data: WebhookTransaction,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookTransaction {
    pub reference: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub amount: Option<i64>,
    #[serde(default)]
    pub currency: Option<String>,
}

/// HMAC-SHA512 of the raw body, hex encoded, keyed with the secret key.
pub fn sign_webhook(secret: &str, body: &[u8]) -> String {
    // HMAC accepts keys of any length
    let mut mac = match HmacSha512::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

pub fn verify_webhook_signature(secret: &str, body: &[u8], signature: &str) -> bool {
    let expected = sign_webhook(secret, body);
    !expected.is_empty() && constant_time_eq(&expected, &signature.to_ascii_lowercase())
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut res = 0u8;
    for (x, y) in a.as_bytes().iter().zip(b.as_bytes()) {
        res |= x ^ y;
    }
    res == 0
}

#[cfg(test)]
pub(crate) fn verified_for_tests(reference: &str) -> VerifiedPayment {
    VerifiedPayment::new(PaymentReference(reference.to_string()), None)
}
