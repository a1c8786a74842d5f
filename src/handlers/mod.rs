pub mod catalog;
pub mod checkout;
pub mod payments;
pub mod profile;
pub mod requests;

use crate::{
    catalog::ServiceCatalog,
    config::AppConfig,
    db::DbPool,
    events::EventSender,
    services::{
        certificates::{CertificateRenderer, MeasurementSource, RandomMeasurements, SeededMeasurements},
        checkout::CheckoutService,
        payments::{PaymentVerifier, TransactionVerifier},
        profiles::ProfileService,
        requests::{RequestReader, RequestWriter},
    },
};
use std::sync::Arc;
use std::time::Duration;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub catalog: Arc<ServiceCatalog>,
    pub checkout: Arc<CheckoutService>,
    pub requests: RequestReader,
    pub writer: RequestWriter,
    pub certificates: Arc<CertificateRenderer>,
    pub profiles: ProfileService,
}

impl AppServices {
    /// Wires every service over one pool. The transaction verifier is injected
    /// so tests can stand in for the payment provider.
    pub fn new(
        db_pool: Arc<DbPool>,
        config: &AppConfig,
        catalog: Arc<ServiceCatalog>,
        transaction_verifier: Arc<dyn TransactionVerifier>,
        event_sender: EventSender,
    ) -> Self {
        let writer = RequestWriter::new(db_pool.clone());
        let verifier = PaymentVerifier::new(
            transaction_verifier,
            Duration::from_secs(config.payment_verification_timeout_secs),
        )
        .with_currency(config.payment_currency.clone());
        let checkout = CheckoutService::new(
            db_pool.clone(),
            catalog.clone(),
            verifier,
            writer.clone(),
            event_sender,
            config.payment_currency.clone(),
            config.paystack_public_key.clone(),
        );

        let measurements: Arc<dyn MeasurementSource> = if config.certificate_stable_measurements {
            Arc::new(SeededMeasurements)
        } else {
            Arc::new(RandomMeasurements)
        };
        let certificates = CertificateRenderer::new(
            catalog.clone(),
            measurements,
            config.certificate_issuer_name.clone(),
            config.portal_name.clone(),
        );

        Self {
            catalog,
            checkout: Arc::new(checkout),
            requests: RequestReader::new(db_pool.clone()),
            writer,
            certificates: Arc::new(certificates),
            profiles: ProfileService::new(db_pool),
        }
    }
}
