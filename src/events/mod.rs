use metrics::counter;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

pub mod outbox;

/// Lifecycle of a paid request, keyed by payment reference. Every event is
/// written to the audit log so a reference can be traced end to end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    CheckoutInitiated {
        reference: String,
        user_id: String,
        service_type: String,
        amount_minor: i64,
    },
    CheckoutCancelled {
        reference: String,
    },
    PaymentVerified {
        reference: String,
    },
    VerificationFailed {
        reference: String,
        reason: String,
    },
    RequestRecorded {
        reference: String,
        request_id: i32,
    },
    /// Verified payment whose record write failed; queued in the outbox.
    PersistenceDeferred {
        reference: String,
        reason: String,
    },
    /// The outbox gave up; needs manual reconciliation.
    ReconciliationRequired {
        reference: String,
        attempts: i32,
        reason: String,
    },
    /// Provider webhook confirmed a charge.
    ProviderConfirmed {
        reference: String,
        event: String,
    },
}

impl Event {
    pub fn reference(&self) -> &str {
        match self {
            Event::CheckoutInitiated { reference, .. }
            | Event::CheckoutCancelled { reference }
            | Event::PaymentVerified { reference }
            | Event::VerificationFailed { reference, .. }
            | Event::RequestRecorded { reference, .. }
            | Event::PersistenceDeferred { reference, .. }
            | Event::ReconciliationRequired { reference, .. }
            | Event::ProviderConfirmed { reference, .. } => reference,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Event::CheckoutInitiated { .. } => "checkout_initiated",
            Event::CheckoutCancelled { .. } => "checkout_cancelled",
            Event::PaymentVerified { .. } => "payment_verified",
            Event::VerificationFailed { .. } => "verification_failed",
            Event::RequestRecorded { .. } => "request_recorded",
            Event::PersistenceDeferred { .. } => "persistence_deferred",
            Event::ReconciliationRequired { .. } => "reconciliation_required",
            Event::ProviderConfirmed { .. } => "provider_confirmed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Fire-and-forget; a closed channel is logged, never propagated.
    pub async fn emit(&self, event: Event) {
        let reference = event.reference().to_string();
        if let Err(e) = self.send(event).await {
            warn!(%reference, error = %e, "event dropped");
        }
    }
}

/// Audit loop: one structured log line per event. Ends when every sender is dropped.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        counter!("egov_events.processed", 1);
        let name = event.name();

        match &event {
            Event::VerificationFailed { reference, reason } => {
                error!(event = name, %reference, %reason, "audit");
            }
            Event::PersistenceDeferred { reference, reason } => {
                error!(event = name, %reference, %reason, "audit");
            }
            Event::ReconciliationRequired {
                reference,
                attempts,
                reason,
            } => {
                error!(event = name, %reference, attempts, %reason, "audit: manual reconciliation required");
            }
            Event::CheckoutInitiated {
                reference,
                user_id,
                service_type,
                amount_minor,
            } => {
                info!(event = name, %reference, %user_id, %service_type, amount_minor, "audit");
            }
            Event::RequestRecorded {
                reference,
                request_id,
            } => {
                info!(event = name, %reference, request_id, "audit");
            }
            Event::ProviderConfirmed { reference, event: provider_event } => {
                info!(event = name, %reference, %provider_event, "audit");
            }
            Event::CheckoutCancelled { reference } | Event::PaymentVerified { reference } => {
                info!(event = name, %reference, "audit");
            }
        }
    }

    info!("Event processing loop stopped");
}
