//! Durable retry queue for verified payments whose request record could not be
//! written. Entries are keyed by payment reference; the worker replays the
//! idempotent persist until it succeeds or attempts run out.

use crate::entities::{
    outbox_event::{self, OutboxStatus},
    payment_attempt::{self, AttemptStatus},
};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::payments::{PaymentReference, VerifiedPayment};
use crate::services::requests::{NewRequest, RequestWriter};
use chrono::Utc;
use metrics::counter;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, QuerySelect, Set, SqlErr,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub const PERSIST_REQUEST: &str = "PersistRequest";
pub const MAX_ATTEMPTS: i32 = 8;
const BASE_BACKOFF_SECS: u64 = 2;

/// Outbox payload: everything needed to replay the write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingRequestWrite {
    pub reference: String,
    pub amount_minor: i64,
    pub request: NewRequest,
}

/// Queues a pending write. A second enqueue for the same reference is a no-op.
pub async fn enqueue(
    db: &impl ConnectionTrait,
    pending: &PendingRequestWrite,
) -> Result<(), ServiceError> {
    let existing = outbox_event::Entity::find()
        .filter(outbox_event::Column::Reference.eq(pending.reference.as_str()))
        .one(db)
        .await
        .map_err(ServiceError::db_error)?;
    if existing.is_some() {
        debug!(reference = %pending.reference, "outbox entry already present");
        return Ok(());
    }

    let now = Utc::now();
    let entry = outbox_event::ActiveModel {
        id: Set(Uuid::new_v4()),
        reference: Set(pending.reference.clone()),
        event_type: Set(PERSIST_REQUEST.to_string()),
        payload: Set(serde_json::to_value(pending)?),
        status: Set(OutboxStatus::Pending),
        attempts: Set(0),
        available_at: Set(now),
        last_error: Set(None),
        created_at: Set(now),
        updated_at: Set(None),
        processed_at: Set(None),
    };

    match entry.insert(db).await {
        Ok(saved) => {
            counter!("egov_outbox.enqueued", 1);
            info!(reference = %saved.reference, id = %saved.id, "enqueued pending request write");
            Ok(())
        }
        Err(e) if matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => Ok(()),
        Err(e) => Err(ServiceError::db_error(e)),
    }
}

/// Background worker polling the outbox. Returns the task handle so callers can abort it.
pub fn start_worker(
    db: Arc<DatabaseConnection>,
    writer: RequestWriter,
    sender: EventSender,
    poll_interval: Duration,
    batch_size: u64,
    claim_lease: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(?poll_interval, batch_size, ?claim_lease, "outbox worker started");
        loop {
            if let Err(e) = drain_once(&db, &writer, &sender, batch_size, claim_lease).await {
                error!("outbox worker error: {}", e);
            }
            sleep(poll_interval).await;
        }
    })
}

/// Processes one batch of due entries. Returns how many entries were delivered.
///
/// Claiming an entry moves it to `processing` and pushes `available_at` out by
/// `claim_lease`. An entry still `processing` once its lease has run out belongs to
/// a worker that died or could not write back its outcome, and is claimed again.
pub async fn drain_once(
    db: &DatabaseConnection,
    writer: &RequestWriter,
    sender: &EventSender,
    batch_size: u64,
    claim_lease: Duration,
) -> Result<usize, ServiceError> {
    let now = Utc::now();
    let due = outbox_event::Entity::find()
        .filter(
            outbox_event::Column::Status.is_in([OutboxStatus::Pending, OutboxStatus::Processing]),
        )
        .filter(outbox_event::Column::AvailableAt.lte(now))
        .order_by_asc(outbox_event::Column::CreatedAt)
        .limit(batch_size)
        .all(db)
        .await
        .map_err(ServiceError::db_error)?;

    let lease = chrono::Duration::from_std(claim_lease)
        .map_err(|e| ServiceError::InternalError(format!("invalid outbox lease: {}", e)))?;

    let mut delivered = 0;
    for entry in due {
        if entry.status == OutboxStatus::Processing {
            counter!("egov_outbox.reclaimed", 1);
            warn!(reference = %entry.reference, attempts = entry.attempts, "reclaiming outbox entry with an expired lease");
        }

        // Claim against the row as read, so two workers cannot both take it
        let attempts = entry.attempts + 1;
        let claimed_at = Utc::now();
        let claimed = outbox_event::Entity::update_many()
            .set(outbox_event::ActiveModel {
                status: Set(OutboxStatus::Processing),
                attempts: Set(attempts),
                available_at: Set(claimed_at + lease),
                updated_at: Set(Some(claimed_at)),
                ..Default::default()
            })
            .filter(outbox_event::Column::Id.eq(entry.id))
            .filter(outbox_event::Column::Status.eq(entry.status))
            .filter(outbox_event::Column::Attempts.eq(entry.attempts))
            .exec(db)
            .await
            .map_err(ServiceError::db_error)?;
        if claimed.rows_affected != 1 {
            continue;
        }

        let pending: PendingRequestWrite = match serde_json::from_value(entry.payload.clone()) {
            Ok(p) => p,
            Err(e) => {
                error!(reference = %entry.reference, error = %e, "undecodable outbox payload");
                give_up(db, sender, &entry, attempts, format!("undecodable payload: {}", e)).await;
                continue;
            }
        };

        let reference = match PaymentReference::parse(&pending.reference) {
            Ok(r) => r,
            Err(e) => {
                give_up(db, sender, &entry, attempts, e.to_string()).await;
                continue;
            }
        };

        let payment = VerifiedPayment::from_recorded(reference, pending.amount_minor);
        match writer.persist(&payment, pending.request).await {
            Ok(record) => {
                counter!("egov_outbox.delivered", 1);
                info!(reference = %entry.reference, request_id = record.id, attempts, "outbox write delivered");
                mark(db, &entry, OutboxStatus::Delivered, None).await;
                mark_attempt_persisted(db, &entry.reference, record.id).await;
                sender
                    .emit(Event::RequestRecorded {
                        reference: entry.reference.clone(),
                        request_id: record.id,
                    })
                    .await;
                delivered += 1;
            }
            Err(e) if attempts < MAX_ATTEMPTS => {
                counter!("egov_outbox.retried", 1);
                let backoff = BASE_BACKOFF_SECS.saturating_pow(attempts as u32);
                let jitter = (Utc::now().timestamp_millis() as u64) % 1000;
                let available_at = Utc::now()
                    + chrono::Duration::seconds(backoff as i64)
                    + chrono::Duration::milliseconds(jitter as i64);
                warn!(reference = %entry.reference, attempts, backoff, error = %e, "outbox write failed, retrying");

                let retry = outbox_event::ActiveModel {
                    id: Set(entry.id),
                    status: Set(OutboxStatus::Pending),
                    available_at: Set(available_at),
                    last_error: Set(Some(e.to_string())),
                    updated_at: Set(Some(Utc::now())),
                    ..Default::default()
                };
                if let Err(e) = retry.update(db).await {
                    // The lease set at claim time brings the entry back
                    warn!(reference = %entry.reference, error = %e, "failed scheduling outbox retry; entry will be reclaimed after its lease");
                }
            }
            Err(e) => {
                give_up(db, sender, &entry, attempts, e.to_string()).await;
            }
        }
    }

    Ok(delivered)
}

async fn give_up(
    db: &DatabaseConnection,
    sender: &EventSender,
    entry: &outbox_event::Model,
    attempts: i32,
    reason: String,
) {
    counter!("egov_outbox.failed", 1);
    error!(reference = %entry.reference, attempts, %reason, "outbox write abandoned; manual reconciliation required");
    mark(db, entry, OutboxStatus::Failed, Some(reason.clone())).await;
    sender
        .emit(Event::ReconciliationRequired {
            reference: entry.reference.clone(),
            attempts,
            reason,
        })
        .await;
}

async fn mark(
    db: &DatabaseConnection,
    entry: &outbox_event::Model,
    status: OutboxStatus,
    last_error: Option<String>,
) {
    let now = Utc::now();
    let update = outbox_event::ActiveModel {
        id: Set(entry.id),
        status: Set(status),
        last_error: Set(last_error),
        updated_at: Set(Some(now)),
        processed_at: Set(Some(now)),
        ..Default::default()
    };
    if let Err(e) = update.update(db).await {
        warn!(reference = %entry.reference, ?status, error = %e, "failed updating outbox entry; it will be reclaimed after its lease");
    }
}

async fn mark_attempt_persisted(db: &DatabaseConnection, reference: &str, request_id: i32) {
    let update = payment_attempt::ActiveModel {
        reference: Set(reference.to_string()),
        status: Set(AttemptStatus::Persisted),
        request_id: Set(Some(request_id)),
        ..Default::default()
    };
    if let Err(e) = update.update(db).await {
        // Attempt rows are audit data; the request itself is recorded
        warn!(reference, error = %e, "failed marking checkout attempt persisted");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{establish_connection_with_config, run_migrations, DbConfig};
    use crate::entities::request;
    use sea_orm::{DbBackend, Statement};
    use tokio::sync::mpsc;

    async fn setup() -> Arc<DatabaseConnection> {
        let pool = establish_connection_with_config(&DbConfig::in_memory())
            .await
            .unwrap();
        run_migrations(&pool).await.unwrap();
        Arc::new(pool)
    }

    const LEASE: Duration = Duration::from_secs(300);

    async fn exec(db: &DatabaseConnection, sql: &str) {
        db.execute(Statement::from_string(DbBackend::Sqlite, sql.to_string()))
            .await
            .unwrap();
    }

    fn pending(reference: &str) -> PendingRequestWrite {
        PendingRequestWrite {
            reference: reference.to_string(),
            amount_minor: 200_000,
            request: NewRequest {
                user_id: "u1".into(),
                service_type: "tax-receipt".into(),
                form_data: [("fullName".to_string(), "Ada Obi".to_string())].into(),
                price: 2000,
            },
        }
    }

    fn sender() -> (EventSender, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(16);
        (EventSender::new(tx), rx)
    }

    async fn entry(db: &DatabaseConnection, reference: &str) -> outbox_event::Model {
        outbox_event::Entity::find()
            .filter(outbox_event::Column::Reference.eq(reference))
            .one(db)
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn enqueue_is_keyed_by_reference() {
        let db = setup().await;
        enqueue(&*db, &pending("EGOV-1-abc")).await.unwrap();
        enqueue(&*db, &pending("EGOV-1-abc")).await.unwrap();

        let all = outbox_event::Entity::find().all(&*db).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].status, OutboxStatus::Pending);
        assert_eq!(all[0].event_type, PERSIST_REQUEST);
    }

    #[tokio::test]
    async fn drain_replays_the_write() {
        let db = setup().await;
        let writer = RequestWriter::new(db.clone());
        let (sender, mut rx) = sender();
        enqueue(&*db, &pending("EGOV-1-abc")).await.unwrap();

        let delivered = drain_once(&db, &writer, &sender, 10, LEASE).await.unwrap();
        assert_eq!(delivered, 1);

        let records = request::Entity::find().all(&*db).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].payment_reference, "EGOV-1-abc");
        assert_eq!(entry(&db, "EGOV-1-abc").await.status, OutboxStatus::Delivered);
        assert!(matches!(rx.recv().await, Some(Event::RequestRecorded { .. })));

        // Nothing left to do
        assert_eq!(drain_once(&db, &writer, &sender, 10, LEASE).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn failed_write_is_rescheduled_with_backoff() {
        let db = setup().await;
        let writer = RequestWriter::new(db.clone());
        let (sender, _rx) = sender();
        enqueue(&*db, &pending("EGOV-1-abc")).await.unwrap();
        db.execute(Statement::from_string(
            DbBackend::Sqlite,
            "DROP TABLE requests".to_string(),
        ))
        .await
        .unwrap();

        assert_eq!(drain_once(&db, &writer, &sender, 10, LEASE).await.unwrap(), 0);

        let retried = entry(&db, "EGOV-1-abc").await;
        assert_eq!(retried.status, OutboxStatus::Pending);
        assert_eq!(retried.attempts, 1);
        assert!(retried.available_at > Utc::now());
        assert!(retried.last_error.is_some());
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let db = setup().await;
        let writer = RequestWriter::new(db.clone());
        let (sender, mut rx) = sender();
        enqueue(&*db, &pending("EGOV-1-abc")).await.unwrap();

        let current = entry(&db, "EGOV-1-abc").await;
        outbox_event::ActiveModel {
            id: Set(current.id),
            attempts: Set(MAX_ATTEMPTS - 1),
            ..Default::default()
        }
        .update(&*db)
        .await
        .unwrap();
        db.execute(Statement::from_string(
            DbBackend::Sqlite,
            "DROP TABLE requests".to_string(),
        ))
        .await
        .unwrap();

        drain_once(&db, &writer, &sender, 10, LEASE).await.unwrap();

        let failed = entry(&db, "EGOV-1-abc").await;
        assert_eq!(failed.status, OutboxStatus::Failed);
        assert_eq!(failed.attempts, MAX_ATTEMPTS);
        assert!(matches!(
            rx.recv().await,
            Some(Event::ReconciliationRequired { attempts, .. }) if attempts == MAX_ATTEMPTS
        ));
    }

    #[tokio::test]
    async fn entry_stranded_in_processing_is_reclaimed_after_its_lease() {
        let db = setup().await;
        let writer = RequestWriter::new(db.clone());
        let (sender, mut rx) = sender();
        enqueue(&*db, &pending("EGOV-1-abc")).await.unwrap();

        // Store outage: the write fails and so does putting the entry back to pending
        exec(
            &db,
            "CREATE TRIGGER reject_request BEFORE INSERT ON requests \
             BEGIN SELECT RAISE(ABORT, 'store unavailable'); END",
        )
        .await;
        exec(
            &db,
            "CREATE TRIGGER reject_reschedule BEFORE UPDATE ON outbox_events \
             WHEN NEW.status = 'pending' BEGIN SELECT RAISE(ABORT, 'store unavailable'); END",
        )
        .await;

        assert_eq!(drain_once(&db, &writer, &sender, 10, LEASE).await.unwrap(), 0);
        let stranded = entry(&db, "EGOV-1-abc").await;
        assert_eq!(stranded.status, OutboxStatus::Processing);
        assert_eq!(stranded.attempts, 1);

        exec(&db, "DROP TRIGGER reject_request").await;
        exec(&db, "DROP TRIGGER reject_reschedule").await;

        // Lease still running: nobody touches it
        assert_eq!(drain_once(&db, &writer, &sender, 10, LEASE).await.unwrap(), 0);
        assert_eq!(entry(&db, "EGOV-1-abc").await.attempts, 1);

        // Lease ran out
        outbox_event::ActiveModel {
            id: Set(stranded.id),
            available_at: Set(Utc::now() - chrono::Duration::seconds(1)),
            ..Default::default()
        }
        .update(&*db)
        .await
        .unwrap();

        assert_eq!(drain_once(&db, &writer, &sender, 10, LEASE).await.unwrap(), 1);
        let recovered = entry(&db, "EGOV-1-abc").await;
        assert_eq!(recovered.status, OutboxStatus::Delivered);
        assert_eq!(recovered.attempts, 2);
        assert_eq!(request::Entity::find().all(&*db).await.unwrap().len(), 1);
        assert!(matches!(rx.recv().await, Some(Event::RequestRecorded { .. })));
    }

    #[tokio::test]
    async fn stranded_entry_out_of_attempts_is_flagged_for_reconciliation() {
        let db = setup().await;
        let writer = RequestWriter::new(db.clone());
        let (sender, mut rx) = sender();
        enqueue(&*db, &pending("EGOV-1-abc")).await.unwrap();

        let current = entry(&db, "EGOV-1-abc").await;
        outbox_event::ActiveModel {
            id: Set(current.id),
            status: Set(OutboxStatus::Processing),
            attempts: Set(MAX_ATTEMPTS - 1),
            available_at: Set(Utc::now() - chrono::Duration::seconds(1)),
            ..Default::default()
        }
        .update(&*db)
        .await
        .unwrap();
        exec(&db, "DROP TABLE requests").await;

        drain_once(&db, &writer, &sender, 10, LEASE).await.unwrap();

        assert_eq!(entry(&db, "EGOV-1-abc").await.status, OutboxStatus::Failed);
        assert!(matches!(
            rx.recv().await,
            Some(Event::ReconciliationRequired { .. })
        ));
    }
}
