pub mod outbox_event;
pub mod payment_attempt;
pub mod request;
pub mod user_profile;
