pub(crate) mod idempotency;
pub(crate) mod retry;
