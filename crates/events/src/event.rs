use chrono::{DateTime, Utc};

use ledgerflow_core::TenantId;

/// Something that happened to a ledger document. Events are facts: they are
/// never edited, and each one names the tenant and document it belongs to so
/// it can be audited on its own.
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable dotted name (e.g. "wallet.transaction.approved").
    fn event_type(&self) -> &'static str;

    /// Payload schema version, bumped on breaking changes.
    fn version(&self) -> u32;

    /// Business time.
    fn occurred_at(&self) -> DateTime<Utc>;

    fn tenant_id(&self) -> TenantId;

    /// Stringified id of the document the event belongs to.
    fn subject(&self) -> String;
}
