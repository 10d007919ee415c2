//! Domain events and their serialized audit form.

pub mod event;
pub mod record;

pub use event::Event;
pub use record::{EventRecord, EventRecordError};
