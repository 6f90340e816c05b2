mod engine;
mod event;
mod record;
mod status;

pub use engine::{SkipReason, Transition, TransitionEngine};
pub use event::{Event, Operation};
pub use record::{DocumentRecord, RecordKey, SuspendedStatuses};
pub use status::Status;
