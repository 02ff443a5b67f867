//! Job lifecycle state: the record, its transitions and the durable store.

pub mod clock;
pub mod error;
pub mod model;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::StateError;
pub use model::{JobState, ProgressEntry, Stage, TaskState};
pub use store::{StateStore, StoreHealth, DEFAULT_STATE_TTL};
