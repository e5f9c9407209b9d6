pub mod ids;
pub mod message;
pub mod priority;
pub mod events;

pub use ids::JobId;
pub use message::{AttemptError, JobMessage};
pub use priority::{JobPriority, PrioritySelector};
pub use events::JobEvent;
