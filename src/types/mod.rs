mod clock;
mod priority;
mod resource;

pub use clock::{Clock, ManualClock, SystemClock};
pub use priority::Priority;
pub use resource::{MessageObject, Resettable, Resource, ResourceKind, StreamBuffer, UriObject};
