//! Domain model: endpoints, heartbeats, transition events and check tasks.

mod endpoint;
mod event;
mod heartbeat;

pub use endpoint::{CheckKind, Endpoint, EndpointId, EndpointStatus, NewEndpoint, UserId};
pub use event::{CheckTask, TransitionEvent};
pub use heartbeat::{Heartbeat, Outcome};
