//! Conversational state: identity keys, per-flow awaiting maps, shared
//! flow context, cleanup and expiry.

mod batcher;
mod cleanup;
mod flow_state;
mod identity;
mod map;
mod registry;
mod sweeper;

pub use cleanup::CleanupService;
pub use flow_state::{BaseAutosKind, FlowContext, FlowEntity};
pub use identity::ConversationId;
pub use registry::{AwaitingFlow, FlowStateRegistry, Pending};
pub use sweeper::spawn_expiry_sweep;

#[cfg(test)]
pub use sweeper::sweep_expired;
