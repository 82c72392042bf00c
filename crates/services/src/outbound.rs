//! The seam between services and the session layer. Services push frames to
//! agents through this trait; the server implements it over its session
//! registry. Delivery is best-effort enqueueing and never blocks.

use agentchat_protocol::ServerFrame;
use agentchat_types::ids::AgentId;

/// Frame delivery and connectivity, as the services see it.
pub trait Outbound: Send + Sync {
    /// Enqueues a frame for the agent if it is connected; drops it otherwise.
    fn deliver(&self, agent: &AgentId, frame: ServerFrame);

    /// Whether the agent currently holds an authenticated session.
    fn is_connected(&self, agent: &AgentId) -> bool;
}

/// A no-op sink for unit tests.
#[derive(Default)]
pub struct NullOutbound;

impl Outbound for NullOutbound {
    fn deliver(&self, _agent: &AgentId, _frame: ServerFrame) {}

    fn is_connected(&self, _agent: &AgentId) -> bool {
        false
    }
}
