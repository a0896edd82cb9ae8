use graphlens_core::{Envelope, RuntimeMessage};
use tokio::time::Instant;

use crate::subsystems::coordinator::Coordinator;

/// Route a capture message to the coordinator handler for its type.
///
/// `init` is handled by the connection layer before it reaches here, since
/// it needs the connection's outgoing port.
pub fn route_envelope(coordinator: &mut Coordinator, envelope: Envelope, now: Instant) {
    match envelope.message {
        RuntimeMessage::GraphqlResponse(response) => match envelope.sender {
            Some(sender) => coordinator.on_relayed_response(sender.tab_id, response, now),
            None => {
                tracing::warn!(url = %response.url, "Dropping graphql-response without a sender tab");
            }
        },
        RuntimeMessage::WebRequest { event } => coordinator.on_network_event(event, now),
        RuntimeMessage::Init { tab_id } => {
            tracing::warn!(tab_id, "Ignoring init outside a panel connection");
        }
    }
}
