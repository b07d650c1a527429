//! Routes parsed POS requests to the decision engine and builds responses.
//!
//! One frame payload can carry several XML documents; each gets its own
//! response, except the customer begin/end notifications, for which the POS
//! expects silence. Infrastructure faults never escape to the socket as
//! panics: a rewards request that cannot be decided produces the `Not
//! Found` payload the POS already knows how to handle.

use tracing::{error, info, warn};
use uuid::Uuid;

use tier3_core::engine::Tier3Engine;

use super::error::ProtocolError;
use super::xml::{
    build_cancel_response, build_finalize_response, build_generic_ok,
    build_get_rewards_response, build_online_status_response, parse_request, split_fragments,
    GetRewardsEnvelope, PosRequest,
};

/// Stateless request router over a shared engine.
#[derive(Clone)]
pub struct Dispatcher {
    engine: Tier3Engine,
}

impl Dispatcher {
    #[must_use]
    pub fn new(engine: Tier3Engine) -> Self {
        Self { engine }
    }

    /// Handles one frame payload; returns the response payloads to send, in
    /// order. An empty vector means the POS expects no reply.
    #[must_use]
    pub fn handle_payload(&self, payload: &[u8]) -> Vec<String> {
        let text = String::from_utf8_lossy(payload);
        let fragments = split_fragments(&text);
        if fragments.is_empty() {
            // Control-only payloads get no reply, matching POS expectations.
            return Vec::new();
        }

        let mut responses = Vec::with_capacity(fragments.len());
        for fragment in fragments {
            if let Some(response) = self.handle_fragment(fragment) {
                responses.push(response);
            }
        }
        responses
    }

    fn handle_fragment(&self, fragment: &str) -> Option<String> {
        match parse_request(fragment) {
            Ok(PosRequest::GetLoyaltyOnlineStatus { pos_sequence_id }) => {
                info!(pos_sequence_id, "online status requested");
                Some(build_online_status_response(&pos_sequence_id, true))
            }
            Ok(PosRequest::GetRewards(envelope)) => Some(self.handle_get_rewards(*envelope)),
            Ok(PosRequest::FinalizeRewards {
                pos_sequence_id,
                offline,
                loyalty_reward_id,
            }) => {
                // Offline finalization with no reward id means there is
                // nothing to settle; the POS treats `Not Found` as normal.
                let success = !(offline && loyalty_reward_id.is_none());
                info!(
                    pos_sequence_id,
                    offline,
                    reward_id = loyalty_reward_id.as_deref().unwrap_or("-"),
                    success,
                    "finalize rewards"
                );
                Some(build_finalize_response(success))
            }
            Ok(PosRequest::CancelTransaction { pos_sequence_id }) => {
                info!(pos_sequence_id, "transaction cancelled by POS");
                Some(build_cancel_response(&pos_sequence_id))
            }
            Ok(PosRequest::BeginCustomer | PosRequest::EndCustomer) => None,
            Ok(PosRequest::Other { tag }) => {
                warn!(tag, "unhandled request tag, answering generic OK");
                Some(build_generic_ok(&tag))
            }
            Err(err) => {
                warn!(error = %err, "malformed POS payload");
                Some("Not Found".to_string())
            }
        }
    }

    fn handle_get_rewards(&self, envelope: GetRewardsEnvelope) -> String {
        let GetRewardsEnvelope {
            pos_sequence_id,
            loyalty_sequence_id,
            existing_reward_ids,
            request,
        } = envelope;

        let raw_loyalty_id = request.loyalty_id.clone().unwrap_or_default();
        let loyalty_sequence = loyalty_sequence_id
            .clone()
            .unwrap_or_else(generate_loyalty_sequence_id);

        let context = match self.engine.evaluate(request) {
            Ok(context) => context,
            Err(err) => {
                // Infrastructure fault: no rewards, error shape the POS
                // tolerates. Stage-one audit rows, if any, are already
                // durable.
                error!(error = %err, "rewards evaluation failed");
                return "Not Found".to_string();
            }
        };

        // A repeated request for a transaction that already carries loyalty
        // promotions swaps the old rewards for the fresh ones, reusing the
        // first existing id so the POS correlates the replacement.
        let (remove_ids, id_override) =
            if !existing_reward_ids.is_empty() && loyalty_sequence_id.is_some() {
                let first = existing_reward_ids[0].clone();
                (existing_reward_ids, Some(first))
            } else {
                (Vec::new(), None)
            };

        build_get_rewards_response(
            &pos_sequence_id,
            &loyalty_sequence,
            &raw_loyalty_id,
            context.validation.valid,
            context.flags(),
            &remove_ids,
            context.rewards(),
            id_override.as_deref(),
            &context.receipt_lines,
        )
    }
}

/// Mints a short opaque loyalty sequence id for responses to requests that
/// did not carry one.
fn generate_loyalty_sequence_id() -> String {
    Uuid::new_v4().simple().to_string()[..9].to_string()
}
