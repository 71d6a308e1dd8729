//! Call signaling relay.
//!
//! Forwards call-setup events between two peers. No call table is kept: each
//! event is routed on the peer id it carries, and SDP / ICE payloads pass
//! through untouched. Only the initial ring reports an absent peer; every
//! later event is fire-and-forget.

use crate::connection::ConnectionHandle;
use crate::error::RelayError;
use crate::presence::PresenceRegistry;
use rand::Rng;
use rtc_protocol::{
    CallAccepted, CallAnswer, CallEnded, CallOffer, CallRequest, CallResponse, CallUnreachable,
    EndCall, IceCandidate, IncomingCall, PeerAnswer, PeerIceCandidate, PeerOffer, ServerEvent,
    UserId,
};
use std::sync::Arc;
use tracing::{debug, trace};

/// Length of relay-minted meeting ids.
pub const MEETING_ID_LENGTH: usize = 10;

const MEETING_ID_CHARSET: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// Mint a random alphanumeric meeting id.
#[must_use]
pub fn generate_meeting_id() -> String {
    let mut rng = rand::rng();
    (0..MEETING_ID_LENGTH)
        .map(|_| MEETING_ID_CHARSET[rng.random_range(0..MEETING_ID_CHARSET.len())] as char)
        .collect()
}

/// Routes call-lifecycle events between peers.
#[derive(Debug, Clone)]
pub struct CallRelay {
    presence: Arc<PresenceRegistry>,
}

impl CallRelay {
    /// Create a relay over the shared registry.
    #[must_use]
    pub fn new(presence: Arc<PresenceRegistry>) -> Self {
        Self { presence }
    }

    /// Ring the callee.
    ///
    /// A missing meeting id is minted here. If the callee is absent the
    /// caller's connection gets `callUnreachable` and nobody else hears
    /// anything.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::UnreachableTarget`] when the callee is absent,
    /// after the caller has been told.
    pub fn call_request(
        &self,
        caller: &ConnectionHandle,
        request: CallRequest,
    ) -> Result<String, RelayError> {
        let meeting_id = request
            .meeting_id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(generate_meeting_id);

        let ring = ServerEvent::IncomingCall(IncomingCall {
            caller_id: caller.user().clone(),
            call_type: request.call_type,
            meeting_id: meeting_id.clone(),
        });

        if self.presence.send_to(&request.recipient_id, ring) {
            debug!(
                caller = %caller.user(),
                callee = %request.recipient_id,
                meeting = %meeting_id,
                call_type = ?request.call_type,
                "Ringing"
            );
            return Ok(meeting_id);
        }

        debug!(caller = %caller.user(), callee = %request.recipient_id, "Callee unreachable");
        caller.send(ServerEvent::CallUnreachable(CallUnreachable {
            recipient_id: request.recipient_id.clone(),
            meeting_id,
            message: "User is offline".to_string(),
        }));
        Err(RelayError::UnreachableTarget(request.recipient_id))
    }

    /// Deliver the callee's accept/reject to the caller.
    pub fn call_response(&self, callee: &UserId, response: CallResponse) -> bool {
        self.forward(
            &response.caller_id,
            ServerEvent::CallAccepted(CallAccepted {
                recipient_id: callee.clone(),
                accepted: response.accepted,
                meeting_id: response.meeting_id,
            }),
        )
    }

    /// Forward an SDP offer.
    pub fn offer(&self, from: &UserId, offer: PeerOffer) -> bool {
        self.forward(
            &offer.user_id,
            ServerEvent::CallOffer(CallOffer {
                caller_id: from.clone(),
                offer: offer.offer,
            }),
        )
    }

    /// Forward an SDP answer.
    pub fn answer(&self, from: &UserId, answer: PeerAnswer) -> bool {
        self.forward(
            &answer.user_id,
            ServerEvent::CallAnswer(CallAnswer {
                caller_id: from.clone(),
                answer: answer.answer,
            }),
        )
    }

    /// Forward an ICE candidate.
    pub fn ice_candidate(&self, from: &UserId, candidate: PeerIceCandidate) -> bool {
        self.forward(
            &candidate.user_id,
            ServerEvent::IceCandidate(IceCandidate {
                caller_id: from.clone(),
                candidate: candidate.candidate,
            }),
        )
    }

    /// Forward a hang-up.
    pub fn end_call(&self, from: &UserId, end: EndCall) -> bool {
        self.forward(
            &end.user_id,
            ServerEvent::CallEnded(CallEnded {
                caller_id: from.clone(),
            }),
        )
    }

    fn forward(&self, target: &UserId, event: ServerEvent) -> bool {
        let kind = event.kind();
        let delivered = self.presence.send_to(target, event);
        trace!(target = %target, event = kind, delivered, "Signal forwarded");
        delivered
    }
}
