//! Event types for the relay protocol.
//!
//! Events are the unit of communication between browsers and the relay.
//! Both directions use the same envelope: the event name under `event` and
//! its camelCase payload under `data`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{MessageId, UserId};

/// Media requested for a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallType {
    /// Voice only.
    Audio,
    /// Voice and camera.
    Video,
}

// --- Client payloads ---

/// Outbound direct message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrivateMessage {
    pub recipient_id: UserId,
    pub content: String,
}

/// Recipient acknowledging that a message was seen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRead {
    pub message_id: MessageId,
}

/// Target of a `typing` / `stopTyping` signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingTarget {
    pub recipient_id: UserId,
}

/// Caller ringing a callee.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallRequest {
    pub recipient_id: UserId,
    pub call_type: CallType,
    /// Left empty to have the relay mint one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meeting_id: Option<String>,
}

/// Callee accepting or rejecting a ring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallResponse {
    pub caller_id: UserId,
    pub accepted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meeting_id: Option<String>,
}

/// SDP offer addressed to a peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerOffer {
    pub user_id: UserId,
    pub offer: Value,
}

/// SDP answer addressed to a peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerAnswer {
    pub user_id: UserId,
    pub answer: Value,
}

/// ICE candidate addressed to a peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerIceCandidate {
    pub user_id: UserId,
    pub candidate: Value,
}

/// Hang-up addressed to a peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndCall {
    pub user_id: UserId,
}

/// Application-level keepalive, echoed back as `pong`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Ping {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
}

// --- Server payloads ---

/// Sent once after the connection is admitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connected {
    pub user_id: UserId,
    /// Protocol major version.
    pub version: u8,
    /// Recommended heartbeat interval in milliseconds.
    pub heartbeat: u32,
}

/// Display attributes of a message's author.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SenderInfo {
    pub id: UserId,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

/// A persisted message as seen by clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: MessageId,
    pub sender: SenderInfo,
    pub recipient: UserId,
    pub content: String,
    /// Milliseconds since the Unix epoch, assigned at persistence time.
    pub timestamp: u64,
    pub read: bool,
}

/// Failure to send a direct message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageError {
    pub error: String,
    pub code: u16,
}

/// Read receipt forwarded to the original sender.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadReceipt {
    pub message_id: MessageId,
}

/// Typing indicator forwarded to the recipient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingIndicator {
    pub user_id: UserId,
    pub is_typing: bool,
}

/// Presence change broadcast to every connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserStatus {
    pub user_id: UserId,
    pub is_online: bool,
}

/// Ring delivered to the callee.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomingCall {
    pub caller_id: UserId,
    pub call_type: CallType,
    pub meeting_id: String,
}

/// Returned to a caller whose callee is not connected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallUnreachable {
    pub recipient_id: UserId,
    pub meeting_id: String,
    pub message: String,
}

/// Callee's decision delivered to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallAccepted {
    pub recipient_id: UserId,
    pub accepted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meeting_id: Option<String>,
}

/// SDP offer annotated with its sender.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallOffer {
    pub caller_id: UserId,
    pub offer: Value,
}

/// SDP answer annotated with its sender.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallAnswer {
    pub caller_id: UserId,
    pub answer: Value,
}

/// ICE candidate annotated with its sender.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub caller_id: UserId,
    pub candidate: Value,
}

/// Hang-up annotated with its sender.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallEnded {
    pub caller_id: UserId,
}

/// Protocol-level error response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: u16,
    pub message: String,
}

/// Events a client may send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ClientEvent {
    PrivateMessage(PrivateMessage),
    MessageRead(MessageRead),
    Typing(TypingTarget),
    StopTyping(TypingTarget),
    CallRequest(CallRequest),
    CallResponse(CallResponse),
    CallOffer(PeerOffer),
    CallAnswer(PeerAnswer),
    IceCandidate(PeerIceCandidate),
    EndCall(EndCall),
    Ping(Ping),
}

impl ClientEvent {
    /// Wire name of the event, used for logging and metrics labels.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            ClientEvent::PrivateMessage(_) => "privateMessage",
            ClientEvent::MessageRead(_) => "messageRead",
            ClientEvent::Typing(_) => "typing",
            ClientEvent::StopTyping(_) => "stopTyping",
            ClientEvent::CallRequest(_) => "callRequest",
            ClientEvent::CallResponse(_) => "callResponse",
            ClientEvent::CallOffer(_) => "callOffer",
            ClientEvent::CallAnswer(_) => "callAnswer",
            ClientEvent::IceCandidate(_) => "iceCandidate",
            ClientEvent::EndCall(_) => "endCall",
            ClientEvent::Ping(_) => "ping",
        }
    }

    /// Create a `privateMessage` event.
    #[must_use]
    pub fn private_message(recipient_id: UserId, content: impl Into<String>) -> Self {
        ClientEvent::PrivateMessage(PrivateMessage {
            recipient_id,
            content: content.into(),
        })
    }

    /// Create a `messageRead` event.
    #[must_use]
    pub fn message_read(message_id: MessageId) -> Self {
        ClientEvent::MessageRead(MessageRead { message_id })
    }

    /// Create a `typing` event.
    #[must_use]
    pub fn typing(recipient_id: UserId) -> Self {
        ClientEvent::Typing(TypingTarget { recipient_id })
    }

    /// Create a `stopTyping` event.
    #[must_use]
    pub fn stop_typing(recipient_id: UserId) -> Self {
        ClientEvent::StopTyping(TypingTarget { recipient_id })
    }

    /// Create a `callRequest` event.
    #[must_use]
    pub fn call_request(
        recipient_id: UserId,
        call_type: CallType,
        meeting_id: Option<String>,
    ) -> Self {
        ClientEvent::CallRequest(CallRequest {
            recipient_id,
            call_type,
            meeting_id,
        })
    }
}

/// Events the relay sends to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerEvent {
    Connected(Connected),
    NewMessage(ChatMessage),
    MessageSent(ChatMessage),
    MessageError(MessageError),
    MessageReadUpdate(ReadReceipt),
    UserTyping(TypingIndicator),
    UserStatus(UserStatus),
    IncomingCall(IncomingCall),
    CallUnreachable(CallUnreachable),
    CallAccepted(CallAccepted),
    CallOffer(CallOffer),
    CallAnswer(CallAnswer),
    IceCandidate(IceCandidate),
    CallEnded(CallEnded),
    Pong(Ping),
    Error(ErrorPayload),
}

impl ServerEvent {
    /// Wire name of the event, used for logging and metrics labels.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            ServerEvent::Connected(_) => "connected",
            ServerEvent::NewMessage(_) => "newMessage",
            ServerEvent::MessageSent(_) => "messageSent",
            ServerEvent::MessageError(_) => "messageError",
            ServerEvent::MessageReadUpdate(_) => "messageReadUpdate",
            ServerEvent::UserTyping(_) => "userTyping",
            ServerEvent::UserStatus(_) => "userStatus",
            ServerEvent::IncomingCall(_) => "incomingCall",
            ServerEvent::CallUnreachable(_) => "callUnreachable",
            ServerEvent::CallAccepted(_) => "callAccepted",
            ServerEvent::CallOffer(_) => "callOffer",
            ServerEvent::CallAnswer(_) => "callAnswer",
            ServerEvent::IceCandidate(_) => "iceCandidate",
            ServerEvent::CallEnded(_) => "callEnded",
            ServerEvent::Pong(_) => "pong",
            ServerEvent::Error(_) => "error",
        }
    }

    /// Create a `userStatus` event.
    #[must_use]
    pub fn user_status(user_id: UserId, is_online: bool) -> Self {
        ServerEvent::UserStatus(UserStatus { user_id, is_online })
    }

    /// Create an `error` event.
    #[must_use]
    pub fn error(code: u16, message: impl Into<String>) -> Self {
        ServerEvent::Error(ErrorPayload {
            code,
            message: message.into(),
        })
    }

    /// Create a `pong` event.
    #[must_use]
    pub fn pong(timestamp: Option<u64>) -> Self {
        ServerEvent::Pong(Ping { timestamp })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_client_event_wire_shape() {
        let raw = json!({
            "event": "privateMessage",
            "data": {"recipientId": "u2", "content": "hi"}
        });

        let event: ClientEvent = serde_json::from_value(raw).unwrap();
        assert_eq!(event, ClientEvent::private_message(UserId::new("u2"), "hi"));
        assert_eq!(event.kind(), "privateMessage");
    }

    #[test]
    fn test_call_request_meeting_id_optional() {
        let raw = json!({
            "event": "callRequest",
            "data": {"recipientId": "u2", "callType": "video"}
        });

        match serde_json::from_value::<ClientEvent>(raw).unwrap() {
            ClientEvent::CallRequest(req) => {
                assert_eq!(req.call_type, CallType::Video);
                assert!(req.meeting_id.is_none());
            }
            other => panic!("Expected CallRequest, got {:?}", other),
        }
    }

    #[test]
    fn test_signaling_payload_is_opaque() {
        let raw = json!({
            "event": "iceCandidate",
            "data": {
                "userId": "u1",
                "candidate": {"candidate": "candidate:1 1 udp 2122260223 10.0.0.2 54400 typ host", "sdpMLineIndex": 0}
            }
        });

        let event: ClientEvent = serde_json::from_value(raw.clone()).unwrap();
        let ClientEvent::IceCandidate(ice) = event else {
            panic!("Expected IceCandidate");
        };
        assert_eq!(ice.candidate, raw["data"]["candidate"]);
    }

    #[test]
    fn test_server_event_wire_shape() {
        let event = ServerEvent::user_status(UserId::new("u1"), false);
        let value = serde_json::to_value(&event).unwrap();

        assert_eq!(
            value,
            json!({"event": "userStatus", "data": {"userId": "u1", "isOnline": false}})
        );
    }

    #[test]
    fn test_unknown_event_rejected() {
        let raw = json!({"event": "joinRoom", "data": {}});
        assert!(serde_json::from_value::<ClientEvent>(raw).is_err());
    }
}
