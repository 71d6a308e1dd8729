//! # rtc-protocol
//!
//! Wire protocol for the rtc-relay presence and call-signaling server.
//!
//! Every event travels as an adjacently tagged object:
//!
//! ```json
//! {"event": "privateMessage", "data": {"recipientId": "u2", "content": "hi"}}
//! ```
//!
//! ## Event families
//!
//! - `privateMessage` / `messageRead` - Direct messages and read receipts
//! - `typing` / `stopTyping` - Ephemeral typing indicators
//! - `callRequest` .. `endCall` - WebRTC call-setup signaling
//! - `userStatus` - Presence broadcasts (server only)
//!
//! ## Example
//!
//! ```rust
//! use rtc_protocol::{codec, ClientEvent, UserId};
//!
//! let event = ClientEvent::typing(UserId::new("bob"));
//! let text = codec::encode_text(&event).unwrap();
//! let decoded: ClientEvent = codec::decode_text(&text).unwrap();
//! assert_eq!(event, decoded);
//! ```

pub mod codec;
pub mod events;
pub mod ids;
pub mod version;

pub use codec::{decode_text, encode_text, ProtocolError};
pub use events::{
    CallAccepted, CallAnswer, CallEnded, CallOffer, CallRequest, CallResponse, CallType,
    CallUnreachable, ChatMessage, ClientEvent, Connected, EndCall, ErrorPayload, IceCandidate,
    IncomingCall, MessageError, MessageRead, PeerAnswer, PeerIceCandidate, PeerOffer, Ping,
    PrivateMessage, ReadReceipt, SenderInfo, ServerEvent, TypingIndicator, TypingTarget,
    UserStatus,
};
pub use ids::{MessageId, UserId};
pub use version::{Version, PROTOCOL_VERSION};
