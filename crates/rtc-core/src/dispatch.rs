//! Event dispatch.
//!
//! Maps each inbound event kind to the component that handles it. Errors
//! that the sender must see are turned into events here (or by the handler
//! itself); every error is still returned so the caller can log and count it.

use crate::error::RelayError;
use crate::lifecycle::Session;
use crate::relay::Relay;
use rtc_protocol::{ClientEvent, MessageError, ServerEvent};
use tracing::{debug, warn};

impl Relay {
    /// Handle one inbound event from an active session.
    ///
    /// # Errors
    ///
    /// Returns the error the handler raised. By the time this returns, the
    /// sender has already received `messageError` or `callUnreachable` where
    /// one is due; authorization failures and late-signaling misses are
    /// never surfaced to the client.
    pub async fn dispatch(&self, session: &Session, event: ClientEvent) -> Result<(), RelayError> {
        if !session.is_active() {
            debug!(user = %session.user(), state = %session.state(), "Event on inactive session dropped");
            return Ok(());
        }

        let handle = session.handle();
        let user = handle.user();

        match event {
            ClientEvent::PrivateMessage(msg) => {
                match self
                    .router
                    .send_message(handle, &msg.recipient_id, &msg.content)
                    .await
                {
                    Ok(_) => Ok(()),
                    Err(e) => {
                        handle.send(ServerEvent::MessageError(MessageError {
                            error: e.to_string(),
                            code: e.code(),
                        }));
                        Err(e)
                    }
                }
            }

            ClientEvent::MessageRead(read) => {
                self.router
                    .mark_read(user, &read.message_id)
                    .await
                    .map(|_| ())
                    .inspect_err(|e| warn!(user = %user, error = %e, "Read receipt rejected"))
            }

            ClientEvent::Typing(target) => {
                self.typing.set_typing(user, &target.recipient_id, true);
                Ok(())
            }

            ClientEvent::StopTyping(target) => {
                self.typing.set_typing(user, &target.recipient_id, false);
                Ok(())
            }

            ClientEvent::CallRequest(request) => self.calls.call_request(handle, request).map(|_| ()),

            ClientEvent::CallResponse(response) => {
                self.calls.call_response(user, response);
                Ok(())
            }

            ClientEvent::CallOffer(offer) => {
                self.calls.offer(user, offer);
                Ok(())
            }

            ClientEvent::CallAnswer(answer) => {
                self.calls.answer(user, answer);
                Ok(())
            }

            ClientEvent::IceCandidate(candidate) => {
                self.calls.ice_candidate(user, candidate);
                Ok(())
            }

            ClientEvent::EndCall(end) => {
                self.calls.end_call(user, end);
                Ok(())
            }

            ClientEvent::Ping(ping) => {
                handle.send(ServerEvent::pong(ping.timestamp));
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::auth::Authenticator;
    use crate::connection::EventReceiver;
    use crate::error::RelayError;
    use crate::lifecycle::Session;
    use crate::memory::{MemoryMessageStore, MemoryUserDirectory};
    use crate::relay::{Collaborators, Relay, RelayConfig};
    use rtc_protocol::{
        CallType, ClientEvent, EndCall, PeerIceCandidate, Ping, ServerEvent, TypingIndicator,
        UserId,
    };
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    fn relay() -> Relay {
        let directory = Arc::new(MemoryUserDirectory::new());
        Relay::new(
            Authenticator::new(b"dispatch-secret"),
            Collaborators {
                messages: Arc::new(MemoryMessageStore::new()),
                users: directory.clone(),
                status: directory,
            },
            RelayConfig::default(),
        )
    }

    async fn connect(relay: &Relay, id: &str) -> (Session, EventReceiver) {
        let token = relay
            .authenticator()
            .issue(&UserId::new(id), Duration::from_secs(60))
            .unwrap();
        let (mut session, rx) = relay.authenticate(Some(&token)).unwrap();
        relay.open(&mut session).await;
        (session, rx)
    }

    fn drain(rx: &mut EventReceiver) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push((*event).clone());
        }
        events
    }

    #[tokio::test]
    async fn test_empty_message_reports_validation_error() {
        let relay = relay();
        let (u1, mut u1_rx) = connect(&relay, "u1").await;
        let (_u2, mut u2_rx) = connect(&relay, "u2").await;
        drain(&mut u1_rx);
        drain(&mut u2_rx);

        let err = relay
            .dispatch(&u1, ClientEvent::private_message(UserId::new("u2"), "   "))
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::Validation(_)));

        match drain(&mut u1_rx).as_slice() {
            [ServerEvent::MessageError(e)] => assert_eq!(e.code, 4220),
            other => panic!("Expected one MessageError, got {:?}", other),
        }
        assert!(drain(&mut u2_rx).is_empty());
    }

    #[tokio::test]
    async fn test_typing_and_stop_typing() {
        let relay = relay();
        let (u1, _u1_rx) = connect(&relay, "u1").await;
        let (_u2, mut u2_rx) = connect(&relay, "u2").await;
        drain(&mut u2_rx);

        relay
            .dispatch(&u1, ClientEvent::typing(UserId::new("u2")))
            .await
            .unwrap();
        relay
            .dispatch(&u1, ClientEvent::stop_typing(UserId::new("u2")))
            .await
            .unwrap();

        assert_eq!(
            drain(&mut u2_rx),
            vec![
                ServerEvent::UserTyping(TypingIndicator {
                    user_id: UserId::new("u1"),
                    is_typing: true,
                }),
                ServerEvent::UserTyping(TypingIndicator {
                    user_id: UserId::new("u1"),
                    is_typing: false,
                }),
            ]
        );
    }

    #[tokio::test]
    async fn test_call_to_absent_callee() {
        let relay = relay();
        let (u1, mut u1_rx) = connect(&relay, "u1").await;
        let (_u3, mut u3_rx) = connect(&relay, "u3").await;
        drain(&mut u1_rx);
        drain(&mut u3_rx);

        let result = relay
            .dispatch(
                &u1,
                ClientEvent::call_request(UserId::new("u2"), CallType::Video, None),
            )
            .await;
        assert!(matches!(result, Err(RelayError::UnreachableTarget(_))));

        let events = drain(&mut u1_rx);
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], ServerEvent::CallUnreachable(_)));
        assert!(drain(&mut u3_rx).is_empty());
    }

    #[tokio::test]
    async fn test_full_call_flow() {
        let relay = relay();
        let (caller, mut caller_rx) = connect(&relay, "caller").await;
        let (callee, mut callee_rx) = connect(&relay, "callee").await;
        drain(&mut caller_rx);
        drain(&mut callee_rx);

        relay
            .dispatch(
                &caller,
                ClientEvent::call_request(UserId::new("callee"), CallType::Audio, None),
            )
            .await
            .unwrap();
        let ServerEvent::IncomingCall(ring) = drain(&mut callee_rx).remove(0) else {
            panic!("Expected IncomingCall");
        };
        assert_eq!(ring.caller_id, UserId::new("caller"));

        relay
            .dispatch(
                &callee,
                ClientEvent::CallResponse(rtc_protocol::CallResponse {
                    caller_id: UserId::new("caller"),
                    accepted: true,
                    meeting_id: Some(ring.meeting_id.clone()),
                }),
            )
            .await
            .unwrap();
        relay
            .dispatch(
                &callee,
                ClientEvent::IceCandidate(PeerIceCandidate {
                    user_id: UserId::new("caller"),
                    candidate: json!({"candidate": "c1"}),
                }),
            )
            .await
            .unwrap();
        relay
            .dispatch(
                &caller,
                ClientEvent::EndCall(EndCall {
                    user_id: UserId::new("callee"),
                }),
            )
            .await
            .unwrap();

        let to_caller = drain(&mut caller_rx);
        assert_eq!(to_caller.len(), 2);
        assert!(matches!(&to_caller[0], ServerEvent::CallAccepted(a) if a.accepted && a.meeting_id.as_deref() == Some(ring.meeting_id.as_str())));
        assert!(matches!(&to_caller[1], ServerEvent::IceCandidate(c) if c.caller_id == UserId::new("callee")));

        assert!(matches!(
            drain(&mut callee_rx).as_slice(),
            [ServerEvent::CallEnded(e)] if e.caller_id == UserId::new("caller")
        ));
    }

    #[tokio::test]
    async fn test_ping_answers_pong() {
        let relay = relay();
        let (u1, mut u1_rx) = connect(&relay, "u1").await;
        drain(&mut u1_rx);

        relay
            .dispatch(&u1, ClientEvent::Ping(Ping { timestamp: Some(42) }))
            .await
            .unwrap();
        assert_eq!(drain(&mut u1_rx), vec![ServerEvent::pong(Some(42))]);
    }

    #[tokio::test]
    async fn test_closed_session_dispatch_is_dropped() {
        let relay = relay();
        let (mut u1, _u1_rx) = connect(&relay, "u1").await;
        let (_u2, mut u2_rx) = connect(&relay, "u2").await;
        relay.close(&mut u1).await;
        drain(&mut u2_rx);

        relay
            .dispatch(&u1, ClientEvent::typing(UserId::new("u2")))
            .await
            .unwrap();
        assert!(drain(&mut u2_rx).is_empty());
    }
}
