//! One client connection's view of the relay.
//!
//! A session starts in [`SessionState::Connecting`], becomes
//! [`SessionState::Authenticated`] once its token verifies, and ends in
//! [`SessionState::Disconnected`]. Inbound frames are handled one at a time
//! and every failure is reported back to this connection only.

use std::sync::Arc;

use tracing::{debug, warn};

use parlor_shared::protocol::{ClientEvent, ServerEvent};
use parlor_shared::{SessionId, UserId};

use crate::auth::TokenAuthority;
use crate::error::RelayError;
use crate::hub::{Outbound, RelayHub};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Authenticated {
        session_id: SessionId,
        user_id: UserId,
    },
    Disconnected,
}

pub struct ConnectionSession {
    hub: Arc<RelayHub>,
    outbound: Outbound,
    state: SessionState,
}

impl ConnectionSession {
    pub fn new(hub: Arc<RelayHub>, outbound: Outbound) -> Self {
        Self {
            hub,
            outbound,
            state: SessionState::Connecting,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Verify the connection's credential and register it with the hub.
    ///
    /// On failure the session is left disconnected and the hub never hears
    /// about it.
    pub async fn authenticate(
        &mut self,
        tokens: &TokenAuthority,
        token: Option<&str>,
    ) -> Result<SessionId, RelayError> {
        if self.state != SessionState::Connecting {
            return Err(RelayError::SessionClosed);
        }

        let verified = match token {
            Some(token) => tokens.verify(token).await.map_err(|e| {
                warn!(error = %e, "Rejected connection token");
                RelayError::AuthFailure
            }),
            None => {
                warn!("Connection without token");
                Err(RelayError::AuthFailure)
            }
        };

        let user_id = match verified {
            Ok(user_id) => user_id,
            Err(e) => {
                self.state = SessionState::Disconnected;
                return Err(e);
            }
        };

        let session_id = self.hub.connect(user_id, self.outbound.clone()).await;
        self.state = SessionState::Authenticated {
            session_id,
            user_id,
        };
        Ok(session_id)
    }

    /// Handle one raw text frame, replying with an `error` event on failure.
    pub async fn handle_frame(&mut self, text: &str) {
        let result = match ClientEvent::from_json(text) {
            Ok(event) => self.dispatch(event).await,
            Err(e) => {
                debug!(error = %e, "Unparseable frame");
                Err(RelayError::Validation("Invalid payload".into()))
            }
        };

        if let Err(e) = result {
            self.reply(ServerEvent::error(e.client_message()));
        }
    }

    pub async fn dispatch(&mut self, event: ClientEvent) -> Result<(), RelayError> {
        let SessionState::Authenticated {
            session_id,
            user_id,
        } = self.state
        else {
            return Err(RelayError::SessionClosed);
        };
        debug!(session = %session_id, event = event.name(), "Client event");

        match event {
            ClientEvent::JoinRoom(r) => self.hub.join_room(session_id, user_id, r.room_id).await,
            ClientEvent::LeaveRoom(r) => self.hub.leave_room(session_id, user_id, r.room_id).await,
            ClientEvent::Typing(t) => {
                self.hub
                    .typing(session_id, user_id, t.room_id, t.is_typing)
                    .await
            }
            ClientEvent::SendMessage(m) => self
                .hub
                .send_message(session_id, user_id, m.room_id, &m.content)
                .await
                .map(|_| ()),
        }
    }

    /// Leave every room and drop the session from the hub. Idempotent.
    pub async fn close(&mut self) {
        if let SessionState::Authenticated {
            session_id,
            user_id,
        } = self.state
        {
            self.hub.disconnect(session_id, user_id).await;
        }
        self.state = SessionState::Disconnected;
    }

    fn reply(&self, event: ServerEvent) {
        if self.outbound.send(event).is_err() {
            debug!("Reply dropped, socket writer already gone");
        }
    }
}
