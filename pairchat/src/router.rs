//! Applies server events to [`ChatState`].

use pairchat_proto::event::{ClientEvent, SeenAck, ServerEvent};
use pairchat_proto::message::{MessageStatus, UserId};
use pairchat_proto::user::User;

use crate::state::ChatState;

/// What changed after an event was applied, for the UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatUpdate {
    /// The online set was replaced.
    Presence(Vec<UserId>),
    /// A message was added to the open conversation with `peer`.
    Message { peer: UserId },
    /// A message arrived for a conversation that is not open.
    Unseen { peer: UserId, count: u32 },
    /// My messages to `peer` moved to `status`.
    Status { peer: UserId, status: MessageStatus },
    /// A directory entry changed.
    Profile(User),
}

/// Result of routing one event.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Routed {
    pub update: Option<ChatUpdate>,
    /// Event to send back on the socket.
    pub reply: Option<ClientEvent>,
}

/// Routes inbound events to state mutations.
#[derive(Debug, Default, Clone, Copy)]
pub struct StatusEventRouter;

impl StatusEventRouter {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Applies `event` to `state`. Each event only touches the fields it
    /// names.
    pub fn apply(self, state: &mut ChatState, event: ServerEvent) -> Routed {
        match event {
            ServerEvent::PresenceSet(online) => {
                state.set_online(online.clone());
                Routed {
                    update: Some(ChatUpdate::Presence(online)),
                    reply: None,
                }
            }
            ServerEvent::NewMessage(message) => {
                let me = state.me().clone();
                if message.sender_id == me {
                    let peer = message.receiver_id.clone();
                    let added = state.upsert_message(message);
                    return Routed {
                        update: added.then_some(ChatUpdate::Message { peer }),
                        reply: None,
                    };
                }
                if message.receiver_id != me {
                    tracing::warn!(message_id = %message.id, "message not addressed to us, ignoring");
                    return Routed::default();
                }

                let peer = message.sender_id.clone();
                if state.is_open(&peer) {
                    state.mark_counted(message.id);
                    if !state.upsert_message(message) {
                        return Routed::default();
                    }
                    Routed {
                        update: Some(ChatUpdate::Message { peer: peer.clone() }),
                        reply: Some(ClientEvent::SeenAck(SeenAck {
                            sender_id: peer,
                            receiver_id: me,
                        })),
                    }
                } else {
                    let count = state.count_unseen(&message);
                    Routed {
                        update: Some(ChatUpdate::Unseen { peer, count }),
                        reply: None,
                    }
                }
            }
            ServerEvent::Delivered(delivered) => {
                raise(state, delivered.receiver_id, MessageStatus::Delivered)
            }
            ServerEvent::Seen(seen) => raise(state, seen.viewer_id, MessageStatus::Seen),
            ServerEvent::ProfileUpdated(user) => {
                state.upsert_user(user.clone());
                Routed {
                    update: Some(ChatUpdate::Profile(user)),
                    reply: None,
                }
            }
        }
    }
}

fn raise(state: &mut ChatState, peer: UserId, status: MessageStatus) -> Routed {
    let changed = state.raise_status(&peer, status);
    tracing::debug!(peer = %peer, %status, changed, "status event applied");
    Routed {
        update: (changed > 0).then_some(ChatUpdate::Status { peer, status }),
        reply: None,
    }
}
