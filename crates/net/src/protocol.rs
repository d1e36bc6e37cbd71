//! Network protocol message types
//!
//! All messages are JSON-serialized and length-prefixed on the wire.

use huddle_core::{ClientIdentity, MembershipSnapshot, RoomRecord, RoomUpdate, UpdateOutcome};
use serde::{Deserialize, Serialize};

/// Network protocol messages
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Message {
    /// Join a presence channel
    Subscribe {
        channel: String,
        presence_key: ClientIdentity,
    },

    /// Announce an identity as present on a subscribed channel
    Track {
        channel: String,
        identity: ClientIdentity,
    },

    /// Leave a presence channel
    Unsubscribe { channel: String },

    /// Store requests, answered with a `Reply` carrying the same id
    CreateRoom { request_id: u64, room: RoomRecord },
    GetRoom { request_id: u64, room_id: String },
    UpdateRoom {
        request_id: u64,
        room_id: String,
        update: RoomUpdate,
    },
    ListRooms { request_id: u64 },
    WatchRoom { request_id: u64, room_id: String },

    /// Stop pushing changes of a room
    UnwatchRoom { room_id: String },

    /// Channel subscription confirmed (sent again after re-subscribe)
    Subscribed { channel: String },

    /// Full presence state of a channel
    PresenceSync {
        channel: String,
        members: MembershipSnapshot,
    },

    /// Answer to a store request
    Reply { request_id: u64, reply: Reply },

    /// A watched room was updated
    RoomChanged { room: RoomRecord },

    /// Connection refused (hub full)
    Rejected { reason: String },

    Ping,
    Pong,

    /// Hub is shutting down
    ServerShutdown,
}

/// Body of a store reply
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Reply {
    Room { room: Option<RoomRecord> },
    Rooms { rooms: Vec<RoomRecord> },
    Updated { outcome: UpdateOutcome },
    Watching,
    Error { code: ErrorCode, message: String },
}

/// Coarse classification of store errors carried over the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    NotFound,
    InvalidOperation,
    Internal,
}

impl Reply {
    pub fn from_error(e: &huddle_core::Error) -> Self {
        let code = match e {
            huddle_core::Error::NotFound(_) => ErrorCode::NotFound,
            huddle_core::Error::InvalidOperation(_) => ErrorCode::InvalidOperation,
            _ => ErrorCode::Internal,
        };
        Reply::Error {
            code,
            message: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use huddle_core::RoomStatus;

    #[test]
    fn test_presence_sync_wire_shape() {
        let members: MembershipSnapshot = ["bbb", "aaa"]
            .into_iter()
            .map(ClientIdentity::from)
            .collect();
        let msg = Message::PresenceSync {
            channel: "room:lobby".into(),
            members,
        };

        let json: serde_json::Value = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "PresenceSync");
        assert_eq!(json["members"], serde_json::json!(["aaa", "bbb"]));
    }

    #[test]
    fn test_update_reply_decodes() {
        let msg = Message::Reply {
            request_id: 7,
            reply: Reply::Updated {
                outcome: UpdateOutcome::Skipped {
                    current: RoomStatus::Started,
                },
            },
        };

        let bytes = serde_json::to_vec(&msg).unwrap();
        let decoded: Message = serde_json::from_slice(&bytes).unwrap();
        match decoded {
            Message::Reply {
                request_id: 7,
                reply: Reply::Updated { outcome },
            } => assert_eq!(
                outcome,
                UpdateOutcome::Skipped {
                    current: RoomStatus::Started
                }
            ),
            other => panic!("Wrong message: {:?}", other),
        }
    }

    #[test]
    fn test_error_reply_code() {
        let reply = Reply::from_error(&huddle_core::Error::NotFound("Room 'x'".into()));
        assert!(matches!(
            reply,
            Reply::Error {
                code: ErrorCode::NotFound,
                ..
            }
        ));
    }
}
