//! Wire and on-disk types for peerchat history sync.
//!
//! Every peer persists its chat history as a JSON array of records in the chat
//! engine's layout ([`EngineRecord`]) and serves the same messages from
//! `GET /history` with canonical field names:
//!
//! ```text
//! chat engine --append--> messages.json <--load/save-- sync loop --GET /history--> remote peer
//!                              |
//!                         history server <--GET /history-- remote peer
//! ```
//!
//! Peers have no membership protocol. The only way a peer learns about others
//! is through the `sender_ip`/`sender_port` of the messages it already holds,
//! which is why [`PeerKey::from_message`] lives next to the message type.

pub mod messages;
pub mod peer;

pub use messages::{
    EngineRecord, HISTORY_NOT_FOUND, HistoryLog, HistoryResponse, Message, NotFoundBody,
    engine_records,
};
pub use peer::{MalformedPeer, PeerKey};
