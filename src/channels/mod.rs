//! Inbound sources and the outbound chat transport.
//!
//! Three sources feed the event queue: the chat transport listener, the
//! loopback HTTP API, and the local console when no transport is connected.

mod channel;
mod chunker;
mod console;
mod http;
mod presence;

pub use channel::{
    Attachment, ChatMessage, HistoryQuery, InboundMessage, MessageStream, OfflineTransport,
    Transport,
};
pub use chunker::{DEFAULT_CHUNK_LIMIT, chunk_message};
pub use console::{pump_lines, spawn_console};
pub use http::{ApiServer, routes as api_routes};
pub use presence::{PresenceScope, TYPING_REFRESH};
