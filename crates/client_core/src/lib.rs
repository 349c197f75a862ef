//! Chat session synchronizer: keeps the friends roster, the selected peer's
//! presence, the conversation view and the single live connection consistent
//! while the user switches between peers.

pub mod connection;
pub mod conversation;
pub mod error;
pub mod identity;
pub mod live;
pub mod presence;
pub mod roster;
pub mod session;
pub mod transport;

pub use connection::{ConnectionChange, ConnectionId, ConnectionState, LiveConnectionManager};
pub use conversation::ConversationStore;
pub use error::{ClientError, ClientResult};
pub use live::{LiveConnector, LiveSignal, LiveSocket, WsConnector};
pub use session::{ChatSession, Epoch, SelectionOutcome, SessionEvent};
pub use transport::{BackendEndpoint, ChatBackend, HttpBackend};

#[cfg(test)]
#[path = "tests/support.rs"]
mod test_support;
