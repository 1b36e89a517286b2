#![expect(
    clippy::module_name_repetitions,
    reason = "Error types include the module name to indicate their scope"
)]

use std::error::Error as StdError;
use std::fmt;

use crate::ws::group::GroupId;

/// WebSocket error variants.
#[non_exhaustive]
#[derive(Debug)]
pub enum WsError {
    /// Error connecting to or communicating with the WebSocket server
    Connection(tokio_tungstenite::tungstenite::Error),
    /// Error parsing a WebSocket message
    MessageParse(serde_json::Error),
    /// WebSocket connection was closed
    ConnectionClosed,
    /// Received an event with a discriminator no channel recognizes
    UnknownEventKind {
        /// The unrecognized `event_type` value
        event_type: String,
    },
    /// A dial was requested for a group that is no longer registered
    GroupNotFound {
        /// Identifier of the missing group
        group_id: GroupId,
    },
}

impl fmt::Display for WsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connection(e) => write!(f, "WebSocket connection error: {e}"),
            Self::MessageParse(e) => write!(f, "Failed to parse WebSocket message: {e}"),
            Self::ConnectionClosed => write!(f, "WebSocket connection closed"),
            Self::UnknownEventKind { event_type } => {
                write!(f, "Unknown event kind: {event_type}")
            }
            Self::GroupNotFound { group_id } => {
                write!(f, "No registered group with id {group_id}")
            }
        }
    }
}

impl StdError for WsError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Connection(e) => Some(e),
            Self::MessageParse(e) => Some(e),
            _ => None,
        }
    }
}

// Integration with main Error type
impl From<WsError> for crate::error::Error {
    fn from(e: WsError) -> Self {
        let kind = match &e {
            WsError::Connection(_) | WsError::ConnectionClosed => crate::error::Kind::Transport,
            WsError::MessageParse(_) => crate::error::Kind::Parse,
            WsError::UnknownEventKind { .. } => crate::error::Kind::UnknownEvent,
            WsError::GroupNotFound { .. } => crate::error::Kind::Configuration,
        };
        crate::error::Error::with_source(kind, e)
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for crate::error::Error {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        crate::error::Error::with_source(crate::error::Kind::Transport, WsError::Connection(e))
    }
}
