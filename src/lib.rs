pub mod api;
pub mod cli;
pub mod config;
pub mod connection;
pub mod error;
pub mod logging;
pub mod message_log;
pub mod model;
pub mod paginator;
pub mod read_state;
pub mod session;
pub mod stomp;
pub mod viewport;

pub use api::{MessageGateway, MessagePage, RestGateway};
pub use config::ClientConfig;
pub use connection::{ChatWsClient, ConnectionEvent, ConnectionStatus, WsConfig};
pub use error::{ClientError, Result};
pub use message_log::{MergeOutcome, MessageLog};
pub use model::*;
pub use paginator::HistoryPaginator;
pub use read_state::ReadTracker;
pub use session::{ChatSession, SessionState};
pub use viewport::{ScrollAction, Viewport, VisibleSlice};
