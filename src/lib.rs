pub mod commands;
pub mod config;
pub mod error;
pub mod events;
pub mod identity;
pub mod logger;
pub mod manager;
pub mod media;
pub mod peer;
pub mod session;
pub mod transport;
pub mod utils;

pub use commands::CallHandle;
pub use config::{CallConfig, MediaConstraints};
pub use error::{CallError, MediaError, TransportError};
pub use events::CallEvent;
pub use manager::spawn;
pub use session::{CallStatus, Message, Sender, Session};
