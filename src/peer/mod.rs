pub mod connection;
pub mod data_channel;
pub mod types;

pub use connection::{
    attach_local_tracks, new_peer_connection, new_peer_connection_with, open_rtc_link,
    route_inbound_links, RtcMediaSession,
};
pub use data_channel::{DataChannelManager, LinkNotice, RtcDataLink, SendOutcome};
pub use types::{ServerConfig, WirePayload};
