//! Coordination channel: reconnecting duplex link plus message protocol

pub mod backoff;
pub mod channel;
pub mod protocol;
pub mod transport;

pub use backoff::Backoff;
pub use channel::{ChannelSettings, ConnectionState, MessageSink, SignalingChannel, SignalingEvent};
pub use protocol::{
    parse_inbound, CapsCamera, CapsReport, InboundMessage, Orientation, OutboundMessage, RemoteConfig,
};
pub use transport::{DuplexConnector, DuplexLink, LinkEvent, WebSocketConnector};
