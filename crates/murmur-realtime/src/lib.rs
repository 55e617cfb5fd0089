// Realtime transport adapter: one multiplexed channel carrying row inserts,
// ephemeral broadcasts and presence, fanned out to listeners by event name.

pub mod channel;
pub mod error;
pub mod frames;
pub mod transport;

pub use channel::{ChannelConfig, RealtimeChannel, Subscription};
pub use error::RealtimeError;
pub use frames::Frame;
pub use transport::{connect_websocket, loopback, LoopbackPeer, TransportHandle};
