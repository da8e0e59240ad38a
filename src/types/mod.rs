//! Core data types of a packet stream.
//!
//! - [`PacketStreamSource`] describes one logical channel and its packet contract
//! - [`Packet`] is one timestamped payload read back from a stream
//! - [`UpdateRate`] controls delivery rate of playback subscriptions

mod packet;
mod source;
mod update_rate;

pub use packet::Packet;
pub use source::{PacketStreamSource, SourceId};
pub use update_rate::UpdateRate;
