//! Provider trait for packet sources

use crate::Result;
use crate::types::{Packet, PacketStreamSource, SourceId};

/// Trait for packet sources driven by the playback [`Driver`](crate::driver::Driver)
///
/// Providers abstract over where packets come from (a recording, a pipe, a
/// synthetic generator) and handle their own timing internally.
#[async_trait::async_trait]
pub trait Provider: Send + 'static {
    /// Get the next packet
    ///
    /// Returns:
    /// - `Ok(Some(packet))` - Packet is due now
    /// - `Ok(None)` - Stream ended (normal termination)
    /// - `Err(e)` - Error occurred
    async fn next_packet(&mut self) -> Result<Option<Packet>>;

    /// Sources the provider delivers packets for
    fn sources(&self) -> Vec<PacketStreamSource>;

    /// Native packet rate of `source` in Hz, if known
    fn rate_hz(&self, source: SourceId) -> Option<f64>;
}
