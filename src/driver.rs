//! Driver spawns and manages the playback task

use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace};

use super::provider::Provider;
use super::types::Packet;

/// Result of spawning the driver task
pub struct DriverChannels {
    /// Receiver for played-back packets; `resubscribe()` for each consumer
    pub packets: broadcast::Receiver<Arc<Packet>>,
    /// Flips to `true` when the provider stream has ended
    pub finished: watch::Receiver<bool>,
    /// Cancellation token for graceful shutdown
    pub cancel: CancellationToken,
}

/// Driver spawns and manages the packet reader task
///
/// The task owns the Provider and fans every packet out to all subscribers.
/// Slow subscribers lag and lose packets rather than stalling playback.
pub struct Driver;

impl Driver {
    /// Maximum consecutive provider errors before the task gives up
    pub const MAX_ERRORS: u32 = 10;

    /// Spawn the driver task for the given provider
    ///
    /// `capacity` bounds how many packets each subscriber may fall behind.
    pub fn spawn<P>(provider: P, capacity: usize) -> DriverChannels
    where
        P: Provider,
    {
        let (packet_tx, packet_rx) = broadcast::channel(capacity.max(1));
        let (finished_tx, finished_rx) = watch::channel(false);

        // Create cancellation token for coordinated shutdown
        let cancel = CancellationToken::new();
        let cancel_task = cancel.clone();

        tokio::spawn(async move {
            Self::packet_reader_task(provider, packet_tx, cancel_task).await;
            let _ = finished_tx.send(true);
        });

        DriverChannels { packets: packet_rx, finished: finished_rx, cancel }
    }

    /// Packet reader task - pulls packets and broadcasts them
    async fn packet_reader_task<P>(
        mut provider: P,
        packet_tx: broadcast::Sender<Arc<Packet>>,
        cancel: CancellationToken,
    ) where
        P: Provider,
    {
        info!("Packet reader task started");
        let mut packet_count = 0u64;
        let mut error_count = 0u32;

        loop {
            // Use select to allow cancellation during provider.next_packet()
            let result = tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Packet reader cancelled");
                    break;
                }
                result = provider.next_packet() => result,
            };

            match result {
                Ok(Some(packet)) => {
                    packet_count += 1;
                    error_count = 0;

                    trace!(
                        "Packet {}: source={}, seq={}, t={}us",
                        packet_count, packet.source, packet.sequence, packet.time_us
                    );

                    // No subscribers is fine; packets are simply not retained
                    if packet_tx.send(Arc::new(packet)).is_err() {
                        trace!("No subscribers for packet {}", packet_count);
                    }
                }
                Ok(None) => {
                    info!("Provider stream ended after {} packets", packet_count);
                    break;
                }
                Err(e) => {
                    // Provider error - don't crash on transient failures
                    error_count += 1;
                    error!("Provider error ({}/{}): {}", error_count, Self::MAX_ERRORS, e);

                    if error_count >= Self::MAX_ERRORS || e.is_corruption() {
                        error!("Unrecoverable provider error, shutting down");
                        break;
                    }

                    // Exponential backoff: 100ms, 200ms, 400ms, ...
                    let backoff = std::time::Duration::from_millis(50 * (1 << error_count.min(5)));
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(backoff) => {}
                    }
                }
            }
        }

        debug!("Packet reader task ended (delivered {} packets)", packet_count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PacketStreamSource, SourceId};
    use crate::{PacketStreamError, Result};
    use std::collections::VecDeque;

    /// Scripted provider yielding a fixed sequence of results
    struct Scripted {
        script: VecDeque<Result<Option<Packet>>>,
    }

    #[async_trait::async_trait]
    impl Provider for Scripted {
        async fn next_packet(&mut self) -> Result<Option<Packet>> {
            self.script.pop_front().unwrap_or(Ok(None))
        }

        fn sources(&self) -> Vec<PacketStreamSource> {
            vec![PacketStreamSource::variable("scripted")]
        }

        fn rate_hz(&self, _source: SourceId) -> Option<f64> {
            None
        }
    }

    fn packet(sequence: usize) -> Packet {
        Packet::new(0, sequence, sequence as i64, None, vec![sequence as u8])
    }

    #[tokio::test]
    async fn broadcasts_until_stream_ends() {
        let script = (0..5).map(|i| Ok(Some(packet(i)))).collect();
        let provider = Scripted { script };

        // The initial receiver exists before the task runs, so it sees every packet
        let channels = Driver::spawn(provider, 16);
        let mut rx = channels.packets;
        let mut finished = channels.finished;

        finished.wait_for(|done| *done).await.unwrap();
        let mut sequences = Vec::new();
        while let Ok(packet) = rx.recv().await {
            sequences.push(packet.sequence);
        }
        assert_eq!(sequences, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn transient_errors_are_retried() {
        let script = VecDeque::from(vec![
            Err(PacketStreamError::truncated("payload")),
            Ok(Some(packet(0))),
            Ok(None),
        ]);
        let channels = Driver::spawn(Scripted { script }, 16);
        let mut rx = channels.packets;
        let mut finished = channels.finished;

        let received = tokio::time::timeout(std::time::Duration::from_secs(5), rx.recv())
            .await
            .expect("packet after retry")
            .expect("channel open");
        assert_eq!(received.sequence, 0);
        finished.wait_for(|done| *done).await.unwrap();
    }

    #[tokio::test]
    async fn corruption_stops_the_task() {
        let script = VecDeque::from(vec![
            Err(PacketStreamError::corrupt(10, "bad tag")),
            Ok(Some(packet(0))),
        ]);
        let channels = Driver::spawn(Scripted { script }, 16);
        let mut rx = channels.packets;
        let mut finished = channels.finished;

        finished.wait_for(|done| *done).await.unwrap();
        assert!(matches!(rx.recv().await, Err(broadcast::error::RecvError::Closed)));
    }
}
