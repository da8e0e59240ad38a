//! Playback connection for packet stream recordings

use futures::{Stream, StreamExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::driver::Driver;
use crate::provider::Provider;
use crate::providers::{PlaybackHandle, PlaybackOptions, PlaybackProvider};
use crate::reader::{PacketStreamReader, ReaderOptions};
use crate::stream::ThrottleExt;
use crate::types::{Packet, PacketStreamSource, SourceId, UpdateRate};
use crate::{PacketStreamError, Result};

/// Playback connection from a recorded packet stream.
///
/// Packets are fanned out to every subscriber. A subscription only sees
/// packets played after it was created; open with
/// [`PlaybackOptions::start_paused`] and call [`resume`](Self::resume) once
/// all subscribers are attached to observe a recording from its start.
pub struct PlaybackConnection {
    /// Broadcast receiver kept so `subscribe` can resubscribe
    packets: broadcast::Receiver<Arc<Packet>>,

    /// Set once the recording has been played to its end
    finished: watch::Receiver<bool>,

    handle: PlaybackHandle,
    sources: Vec<PacketStreamSource>,
    rates: Vec<Option<f64>>,
    path: PathBuf,

    /// Cancellation token for stopping tasks
    cancel: CancellationToken,
}

impl PlaybackConnection {
    /// Open a recording for playback.
    ///
    /// Opening parses the header and loads (or rebuilds) the packet index on
    /// the blocking pool before the playback task starts.
    pub async fn open<P: AsRef<Path>>(path: P, options: PlaybackOptions) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        info!("Opening recording for playback: {}", path.display());

        let open_path = path.clone();
        let reader = tokio::task::spawn_blocking(move || {
            PacketStreamReader::open(&open_path, ReaderOptions::default())
        })
        .await
        .map_err(|e| PacketStreamError::io("opening recording", std::io::Error::other(e)))??;

        Ok(Self::from_reader(Arc::new(reader), options))
    }

    /// Start playback over an already opened reader.
    ///
    /// Must be called from within a tokio runtime.
    pub fn from_reader(reader: Arc<PacketStreamReader>, options: PlaybackOptions) -> Self {
        let path = reader.path();
        let (provider, handle) = PlaybackProvider::new(reader, &options);
        let sources = provider.sources();
        let rates = (0..sources.len()).map(|id| provider.rate_hz(id)).collect();

        let channels = Driver::spawn(provider, options.channel_capacity);
        info!("Playback connection opened ({} sources)", sources.len());

        Self {
            packets: channels.packets,
            finished: channels.finished,
            handle,
            sources,
            rates,
            path,
            cancel: channels.cancel,
        }
    }

    /// Subscribe to played-back packets.
    ///
    /// `source` restricts the subscription to one source; `None` delivers
    /// every source. `rate` throttles delivery with latest-wins semantics.
    pub fn subscribe(
        &self,
        source: Option<SourceId>,
        rate: UpdateRate,
    ) -> impl Stream<Item = Arc<Packet>> + Send + 'static {
        let packets = BroadcastStream::new(self.packets.resubscribe()).filter_map(move |item| {
            let packet = match item {
                Ok(packet) if source.is_none_or(|id| packet.source == id) => Some(packet),
                Ok(_) => None,
                Err(BroadcastStreamRecvError::Lagged(missed)) => {
                    warn!("Subscriber lagging, skipped {} packets", missed);
                    None
                }
            };
            futures::future::ready(packet)
        });

        let source_hz = match source {
            Some(id) => self.source_hz(id),
            None => self.combined_hz(),
        };

        match rate.throttle_interval(source_hz) {
            None => packets.boxed(),
            Some(period) => packets.throttle(period).boxed(),
        }
    }

    pub fn pause(&self) {
        self.handle.pause();
    }

    pub fn resume(&self) {
        self.handle.resume();
    }

    pub fn is_paused(&self) -> bool {
        self.handle.is_paused()
    }

    /// Change playback speed. Returns the speed actually applied.
    pub fn set_speed(&self, speed: f64) -> f64 {
        self.handle.set_speed(speed)
    }

    pub fn speed(&self) -> f64 {
        self.handle.speed()
    }

    /// Seek `source` to `frame` (clamped); playback continues from there.
    pub async fn seek(&self, source: SourceId, frame: i64) -> Result<usize> {
        let handle = self.handle.clone();
        self.blocking(move || handle.seek(source, frame)).await
    }

    /// Seek `source` to its first packet captured at or after `time_us`.
    pub async fn seek_time(&self, source: SourceId, time_us: i64) -> Result<usize> {
        let handle = self.handle.clone();
        self.blocking(move || handle.seek_time(source, time_us)).await
    }

    async fn blocking<F>(&self, seek: F) -> Result<usize>
    where
        F: FnOnce() -> Result<usize> + Send + 'static,
    {
        tokio::task::spawn_blocking(seek)
            .await
            .map_err(|e| PacketStreamError::io("seeking recording", std::io::Error::other(e)))?
    }

    /// Sources registered in the recording
    pub fn sources(&self) -> &[PacketStreamSource] {
        &self.sources
    }

    /// Average packet rate of `source`, if it has at least two packets
    pub fn source_hz(&self, source: SourceId) -> Option<f64> {
        self.rates.get(source).copied().flatten()
    }

    fn combined_hz(&self) -> Option<f64> {
        let known: Vec<f64> = self.rates.iter().flatten().copied().collect();
        if known.is_empty() { None } else { Some(known.iter().sum()) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether playback has reached the end of the recording
    pub fn is_finished(&self) -> bool {
        *self.finished.borrow()
    }

    /// Wait until playback reaches the end of the recording.
    pub async fn finished(&self) {
        let mut finished = self.finished.clone();
        // A dropped sender also means the task is gone
        let _ = finished.wait_for(|done| *done).await;
    }
}

impl Drop for PlaybackConnection {
    fn drop(&mut self) {
        debug!("Dropping playback connection");
        self.cancel.cancel();
    }
}
