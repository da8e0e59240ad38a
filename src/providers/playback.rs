//! Playback provider for packet stream recordings

use serde::Deserialize;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;
use tracing::{debug, info, trace};

use crate::provider::Provider;
use crate::reader::PacketStreamReader;
use crate::sync_time::SyncTime;
use crate::types::{Packet, PacketStreamSource, SourceId};
use crate::{PacketStreamError, Result};

/// Playback configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PlaybackOptions {
    /// Playback speed multiplier, clamped to 0.1..=10.0
    pub speed: f64,

    /// Pace packets by capture time; otherwise deliver as fast as possible
    pub realtime: bool,

    /// Start paused so subscribers can attach before the first packet
    pub start_paused: bool,

    /// Packets buffered per subscriber before the slowest one starts lagging
    pub channel_capacity: usize,
}

impl Default for PlaybackOptions {
    fn default() -> Self {
        Self { speed: 1.0, realtime: true, start_paused: false, channel_capacity: 64 }
    }
}

/// Control state shared between a playback handle and its provider
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaybackControl {
    pub paused: bool,
    pub speed: f64,
    /// Bumped on every seek; packets read before it are discarded
    pub seek_generation: u64,
}

/// Replays a recording packet by packet, paced by capture time.
pub struct PlaybackProvider {
    reader: Arc<PacketStreamReader>,

    /// Seek generation, locked around every read and seek
    generation: Arc<Mutex<u64>>,

    control: watch::Receiver<PlaybackControl>,
    applied: PlaybackControl,
    clock: SyncTime,
    realtime: bool,

    sources: Vec<PacketStreamSource>,
    rates: Vec<Option<f64>>,
}

/// Remote control for a running [`PlaybackProvider`].
#[derive(Clone)]
pub struct PlaybackHandle {
    reader: Arc<PacketStreamReader>,
    generation: Arc<Mutex<u64>>,
    control: watch::Sender<PlaybackControl>,
}

impl PlaybackProvider {
    /// Create a provider over `reader` and the handle that controls it.
    pub fn new(
        reader: Arc<PacketStreamReader>,
        options: &PlaybackOptions,
    ) -> (Self, PlaybackHandle) {
        let clock = SyncTime::new(options.speed);
        let initial =
            PlaybackControl { paused: options.start_paused, speed: clock.speed(), seek_generation: 0 };
        let (control_tx, control_rx) = watch::channel(initial);
        let generation = Arc::new(Mutex::new(0));

        let sources = reader.sources();
        let rates = (0..sources.len()).map(|id| reader.source_rate_hz(id)).collect();
        info!(
            "Playback of {} sources from {} ({}x, realtime: {})",
            sources.len(),
            reader.path().display(),
            clock.speed(),
            options.realtime
        );

        let handle = PlaybackHandle {
            reader: Arc::clone(&reader),
            generation: Arc::clone(&generation),
            control: control_tx,
        };
        let provider = Self {
            reader,
            generation,
            control: control_rx,
            applied: initial,
            clock,
            realtime: options.realtime,
            sources,
            rates,
        };
        (provider, handle)
    }

    /// Apply pending control changes. Returns true when a seek happened.
    fn apply_control(&mut self) -> bool {
        let control = *self.control.borrow_and_update();
        let seeked = control.seek_generation > self.applied.seek_generation;

        if control.speed != self.applied.speed {
            debug!("Playback speed set to {}x", control.speed);
            self.clock.set_speed(control.speed);
        }
        if seeked || (self.applied.paused && !control.paused) {
            self.clock.reset();
        }

        self.applied.paused = control.paused;
        self.applied.speed = control.speed;
        self.applied.seek_generation = self.applied.seek_generation.max(control.seek_generation);
        seeked
    }

    /// Block while paused. Returns `None` once the handle is gone,
    /// otherwise whether a seek happened meanwhile.
    async fn wait_unpaused(&mut self) -> Option<bool> {
        let mut seeked = false;
        while self.applied.paused {
            self.control.changed().await.ok()?;
            seeked |= self.apply_control();
        }
        Some(seeked)
    }

    /// Read the next packet on the blocking pool, tagged with its seek generation.
    async fn read_next(&self) -> Result<(u64, Option<Packet>)> {
        let reader = Arc::clone(&self.reader);
        let generation = Arc::clone(&self.generation);

        tokio::task::spawn_blocking(move || {
            let generation = generation.lock().unwrap_or_else(PoisonError::into_inner);
            reader.next_packet().map(|packet| (*generation, packet))
        })
        .await
        .map_err(|e| PacketStreamError::io("reading packet", std::io::Error::other(e)))?
    }
}

#[async_trait::async_trait]
impl Provider for PlaybackProvider {
    async fn next_packet(&mut self) -> Result<Option<Packet>> {
        'packets: loop {
            self.apply_control();
            if self.wait_unpaused().await.is_none() {
                return Ok(None);
            }

            let (generation, packet) = self.read_next().await?;
            let Some(packet) = packet else {
                debug!("Reached end of recording");
                return Ok(None);
            };

            if generation < self.applied.seek_generation {
                trace!("Dropping packet read before seek");
                continue;
            }
            if generation > self.applied.seek_generation {
                // Seek finished before its notification arrived
                self.applied.seek_generation = generation;
                self.clock.reset();
            }

            loop {
                if self.apply_control() {
                    continue 'packets;
                }
                match self.wait_unpaused().await {
                    None => return Ok(None),
                    Some(true) => continue 'packets,
                    Some(false) => {}
                }
                if !self.realtime {
                    return Ok(Some(packet));
                }

                let deadline = self.clock.deadline(packet.time_us);
                tokio::select! {
                    _ = tokio::time::sleep_until(deadline) => return Ok(Some(packet)),
                    changed = self.control.changed() => {
                        if changed.is_err() {
                            return Ok(None);
                        }
                    }
                }
            }
        }
    }

    fn sources(&self) -> Vec<PacketStreamSource> {
        self.sources.clone()
    }

    fn rate_hz(&self, source: SourceId) -> Option<f64> {
        self.rates.get(source).copied().flatten()
    }
}

impl PlaybackHandle {
    pub fn pause(&self) {
        self.control.send_modify(|control| control.paused = true);
    }

    pub fn resume(&self) {
        self.control.send_modify(|control| control.paused = false);
    }

    pub fn is_paused(&self) -> bool {
        self.control.borrow().paused
    }

    /// Set playback speed, clamped to the supported range.
    pub fn set_speed(&self, speed: f64) -> f64 {
        let speed = SyncTime::new(speed).speed();
        self.control.send_modify(|control| control.speed = speed);
        speed
    }

    pub fn speed(&self) -> f64 {
        self.control.borrow().speed
    }

    /// Seek `source` to `frame`; blocks on the reader.
    pub fn seek(&self, source: SourceId, frame: i64) -> Result<usize> {
        self.seek_with(|reader| reader.seek(source, frame))
    }

    /// Seek `source` to its first packet at or after `time_us`; blocks on the reader.
    pub fn seek_time(&self, source: SourceId, time_us: i64) -> Result<usize> {
        self.seek_with(|reader| reader.seek_time(source, time_us))
    }

    fn seek_with(
        &self,
        seek: impl FnOnce(&PacketStreamReader) -> Result<usize>,
    ) -> Result<usize> {
        let mut generation = self.generation.lock().unwrap_or_else(PoisonError::into_inner);
        let frame = seek(&self.reader)?;
        *generation += 1;
        let current = *generation;
        drop(generation);

        self.control.send_modify(|control| control.seek_generation = current);
        Ok(frame)
    }
}
