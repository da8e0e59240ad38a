//! Connections that play recordings back to async subscribers

pub mod playback;

pub use playback::PlaybackConnection;
