//! Provider implementations

pub mod playback;

pub use playback::{PlaybackControl, PlaybackHandle, PlaybackOptions, PlaybackProvider};
