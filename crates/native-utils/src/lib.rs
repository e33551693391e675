//! Host audio helpers for the practice client: device lookup, PCM16 codecs and
//! resampling.

pub mod audio;
pub mod device;
