use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Audio data encoded as base64
pub type Base64EncodedAudioBytes = String;

/// Sample rate the agent uses when the initiation metadata does not name one.
pub const DEFAULT_SAMPLE_RATE: u32 = 16000;

/// Audio encoding negotiated for either direction of a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFormat {
    /// Little-endian PCM16 at the given sample rate, e.g. `pcm_16000`.
    Pcm(u32),
    /// `ulaw_8000`
    Ulaw8000,
}

impl AudioFormat {
    pub fn sample_rate(&self) -> u32 {
        match self {
            AudioFormat::Pcm(rate) => *rate,
            AudioFormat::Ulaw8000 => 8000,
        }
    }
}

impl Default for AudioFormat {
    fn default() -> Self {
        AudioFormat::Pcm(DEFAULT_SAMPLE_RATE)
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AudioFormat::Pcm(rate) => write!(f, "pcm_{rate}"),
            AudioFormat::Ulaw8000 => f.write_str("ulaw_8000"),
        }
    }
}

impl FromStr for AudioFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "ulaw_8000" {
            return Ok(AudioFormat::Ulaw8000);
        }
        s.strip_prefix("pcm_")
            .and_then(|rate| rate.parse::<u32>().ok())
            .map(AudioFormat::Pcm)
            .ok_or_else(|| format!("unsupported audio format: {s}"))
    }
}

impl Serialize for AudioFormat {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for AudioFormat {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        AudioFormat::from_str(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_pcm_rates() {
        assert_eq!("pcm_16000".parse::<AudioFormat>(), Ok(AudioFormat::Pcm(16000)));
        assert_eq!("pcm_44100".parse::<AudioFormat>().map(|f| f.sample_rate()), Ok(44100));
        assert_eq!("ulaw_8000".parse::<AudioFormat>(), Ok(AudioFormat::Ulaw8000));
        assert!("mp3_44100_128".parse::<AudioFormat>().is_err());
    }
}
